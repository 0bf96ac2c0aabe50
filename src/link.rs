//! Layer-2 link endpoint: open/bind a raw Ethernet socket and
//! send/recv fixed-size frames with a deadline.
//!
//! Grounded in `sockets.c`'s `create_raw_socket`, `get_interface_info`
//! and `set_socket_timeout`. No safe crate in this pack models
//! `AF_PACKET`/`sockaddr_ll`, so the real implementation talks to
//! `libc` directly; everything above this module only sees the
//! [`Link`] trait.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::frame::FRAME_SIZE;

/// A link-layer MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xFF; 6]);
}

/// Peer identity on the link: interface index + MAC, refreshed from the
/// source address of the most recent valid frame (there is no explicit
/// session — see DESIGN NOTES §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr {
    pub if_index: i32,
    pub mac: MacAddr,
}

/// Abstraction over a raw link-layer socket, so the reliable channel
/// and everything above it is testable without a real NIC or root.
pub trait Link {
    /// Write exactly one frame to `peer`. May internally retry on a
    /// transient would-block condition per spec §4.2; returns
    /// `Error::Io` only once that retry budget is exhausted.
    fn send(&mut self, frame: &[u8; FRAME_SIZE], peer: &PeerAddr) -> Result<()>;

    /// Wait up to `deadline` for one frame. `Ok(None)` means the
    /// deadline elapsed with nothing valid-or-otherwise arriving;
    /// `Ok(Some(_))` is a frame exactly as it arrived on the wire
    /// (unvalidated — the caller unpacks and validates it).
    fn recv(&mut self, deadline: Duration) -> Result<Option<([u8; FRAME_SIZE], PeerAddr)>>;
}

/// Bounded would-block retry budget for [`Link::send`] implementations,
/// per spec §4.2 ("a small bounded number of attempts, recommended 5").
pub const SEND_RETRY_ATTEMPTS: u32 = 5;

/// Delay between would-block retries, per spec §4.2 ("≥200 ms").
pub const SEND_RETRY_DELAY: Duration = Duration::from_millis(200);

#[cfg(target_os = "linux")]
mod raw {
    use super::*;
    use std::mem;
    use std::os::fd::RawFd;

    /// A real `AF_PACKET`/`SOCK_RAW` socket bound to a named interface
    /// in promiscuous mode.
    pub struct RawEthernetLink {
        fd: RawFd,
        if_index: i32,
    }

    impl RawEthernetLink {
        /// Open and bind a raw socket on `iface`, enabling promiscuous
        /// mode. Mirrors `create_raw_socket`/`get_interface_info` in
        /// `sockets.c`.
        pub fn open(iface: &str) -> Result<Self> {
            // SAFETY: straight libc FFI per the original C implementation;
            // every call's return value is checked before use.
            unsafe {
                let fd = libc::socket(
                    libc::AF_PACKET,
                    libc::SOCK_RAW,
                    (libc::ETH_P_ALL as u16).to_be() as i32,
                );
                if fd < 0 {
                    return Err(Error::Setup(format!(
                        "socket creation failed: {}",
                        std::io::Error::last_os_error()
                    )));
                }

                let if_index = interface_index(fd, iface).inspect_err(|_| {
                    libc::close(fd);
                })?;

                let mut addr: libc::sockaddr_ll = mem::zeroed();
                addr.sll_family = libc::AF_PACKET as u16;
                addr.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
                addr.sll_ifindex = if_index;

                let bind_rc = libc::bind(
                    fd,
                    &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_ll>() as u32,
                );
                if bind_rc < 0 {
                    let err = std::io::Error::last_os_error();
                    libc::close(fd);
                    return Err(Error::Setup(format!("bind failed: {err}")));
                }

                let mut mreq: libc::packet_mreq = mem::zeroed();
                mreq.mr_ifindex = if_index;
                mreq.mr_type = libc::PACKET_MR_PROMISC as u16;
                let promisc_rc = libc::setsockopt(
                    fd,
                    libc::SOL_PACKET,
                    libc::PACKET_ADD_MEMBERSHIP,
                    &mreq as *const libc::packet_mreq as *const libc::c_void,
                    mem::size_of::<libc::packet_mreq>() as u32,
                );
                if promisc_rc < 0 {
                    let err = std::io::Error::last_os_error();
                    libc::close(fd);
                    return Err(Error::Setup(format!(
                        "enabling promiscuous mode failed: {err}"
                    )));
                }

                Ok(RawEthernetLink { fd, if_index })
            }
        }

        /// Configure both the receive and send deadlines, per
        /// `set_socket_timeout` in `sockets.c`.
        pub fn set_timeout(&mut self, ms: u64) -> Result<()> {
            let tv = libc::timeval {
                tv_sec: (ms / 1000) as libc::time_t,
                tv_usec: ((ms % 1000) * 1000) as libc::suseconds_t,
            };
            for opt in [libc::SO_RCVTIMEO, libc::SO_SNDTIMEO] {
                // SAFETY: `tv` is a valid, fully-initialized `timeval`.
                let rc = unsafe {
                    libc::setsockopt(
                        self.fd,
                        libc::SOL_SOCKET,
                        opt,
                        &tv as *const libc::timeval as *const libc::c_void,
                        mem::size_of::<libc::timeval>() as u32,
                    )
                };
                if rc < 0 {
                    return Err(std::io::Error::last_os_error().into());
                }
            }
            Ok(())
        }
    }

    fn interface_index(fd: RawFd, iface: &str) -> Result<i32> {
        // SAFETY: `ifr` is zeroed and the name is truncated to fit
        // before the ioctl call, matching `get_interface_info`.
        unsafe {
            let mut ifr: libc::ifreq = mem::zeroed();
            let name_bytes = iface.as_bytes();
            let max_len = ifr.ifr_name.len() - 1;
            let len = name_bytes.len().min(max_len);
            for (dst, &src) in ifr.ifr_name[..len].iter_mut().zip(&name_bytes[..len]) {
                *dst = src as libc::c_char;
            }

            if libc::ioctl(fd, libc::SIOCGIFINDEX, &mut ifr) < 0 {
                return Err(Error::Setup(format!(
                    "SIOCGIFINDEX failed for interface {iface}: {}",
                    std::io::Error::last_os_error()
                )));
            }
            Ok(ifr.ifr_ifru.ifru_ifindex)
        }
    }

    impl Link for RawEthernetLink {
        fn send(&mut self, frame: &[u8; FRAME_SIZE], peer: &PeerAddr) -> Result<()> {
            // SAFETY: `addr` is a fully-initialized `sockaddr_ll`; the
            // buffer pointer/length pair describes `frame` exactly.
            unsafe {
                let mut addr: libc::sockaddr_ll = mem::zeroed();
                addr.sll_family = libc::AF_PACKET as u16;
                addr.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
                addr.sll_ifindex = peer.if_index;
                addr.sll_halen = 6;
                addr.sll_addr[..6].copy_from_slice(&peer.mac.0);

                for attempt in 0..SEND_RETRY_ATTEMPTS {
                    let sent = libc::sendto(
                        self.fd,
                        frame.as_ptr() as *const libc::c_void,
                        frame.len(),
                        0,
                        &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                        mem::size_of::<libc::sockaddr_ll>() as u32,
                    );
                    if sent as usize == frame.len() {
                        return Ok(());
                    }
                    let err = std::io::Error::last_os_error();
                    let would_block = err.kind() == std::io::ErrorKind::WouldBlock;
                    if would_block && attempt + 1 < SEND_RETRY_ATTEMPTS {
                        std::thread::sleep(SEND_RETRY_DELAY);
                        continue;
                    }
                    return Err(err.into());
                }
                Err(Error::Io(std::io::Error::from(
                    std::io::ErrorKind::WouldBlock,
                )))
            }
        }

        fn recv(&mut self, deadline: Duration) -> Result<Option<([u8; FRAME_SIZE], PeerAddr)>> {
            self.set_timeout(deadline.as_millis() as u64)?;

            let mut buf = [0u8; FRAME_SIZE];
            // SAFETY: `from` is a correctly sized `sockaddr_ll` buffer;
            // `recvfrom` fills it and `addr_len`.
            unsafe {
                let mut from: libc::sockaddr_ll = mem::zeroed();
                let mut addr_len = mem::size_of::<libc::sockaddr_ll>() as u32;
                let received = libc::recvfrom(
                    self.fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                    &mut from as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                    &mut addr_len,
                );

                if received < 0 {
                    let err = std::io::Error::last_os_error();
                    if matches!(
                        err.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) {
                        return Ok(None);
                    }
                    return Err(err.into());
                }
                if received as usize != FRAME_SIZE {
                    return Ok(None);
                }

                let mut mac = [0u8; 6];
                mac.copy_from_slice(&from.sll_addr[..6]);
                let peer = PeerAddr {
                    if_index: from.sll_ifindex,
                    mac: MacAddr(mac),
                };
                Ok(Some((buf, peer)))
            }
        }
    }

    impl Drop for RawEthernetLink {
        fn drop(&mut self) {
            // SAFETY: `fd` was opened by this struct and is closed once.
            unsafe {
                libc::close(self.fd);
            }
        }
    }

    /// Resolve interface + broadcast peer address for first contact,
    /// mirroring `get_interface_info`'s role of seeding `client_addr`
    /// before any frame has been received.
    pub fn broadcast_peer(iface: &str) -> Result<PeerAddr> {
        // SAFETY: transient socket only used to look up the interface
        // index; closed immediately after.
        unsafe {
            let fd = libc::socket(libc::AF_PACKET, libc::SOCK_RAW, (libc::ETH_P_ALL as u16).to_be() as i32);
            if fd < 0 {
                return Err(Error::Setup(format!(
                    "socket creation failed: {}",
                    std::io::Error::last_os_error()
                )));
            }
            let if_index = interface_index(fd, iface);
            libc::close(fd);
            Ok(PeerAddr {
                if_index: if_index?,
                mac: MacAddr::BROADCAST,
            })
        }
    }
}

#[cfg(target_os = "linux")]
pub use raw::{broadcast_peer, RawEthernetLink};

/// In-memory [`Link`] double: a pair of bounded queues connecting two
/// endpoints, used to drive the reliable channel, file-transfer
/// protocol and session drivers in tests without a real NIC or root.
#[cfg(any(test, feature = "testing"))]
pub mod loopback {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    type Queue = Arc<Mutex<VecDeque<([u8; FRAME_SIZE], PeerAddr)>>>;

    /// `Send`, so a connected pair can be split across two real
    /// threads to drive a full-duplex exchange in integration tests
    /// without the blocking calls on each side deadlocking each other.
    pub struct LoopbackLink {
        inbox: Queue,
        outbox: Queue,
        self_peer: PeerAddr,
        /// Drop the next N frames sent through this end, simulating
        /// lost deliveries for retry/backoff tests.
        pub drop_next_sends: usize,
        /// Polling interval `recv` uses while waiting on the queue
        /// before its deadline elapses.
        pub poll_interval: Duration,
    }

    impl LoopbackLink {
        /// Build a connected pair. `a` sends into `b`'s inbox and
        /// vice versa.
        pub fn pair(a_peer: PeerAddr, b_peer: PeerAddr) -> (Self, Self) {
            let a_to_b: Queue = Arc::new(Mutex::new(VecDeque::new()));
            let b_to_a: Queue = Arc::new(Mutex::new(VecDeque::new()));
            let a = LoopbackLink {
                inbox: b_to_a.clone(),
                outbox: a_to_b.clone(),
                self_peer: a_peer,
                drop_next_sends: 0,
                poll_interval: Duration::from_millis(2),
            };
            let b = LoopbackLink {
                inbox: a_to_b,
                outbox: b_to_a,
                self_peer: b_peer,
                drop_next_sends: 0,
                poll_interval: Duration::from_millis(2),
            };
            (a, b)
        }
    }

    impl Link for LoopbackLink {
        fn send(&mut self, frame: &[u8; FRAME_SIZE], _peer: &PeerAddr) -> Result<()> {
            if self.drop_next_sends > 0 {
                self.drop_next_sends -= 1;
                return Ok(());
            }
            self.outbox.lock().unwrap().push_back((*frame, self.self_peer));
            Ok(())
        }

        /// Polls the shared queue until a frame appears or `deadline`
        /// elapses, so a frame sent moments ago by the other thread is
        /// still observed rather than missed by a single instantaneous
        /// check.
        fn recv(&mut self, deadline: Duration) -> Result<Option<([u8; FRAME_SIZE], PeerAddr)>> {
            let wait_until = std::time::Instant::now() + deadline;
            loop {
                if let Some(item) = self.inbox.lock().unwrap().pop_front() {
                    return Ok(Some(item));
                }
                if std::time::Instant::now() >= wait_until {
                    return Ok(None);
                }
                std::thread::sleep(self.poll_interval);
            }
        }
    }
}

#[cfg(any(test, feature = "testing"))]
pub use loopback::LoopbackLink;
