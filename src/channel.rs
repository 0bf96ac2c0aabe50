//! Stop-and-wait ARQ on top of a [`Link`]: send-with-ACK,
//! receive-and-ACK, retransmission with backoff, sequence tracking.
//!
//! Grounded in `sockets.c`'s `send_packet`/`receive_packet`.

use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::frame::{Packet, PacketType, FRAME_SIZE};
use crate::link::{Link, PeerAddr};

/// Initial per-attempt ACK wait, per spec §4.3.
pub const INITIAL_TIMEOUT: Duration = Duration::from_millis(1000);
/// Timeout growth per retry, additive mode.
pub const TIMEOUT_STEP: Duration = Duration::from_millis(300);
/// Timeout ceiling.
pub const TIMEOUT_CAP: Duration = Duration::from_millis(2000);
/// Default retry budget for control packets.
pub const MAX_RETRIES: u32 = 5;
/// Retry budget for the data-heavy phase of a file transfer.
pub const MAX_RETRIES_DATA: u32 = 10;
/// Inter-attempt delay between the two ACKs sent for a `DATA` packet.
pub const DATA_ACK_GAP: Duration = Duration::from_millis(10);

/// A stop-and-wait reliable channel borrowing a [`Link`].
pub struct ReliableChannel<'a, L: Link> {
    link: &'a mut L,
    peer: PeerAddr,
    next_seq: u8,
}

impl<'a, L: Link> ReliableChannel<'a, L> {
    pub fn new(link: &'a mut L, peer: PeerAddr) -> Self {
        ReliableChannel {
            link,
            peer,
            next_seq: 0,
        }
    }

    /// Update the peer address from the most recently observed sender,
    /// since there is no explicit session (see DESIGN NOTES §9).
    pub fn set_peer(&mut self, peer: PeerAddr) {
        self.peer = peer;
    }

    pub fn peer(&self) -> PeerAddr {
        self.peer
    }

    /// The sequence number the next packet built via
    /// [`ReliableChannel::next_seq`] will use.
    pub fn current_seq(&self) -> u8 {
        self.next_seq
    }

    /// Consume and advance the per-endpoint sequence counter, modulo 32.
    pub fn next_seq(&mut self) -> u8 {
        let seq = self.next_seq;
        self.next_seq = (self.next_seq + 1) % 32;
        seq
    }

    /// Send `pkt`, retrying with backoff until an ACK for its `seq`
    /// arrives or `max_retries` is exhausted. ACK/NACK packets are
    /// never themselves acknowledged and return immediately after the
    /// underlying send succeeds.
    pub fn send_reliable(&mut self, pkt: &Packet, max_retries: u32) -> Result<()> {
        self.send_reliable_inner(pkt, max_retries, false)
    }

    /// As [`ReliableChannel::send_reliable`], but an `ERROR` frame from
    /// the peer triggers an immediate retransmission of `pkt` instead
    /// of being ignored until the deadline lapses. Used by the backup
    /// sub-protocol's data phase (§4.4), where the receiver answers a
    /// chunk it rejects with `ERROR` rather than staying silent.
    pub fn send_reliable_retry_on_error(&mut self, pkt: &Packet, max_retries: u32) -> Result<()> {
        self.send_reliable_inner(pkt, max_retries, true)
    }

    fn send_reliable_inner(&mut self, pkt: &Packet, max_retries: u32, retry_on_error: bool) -> Result<()> {
        let mut timeout = INITIAL_TIMEOUT;
        let mut retries = 0u32;

        loop {
            let wire = pkt.pack();
            self.send_with_retry(&wire)?;

            if matches!(pkt.packet_type, PacketType::Ack | PacketType::Nack) {
                return Ok(());
            }

            let mut peer_error = false;
            let deadline = Instant::now() + timeout;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match self.link.recv(remaining)? {
                    None => break,
                    Some((wire, from)) => {
                        if let Some(reply) = Packet::unpack(&wire) {
                            if reply.validate() && reply.packet_type == PacketType::Ack && reply.seq == pkt.seq {
                                self.peer = from;
                                return Ok(());
                            }
                            if retry_on_error && reply.validate() && reply.packet_type == PacketType::Error {
                                self.peer = from;
                                peer_error = true;
                                break;
                            }
                        }
                        // Wrong type, wrong seq, or invalid checksum:
                        // ignore and keep waiting for the deadline.
                    }
                }
            }

            retries += 1;
            if retries >= max_retries {
                warn!("send_reliable: exhausted {max_retries} retries for seq {}", pkt.seq);
                return Err(Error::Timeout);
            }
            if peer_error {
                debug!("send_reliable: peer reported error for seq {}, retransmitting immediately", pkt.seq);
                continue;
            }
            timeout = (timeout + TIMEOUT_STEP).min(TIMEOUT_CAP);
            std::thread::sleep(Duration::from_millis(100) * retries);
            debug!("send_reliable: retry {retries} for seq {}, timeout now {timeout:?}", pkt.seq);
        }
    }

    /// Send a frame, retrying on a transient would-block error per
    /// §4.2 (handled by the `Link` implementation itself; this just
    /// surfaces the final outcome).
    fn send_with_retry(&mut self, wire: &[u8; FRAME_SIZE]) -> Result<()> {
        self.link.send(wire, &self.peer)
    }

    /// Transmit `pkt` once with no ACK-wait and no retry on anything
    /// but a transient would-block. Used for the `SIZE` fire-and-
    /// synchronize packet and for one-shot `ERROR` replies (§4.4).
    pub fn send_raw(&mut self, pkt: &Packet) -> Result<()> {
        self.send_with_retry(&pkt.pack())
    }

    /// Emit a single `ACK` mirroring `seq`, without the `DATA` double
    /// send. Used by callers that received a frame outside
    /// `recv_reliable` (e.g. the `SIZE` packet) and must ack it
    /// themselves.
    pub fn ack_seq(&mut self, seq: u8) -> Result<()> {
        self.send_ack(seq, false)
    }

    /// Wait for one valid frame until `deadline` elapses and return it
    /// without acknowledging it. Used by session drivers' main
    /// dispatch loop, where the caller decides how (or whether) to
    /// respond based on the packet's type.
    pub fn recv_frame(&mut self, deadline: Duration) -> Result<Packet> {
        let wait_until = Instant::now() + deadline;
        loop {
            let remaining = wait_until.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }
            match self.link.recv(remaining)? {
                None => return Err(Error::Timeout),
                Some((wire, from)) => {
                    let Some(pkt) = Packet::unpack(&wire) else {
                        continue;
                    };
                    if !pkt.validate() {
                        debug!("recv_frame: dropping invalid frame (checksum mismatch)");
                        continue;
                    }
                    self.peer = from;
                    return Ok(pkt);
                }
            }
        }
    }

    /// Wait for a valid frame until `deadline` elapses, ACKing it (per
    /// §4.3 — twice, 10ms apart, for `DATA` packets) before returning
    /// it. Invalid frames are silently dropped.
    pub fn recv_reliable(&mut self, deadline: Duration) -> Result<Packet> {
        let wait_until = Instant::now() + deadline;
        loop {
            let remaining = wait_until.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }
            match self.link.recv(remaining)? {
                None => return Err(Error::Timeout),
                Some((wire, from)) => {
                    let Some(pkt) = Packet::unpack(&wire) else {
                        continue;
                    };
                    if !pkt.validate() {
                        debug!("recv_reliable: dropping invalid frame (checksum mismatch)");
                        continue;
                    }
                    self.peer = from;
                    self.send_ack(pkt.seq, pkt.packet_type == PacketType::Data)?;
                    return Ok(pkt);
                }
            }
        }
    }

    /// Emit an `ACK` mirroring `seq`. For `DATA` packets the ACK is
    /// sent twice with a short gap, per §4.3.
    fn send_ack(&mut self, seq: u8, is_data: bool) -> Result<()> {
        let ack = Packet::new(PacketType::Ack, seq, &[]);
        let wire = ack.pack();
        self.link.send(&wire, &self.peer)?;
        if is_data {
            std::thread::sleep(DATA_ACK_GAP);
            self.link.send(&wire, &self.peer)?;
        }
        Ok(())
    }
}
