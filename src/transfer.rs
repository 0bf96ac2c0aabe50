//! File-transfer protocol layered on top of [`crate::channel`]: the
//! `SIZE` fire-and-synchronize handshake, filename classification, the
//! `DATA`/`END_FILE` stream, and the backup sub-protocol variant.
//!
//! Grounded in `server.c`'s `send_file_to_client` (game-mode sender)
//! and `client.c`'s backup bootstrap/data loop (backup-mode initiator).

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};

use crate::channel::{ReliableChannel, MAX_RETRIES, MAX_RETRIES_DATA};
use crate::error::{Error, Result};
use crate::frame::{backup, ErrorCode, Packet, PacketType, MAX_DATA_SIZE};
use crate::link::Link;

/// Delay between successive `DATA` sends in the streaming phase, per
/// §5 ("short fixed sleep of a few milliseconds to avoid starving the
/// kernel send buffer").
pub const DATA_PACING_DELAY: Duration = Duration::from_millis(2);

/// Per-attempt deadline the receiver uses while draining frames during
/// file reception.
pub const RECV_DEADLINE: Duration = Duration::from_millis(2000);

/// Consecutive recv timeouts the receiver tolerates before declaring
/// the transfer a failure.
pub const RECV_TIMEOUT_BUDGET: u32 = 15;

/// MIME-class tag derived from a filename's suffix.
pub fn classify(filename: &str) -> PacketType {
    let lower = filename.to_ascii_lowercase();
    if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        PacketType::ImageAck
    } else if lower.ends_with(".mp4") || lower.ends_with(".mp3") || lower.ends_with(".wav") || lower.ends_with(".ogg")
    {
        PacketType::VideoAck
    } else {
        PacketType::TextAck
    }
}

/// Bytes of space free under `dir`, via `statvfs`. Returns `u64::MAX`
/// on platforms without it so the precheck never spuriously fails.
#[cfg(target_os = "linux")]
pub fn free_space(dir: &Path) -> Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(dir.as_os_str().as_bytes())
        .map_err(|_| Error::Setup("staging directory path contains a NUL byte".into()))?;
    // SAFETY: `c_path` is a valid NUL-terminated string and `stat` is a
    // single, fully zeroed `statvfs` output parameter.
    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
    }
}

#[cfg(not(target_os = "linux"))]
pub fn free_space(_dir: &Path) -> Result<u64> {
    Ok(u64::MAX)
}

/// Send `path` as a game-mode treasure delivery: `SIZE{size, x, y}`
/// fire-and-synchronize, filename, `DATA*`, `END_FILE`. All retries and
/// ACK-waits below `SIZE` run over the supplied channel.
pub fn send_treasure_file<L: Link>(
    channel: &mut ReliableChannel<L>,
    path: &Path,
    position: (u8, u8),
) -> Result<()> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();

    let mut size_payload = Vec::with_capacity(6);
    size_payload.extend_from_slice(&(size as u32).to_be_bytes());
    size_payload.push(position.0);
    size_payload.push(position.1);
    let size_seq = channel.next_seq();
    let size_pkt = Packet::new(PacketType::Size, size_seq, &size_payload);
    // Fire-and-synchronize: the receiver is blocked in its own
    // main-loop recv, not in recv_reliable, so no ACK-wait here.
    channel.send_raw(&size_pkt)?;

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Setup("treasure file has no valid UTF-8 basename".into()))?;
    let name_seq = channel.next_seq();
    let name_pkt = Packet::new(classify(filename), name_seq, filename.as_bytes());
    channel.send_reliable(&name_pkt, MAX_RETRIES)?;

    stream_data(channel, &mut file)?;
    info!("sent treasure file {filename} ({size} bytes)");
    Ok(())
}

fn stream_data<L: Link>(channel: &mut ReliableChannel<L>, file: &mut File) -> Result<()> {
    let mut buf = [0u8; MAX_DATA_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let seq = channel.next_seq();
        let pkt = Packet::new(PacketType::Data, seq, &buf[..n]);
        channel.send_reliable(&pkt, MAX_RETRIES_DATA)?;
        std::thread::sleep(DATA_PACING_DELAY);
    }
    let end_seq = channel.next_seq();
    let end_pkt = Packet::new(PacketType::EndFile, end_seq, &[]);
    channel.send_reliable(&end_pkt, MAX_RETRIES_DATA)
}

/// Outcome of observing a `SIZE` packet in the client's main loop.
pub struct IncomingTransfer {
    pub size: u32,
    pub position: (u8, u8),
}

/// Parse a `SIZE` packet's payload (`{size_u32, x, y}`).
pub fn parse_size_payload(payload: &[u8]) -> Option<IncomingTransfer> {
    if payload.len() != 6 {
        return None;
    }
    let size = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    Some(IncomingTransfer {
        size,
        position: (payload[4], payload[5]),
    })
}

/// Receive a game-mode treasure delivery after the caller has already
/// observed the triggering `SIZE` packet via its own main-loop recv.
/// Performs the free-space precheck, then the filename and data phases
/// over `channel`, writing the result under `staging_dir`.
pub fn receive_treasure_file<L: Link>(
    channel: &mut ReliableChannel<L>,
    size_seq: u8,
    staging_dir: &Path,
    incoming: &IncomingTransfer,
) -> Result<std::path::PathBuf> {
    if free_space(staging_dir)? < incoming.size as u64 {
        warn!("insufficient space under {staging_dir:?} for {} bytes", incoming.size);
        send_error(channel, size_seq, ErrorCode::NoSpace)?;
        return Err(Error::NoSpace);
    }
    channel.ack_seq(size_seq)?;

    let name_pkt = channel.recv_reliable(RECV_DEADLINE)?;
    let filename = String::from_utf8_lossy(name_pkt.payload()).into_owned();
    std::fs::create_dir_all(staging_dir)?;
    let dest_path = staging_dir.join(&filename);
    let mut dest = File::create(&dest_path)?;

    let expected_seq = (name_pkt.seq + 1) % 32;
    receive_data_stream(channel, &mut dest, expected_seq)?;
    info!("received treasure file {filename} into {dest_path:?}");
    Ok(dest_path)
}

fn receive_data_stream<L: Link>(channel: &mut ReliableChannel<L>, dest: &mut File, mut expected_seq: u8) -> Result<()> {
    let mut timeouts = 0u32;
    loop {
        let pkt = match channel.recv_reliable(RECV_DEADLINE) {
            Ok(pkt) => pkt,
            Err(Error::Timeout) => {
                timeouts += 1;
                if timeouts >= RECV_TIMEOUT_BUDGET {
                    return Err(Error::Timeout);
                }
                continue;
            }
            Err(e) => return Err(e),
        };
        timeouts = 0;

        if pkt.packet_type == PacketType::EndFile {
            if pkt.seq == expected_seq {
                return Ok(());
            }
            debug!("dropping out-of-order END_FILE (seq {}, expected {expected_seq})", pkt.seq);
            continue;
        }
        if pkt.packet_type != PacketType::Data {
            debug!("unexpected packet type {:?} during data phase, ignoring", pkt.packet_type);
            continue;
        }
        if pkt.seq != expected_seq {
            debug!("dropping out-of-order DATA (seq {}, expected {expected_seq})", pkt.seq);
            continue;
        }
        dest.write_all(pkt.payload())?;
        expected_seq = (expected_seq + 1) % 32;
    }
}

fn send_error<L: Link>(channel: &mut ReliableChannel<L>, seq: u8, code: ErrorCode) -> Result<()> {
    let pkt = Packet::new(PacketType::Error, seq, &[code as u8]);
    channel.send_raw(&pkt)
}

/// Backup-mode initiator: announces `{basename, total_size}`, awaits
/// the generic transport ACK (handled inside `send_reliable`) and then
/// a distinct `OK_SIZE` confirmation, streams the file acknowledging
/// each chunk as `OK` and retrying immediately on `ERROR`, then
/// confirms completion via `END_TX`/`OK_CHSUM`.
pub fn backup_send<L: Link>(channel: &mut ReliableChannel<L>, path: &Path) -> Result<()> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Setup("backup file has no valid UTF-8 basename".into()))?;
    // NUL terminator + 8-byte size leave MAX_DATA_SIZE - 9 bytes for the
    // basename itself; Packet::new would otherwise panic on overlong names.
    let max_filename_len = MAX_DATA_SIZE - 9;
    if filename.len() >= max_filename_len {
        return Err(Error::Setup(format!(
            "backup filename {filename:?} is too long ({} bytes, max {max_filename_len})",
            filename.len()
        )));
    }

    let mut payload = Vec::with_capacity(filename.len() + 1 + 8);
    payload.extend_from_slice(filename.as_bytes());
    payload.push(0);
    payload.extend_from_slice(&size.to_be_bytes());

    let seq = channel.next_seq();
    let handshake = Packet::new(PacketType::Backup, seq, &payload);
    channel.send_reliable(&handshake, MAX_RETRIES)?;

    let reply = channel.recv_reliable(channel_handshake_deadline())?;
    if reply.packet_type != backup::OK_SIZE {
        return Err(Error::InvalidFrame);
    }

    let mut buf = [0u8; MAX_DATA_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let seq = channel.next_seq();
        let pkt = Packet::new(PacketType::Data, seq, &buf[..n]);
        channel.send_reliable_retry_on_error(&pkt, MAX_RETRIES_DATA)?;
        std::thread::sleep(DATA_PACING_DELAY);
    }

    let end_seq = channel.next_seq();
    let end_pkt = Packet::new(backup::END_TX, end_seq, &[]);
    channel.send_reliable(&end_pkt, MAX_RETRIES_DATA)?;
    let confirm = channel.recv_reliable(channel_handshake_deadline())?;
    if confirm.packet_type != backup::OK_CHSUM {
        return Err(Error::InvalidFrame);
    }
    info!("backed up {filename} ({size} bytes)");
    Ok(())
}

fn channel_handshake_deadline() -> Duration {
    crate::channel::INITIAL_TIMEOUT
}

/// Parse a `BACKUP` handshake payload into `{basename, total_size}`.
pub struct BackupHandshake {
    pub basename: String,
    pub total_size: u64,
}

pub fn parse_backup_handshake(payload: &[u8]) -> Option<BackupHandshake> {
    let nul = payload.iter().position(|&b| b == 0)?;
    if payload.len() != nul + 1 + 8 {
        return None;
    }
    let basename = std::str::from_utf8(&payload[..nul]).ok()?.to_owned();
    let size_bytes: [u8; 8] = payload[nul + 1..nul + 9].try_into().ok()?;
    Some(BackupHandshake {
        basename,
        total_size: u64::from_be_bytes(size_bytes),
    })
}

/// Backup-mode receiver: the `Backup` frame itself has already been
/// read (and thus ACKed) by the caller via `recv_reliable`; this
/// performs the free-space precheck, the `OK_SIZE` reply, the data
/// phase and the final `OK_CHSUM` confirmation.
pub fn backup_receive<L: Link>(
    channel: &mut ReliableChannel<L>,
    backup_seq: u8,
    handshake: &BackupHandshake,
    staging_dir: &Path,
) -> Result<std::path::PathBuf> {
    if free_space(staging_dir)? < handshake.total_size {
        warn!(
            "insufficient space under {staging_dir:?} for backup of {} bytes",
            handshake.total_size
        );
        let seq = channel.next_seq();
        send_error(channel, seq, ErrorCode::NoSpace)?;
        return Err(Error::NoSpace);
    }

    let ok_size_seq = channel.next_seq();
    let ok_size = Packet::new(backup::OK_SIZE, ok_size_seq, &[]);
    channel.send_reliable(&ok_size, MAX_RETRIES)?;

    std::fs::create_dir_all(staging_dir)?;
    let dest_path = staging_dir.join(&handshake.basename);
    let mut dest = File::create(&dest_path)?;
    let expected_seq = (backup_seq + 1) % 32;
    receive_backup_data(channel, &mut dest, expected_seq)?;

    let chsum_seq = channel.next_seq();
    let ok_chsum = Packet::new(backup::OK_CHSUM, chsum_seq, &[]);
    channel.send_reliable(&ok_chsum, MAX_RETRIES)?;
    info!("received backup {} into {dest_path:?}", handshake.basename);
    Ok(dest_path)
}

fn receive_backup_data<L: Link>(channel: &mut ReliableChannel<L>, dest: &mut File, mut expected_seq: u8) -> Result<()> {
    let mut timeouts = 0u32;
    loop {
        let pkt = match channel.recv_reliable(RECV_DEADLINE) {
            Ok(pkt) => pkt,
            Err(Error::Timeout) => {
                timeouts += 1;
                if timeouts >= RECV_TIMEOUT_BUDGET {
                    return Err(Error::Timeout);
                }
                continue;
            }
            Err(e) => return Err(e),
        };
        timeouts = 0;

        if pkt.packet_type == backup::END_TX {
            if pkt.seq == expected_seq {
                return Ok(());
            }
            continue;
        }
        if pkt.packet_type != PacketType::Data {
            continue;
        }
        if pkt.seq != expected_seq {
            debug!("dropping out-of-order backup DATA (seq {}, expected {expected_seq})", pkt.seq);
            continue;
        }
        dest.write_all(pkt.payload())?;
        expected_seq = (expected_seq + 1) % 32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{LoopbackLink, MacAddr, PeerAddr};
    use std::io::Write as _;
    use tempfile::tempdir;

    fn peers() -> (PeerAddr, PeerAddr) {
        (
            PeerAddr { if_index: 1, mac: MacAddr([1, 2, 3, 4, 5, 6]) },
            PeerAddr { if_index: 1, mac: MacAddr([6, 5, 4, 3, 2, 1]) },
        )
    }

    #[test]
    fn classify_matches_suffix_table() {
        assert_eq!(classify("a.jpg"), PacketType::ImageAck);
        assert_eq!(classify("A.JPEG"), PacketType::ImageAck);
        assert_eq!(classify("clip.mp4"), PacketType::VideoAck);
        assert_eq!(classify("song.mp3"), PacketType::VideoAck);
        assert_eq!(classify("song.wav"), PacketType::VideoAck);
        assert_eq!(classify("song.ogg"), PacketType::VideoAck);
        assert_eq!(classify("notes.txt"), PacketType::TextAck);
        assert_eq!(classify("noextension"), PacketType::TextAck);
    }

    #[test]
    fn parse_size_payload_roundtrip() {
        let payload = [0, 0, 1, 0, 3, 4];
        let parsed = parse_size_payload(&payload).unwrap();
        assert_eq!(parsed.size, 256);
        assert_eq!(parsed.position, (3, 4));
    }

    #[test]
    fn parse_backup_handshake_roundtrip() {
        let mut payload = b"gift.txt".to_vec();
        payload.push(0);
        payload.extend_from_slice(&42u64.to_be_bytes());
        let parsed = parse_backup_handshake(&payload).unwrap();
        assert_eq!(parsed.basename, "gift.txt");
        assert_eq!(parsed.total_size, 42);
    }

    #[test]
    fn treasure_file_round_trips_byte_identical() {
        let (pa, pb) = peers();
        let (mut link_a, mut link_b) = LoopbackLink::pair(pa, pb);

        let src_dir = tempdir().unwrap();
        let src_path = src_dir.path().join("3.txt");
        let mut src = File::create(&src_path).unwrap();
        let payload: Vec<u8> = (0..200u32).map(|i| (i % 251) as u8).collect();
        src.write_all(&payload).unwrap();
        drop(src);

        let mut sender = ReliableChannel::new(&mut link_a, pb);
        send_treasure_file(&mut sender, &src_path, (2, 0)).unwrap();

        let mut receiver = ReliableChannel::new(&mut link_b, pa);
        let size_pkt = receiver.recv_frame(Duration::from_millis(50)).unwrap();
        let incoming = parse_size_payload(size_pkt.payload()).unwrap();
        assert_eq!(incoming.position, (2, 0));
        assert_eq!(incoming.size as usize, payload.len());

        let dest_dir = tempdir().unwrap();
        let dest_path = receive_treasure_file(&mut receiver, size_pkt.seq, dest_dir.path(), &incoming).unwrap();
        let written = std::fs::read(dest_path).unwrap();
        assert_eq!(written, payload);
    }

    #[test]
    fn zero_free_space_aborts_with_no_space_error() {
        let (pa, pb) = peers();
        let (mut link_a, mut link_b) = LoopbackLink::pair(pa, pb);

        let src_dir = tempdir().unwrap();
        let src_path = src_dir.path().join("1.txt");
        std::fs::write(&src_path, b"hello").unwrap();

        let mut sender = ReliableChannel::new(&mut link_a, pb);
        send_treasure_file(&mut sender, &src_path, (0, 0)).unwrap();

        let mut receiver = ReliableChannel::new(&mut link_b, pa);
        let size_pkt = receiver.recv_frame(Duration::from_millis(50)).unwrap();
        let mut incoming = parse_size_payload(size_pkt.payload()).unwrap();
        incoming.size = u32::MAX;

        let dest_dir = tempdir().unwrap();
        let result = receive_treasure_file(&mut receiver, size_pkt.seq, dest_dir.path(), &incoming);
        assert!(matches!(result, Err(Error::NoSpace)));
    }
}
