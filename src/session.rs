//! Session drivers: the server's move-dispatch loop, the client's
//! input-driven loop, and the backup initiator's one-shot upload.
//!
//! Grounded in `server.c`'s main loop / `process_client_packet` and
//! `client.c`'s `backup_file`. The arrow-key/raw-terminal handling is
//! implemented directly against `termios` (via `libc`) rather than a
//! terminal UI crate, since only single-keypress input is needed, not
//! full-screen rendering.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use rand::thread_rng;

use crate::channel::ReliableChannel;
use crate::error::{Error, Result};
use crate::frame::{ErrorCode, Packet, PacketType};
use crate::game::{ClientView, Direction, Game, MoveOutcome};
use crate::link::{broadcast_peer, Link, RawEthernetLink};
use crate::transfer;

/// Deadline used for every blocking `recv` in the session loops.
pub const RECV_POLL_DEADLINE: Duration = Duration::from_millis(2000);

/// Default directory the server loads treasure files from.
pub const OBJECTS_DIR: &str = "./objetos";
/// Default directory the game client writes received files into.
pub const RECEIVED_DIR: &str = "./received";

/// Run the treasure-hunt server's event loop on `iface` until an
/// unrecoverable link error occurs. Never returns on the happy path.
pub fn run_server(iface: &str) -> Result<()> {
    let mut link = RawEthernetLink::open(iface)?;
    link.set_timeout(RECV_POLL_DEADLINE.as_millis() as u64)?;
    let peer = broadcast_peer(iface)?;
    let mut channel = ReliableChannel::new(&mut link, peer);

    let objects_dir = Path::new(OBJECTS_DIR);
    let file_list = list_basenames(objects_dir).unwrap_or_else(|e| {
        warn!("could not read {objects_dir:?}: {e}");
        Vec::new()
    });
    let mut game = Game::init(&mut thread_rng(), &file_list);

    println!("=== TREASURE HUNT SERVER ===");
    println!("Interface: {iface}");
    println!("Waiting for client moves...\n");
    display_server_state(&game);

    loop {
        let pkt = match channel.recv_frame(RECV_POLL_DEADLINE) {
            Ok(pkt) => pkt,
            Err(Error::Timeout) => continue,
            Err(e) => {
                warn!("server recv error: {e}");
                continue;
            }
        };

        if let Err(e) = handle_client_packet(&mut channel, &mut game, objects_dir, &pkt) {
            warn!("failed to service packet (type {:?}, seq {}): {e}", pkt.packet_type, pkt.seq);
        }
    }
}

pub fn handle_client_packet<L: Link>(
    channel: &mut ReliableChannel<L>,
    game: &mut Game,
    objects_dir: &Path,
    pkt: &Packet,
) -> Result<()> {
    let dir = match move_direction(pkt.packet_type) {
        Some(dir) => dir,
        None if pkt.packet_type == PacketType::Backup => {
            channel.ack_seq(pkt.seq)?;
            let handshake = transfer::parse_backup_handshake(pkt.payload()).ok_or(Error::InvalidFrame)?;
            info!("backup request: {} ({} bytes)", handshake.basename, handshake.total_size);
            transfer::backup_receive(channel, pkt.seq, &handshake, Path::new("."))?;
            return Ok(());
        }
        None if matches!(pkt.packet_type, PacketType::Ack | PacketType::Nack) => {
            // Stray transport ACK/NACK arriving after the transfer it
            // belonged to has already completed; normal, not an error.
            return Ok(());
        }
        None => {
            warn!("unknown packet type {:?} from client", pkt.packet_type);
            let nack = Packet::new(PacketType::Nack, pkt.seq, &[]);
            channel.send_raw(&nack)?;
            return Ok(());
        }
    };

    match game.try_move(dir) {
        MoveOutcome::OutOfBounds => {
            let err = Packet::new(PacketType::Error, pkt.seq, &[ErrorCode::NoPermission as u8]);
            channel.send_raw(&err)?;
        }
        MoveOutcome::Moved { x, y } => {
            if let Some(treasure) = game.discover() {
                let filename = treasure.filename.clone();
                let path = objects_dir.join(&filename);
                transfer::send_treasure_file(channel, &path, (x, y))?;
            } else {
                let ack = Packet::new(PacketType::OkAck, pkt.seq, &[x, y]);
                channel.send_raw(&ack)?;
            }
            display_server_state(game);
        }
    }
    Ok(())
}

fn move_direction(packet_type: PacketType) -> Option<Direction> {
    match packet_type {
        PacketType::MoveRight => Some(Direction::Right),
        PacketType::MoveUp => Some(Direction::Up),
        PacketType::MoveDown => Some(Direction::Down),
        PacketType::MoveLeft => Some(Direction::Left),
        _ => None,
    }
}

fn display_server_state(game: &Game) {
    println!("\n=== SERVER STATE ===");
    println!(
        "Player position: ({}, {})",
        game.player_x, game.player_y
    );
    println!("Treasures remaining: {}", game.undiscovered_count());
    for t in &game.treasures {
        let mark = if t.discovered { "found" } else { "hidden" };
        println!("  ({}, {}) {} [{}]", t.x, t.y, t.filename, mark);
    }
}

fn list_basenames(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_owned());
        }
    }
    Ok(names)
}

/// Run the treasure-hunt client's input loop on `iface` until the user
/// quits. Writes discovered files under [`RECEIVED_DIR`].
pub fn run_client(iface: &str) -> Result<()> {
    let mut link = RawEthernetLink::open(iface)?;
    link.set_timeout(RECV_POLL_DEADLINE.as_millis() as u64)?;
    let peer = broadcast_peer(iface)?;
    let mut channel = ReliableChannel::new(&mut link, peer);
    let mut view = ClientView::new();
    let staging_dir = PathBuf::from(RECEIVED_DIR);

    println!("=== TREASURE HUNT CLIENT ===");
    println!("Interface: {iface}");
    println!("Arrow keys to move, q to quit.\n");

    let _raw = terminal::RawModeGuard::enable()?;
    loop {
        match terminal::read_key()? {
            terminal::Key::Quit => break,
            terminal::Key::Other => continue,
            terminal::Key::Direction(dir) => {
                let seq = channel.next_seq();
                let move_pkt = Packet::new(direction_packet_type(dir), seq, &[]);
                channel.send_raw(&move_pkt)?;

                match channel.recv_frame(RECV_POLL_DEADLINE) {
                    Ok(pkt) => handle_server_response(&mut channel, &mut view, &staging_dir, &pkt),
                    Err(Error::Timeout) => println!("(no response from server)"),
                    Err(e) => warn!("client recv error: {e}"),
                }
            }
        }
    }
    println!("Goodbye.");
    Ok(())
}

fn direction_packet_type(dir: Direction) -> PacketType {
    match dir {
        Direction::Right => PacketType::MoveRight,
        Direction::Up => PacketType::MoveUp,
        Direction::Down => PacketType::MoveDown,
        Direction::Left => PacketType::MoveLeft,
    }
}

pub fn handle_server_response<L: Link>(
    channel: &mut ReliableChannel<L>,
    view: &mut ClientView,
    staging_dir: &Path,
    pkt: &Packet,
) {
    match pkt.packet_type {
        PacketType::OkAck if pkt.payload().len() == 2 => {
            let (x, y) = (pkt.payload()[0], pkt.payload()[1]);
            view.set_position(x, y);
            println!("Moved to ({x}, {y}).");
        }
        PacketType::Error if !pkt.payload().is_empty() => {
            match ErrorCode::from_u8(pkt.payload()[0]) {
                Some(ErrorCode::NoPermission) => println!("Move rejected: out of bounds."),
                Some(ErrorCode::NoSpace) => println!("Move rejected: no space for incoming file."),
                None => println!("Move rejected: unknown error code."),
            }
        }
        PacketType::Size => {
            let Some(incoming) = transfer::parse_size_payload(pkt.payload()) else {
                warn!("malformed SIZE payload");
                return;
            };
            let (x, y) = incoming.position;
            view.set_position(x, y);
            view.mark_treasure_found(x, y);
            println!("Treasure found at ({x}, {y}), receiving file ({} bytes)...", incoming.size);
            match transfer::receive_treasure_file(channel, pkt.seq, staging_dir, &incoming) {
                Ok(path) => {
                    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                        view.mark_treasure_name(x, y, name.to_owned());
                    }
                    println!("Saved to {path:?}.");
                }
                Err(e) => warn!("treasure transfer failed: {e}"),
            }
        }
        other => warn!("unexpected packet type {other:?} from server"),
    }
}

/// Upload `path` to `iface` via the backup sub-protocol.
pub fn run_backup(iface: &str, path: &Path) -> Result<()> {
    let mut link = RawEthernetLink::open(iface)?;
    link.set_timeout(RECV_POLL_DEADLINE.as_millis() as u64)?;
    let peer = broadcast_peer(iface)?;
    let mut channel = ReliableChannel::new(&mut link, peer);

    println!("Backing up {path:?} over {iface}...");
    transfer::backup_send(&mut channel, path)?;
    println!("Backup complete.");
    Ok(())
}

/// Minimal raw-terminal single-key reader: enough to distinguish arrow
/// keys (`ESC [ A|B|C|D`), `q`/`Q`, and everything else.
mod terminal {
    use crate::error::{Error, Result};
    use crate::game::Direction;
    use std::io::Read;
    use std::mem;
    use std::os::fd::AsRawFd;

    pub enum Key {
        Direction(Direction),
        Quit,
        Other,
    }

    /// Disables canonical mode and echo on stdin for the guard's
    /// lifetime, restoring the original settings on drop.
    pub struct RawModeGuard {
        original: libc::termios,
    }

    impl RawModeGuard {
        pub fn enable() -> Result<Self> {
            let fd = std::io::stdin().as_raw_fd();
            // SAFETY: `fd` is a valid, open stdin descriptor; `termios`
            // is a plain-old-data struct fully initialized by
            // `tcgetattr` before use.
            unsafe {
                let mut original: libc::termios = mem::zeroed();
                if libc::tcgetattr(fd, &mut original) != 0 {
                    return Err(std::io::Error::last_os_error().into());
                }
                let mut raw = original;
                raw.c_lflag &= !(libc::ICANON | libc::ECHO);
                raw.c_cc[libc::VMIN] = 1;
                raw.c_cc[libc::VTIME] = 0;
                if libc::tcsetattr(fd, libc::TCSANOW, &raw) != 0 {
                    return Err(std::io::Error::last_os_error().into());
                }
                Ok(RawModeGuard { original })
            }
        }
    }

    impl Drop for RawModeGuard {
        fn drop(&mut self) {
            let fd = std::io::stdin().as_raw_fd();
            // SAFETY: restoring a termios this process previously read
            // via `tcgetattr` on the same descriptor.
            unsafe {
                libc::tcsetattr(fd, libc::TCSANOW, &self.original);
            }
        }
    }

    pub fn read_key() -> Result<Key> {
        let mut byte = [0u8; 1];
        std::io::stdin().read_exact(&mut byte).map_err(Error::Io)?;
        match byte[0] {
            b'q' | b'Q' => Ok(Key::Quit),
            0x1B => read_escape_sequence(),
            _ => Ok(Key::Other),
        }
    }

    fn read_escape_sequence() -> Result<Key> {
        let mut rest = [0u8; 2];
        if std::io::stdin().read_exact(&mut rest).is_err() {
            return Ok(Key::Other);
        }
        if rest[0] != b'[' {
            return Ok(Key::Other);
        }
        Ok(match rest[1] {
            b'A' => Key::Direction(Direction::Up),
            b'B' => Key::Direction(Direction::Down),
            b'C' => Key::Direction(Direction::Right),
            b'D' => Key::Direction(Direction::Left),
            _ => Key::Other,
        })
    }
}
