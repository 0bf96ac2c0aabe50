//! End-to-end scenarios over a pair of in-memory `LoopbackLink`s,
//! exercising the concrete cases from the move/transfer testable
//! properties: out-of-bounds rejection, byte-identical treasure
//! delivery (with a dropped ACK forcing retransmission), the
//! zero-free-space abort, and a flipped-checksum drop.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use netherit::channel::ReliableChannel;
use netherit::error::Error;
use netherit::frame::{ErrorCode, Packet, PacketType};
use netherit::game::{ClientView, Game, Treasure};
use netherit::link::{LoopbackLink, MacAddr, PeerAddr};
use netherit::session::{handle_client_packet, handle_server_response};
use netherit::transfer;

fn peers() -> (PeerAddr, PeerAddr) {
    (
        PeerAddr { if_index: 1, mac: MacAddr([1, 2, 3, 4, 5, 6]) },
        PeerAddr { if_index: 1, mac: MacAddr([6, 5, 4, 3, 2, 1]) },
    )
}

fn empty_game() -> Game {
    Game::init(&mut rand::thread_rng(), &[])
}

#[test]
fn move_right_from_origin_yields_ok_ack_with_new_position() {
    let (pa, pb) = peers();
    let (mut link_a, mut link_b) = LoopbackLink::pair(pa, pb);
    let mut server = ReliableChannel::new(&mut link_a, pb);
    let mut client = ReliableChannel::new(&mut link_b, pa);
    let mut game = empty_game();

    let move_pkt = Packet::new(PacketType::MoveRight, 0, &[]);
    handle_client_packet(&mut server, &mut game, Path::new("./objetos"), &move_pkt).unwrap();

    let reply = client.recv_frame(Duration::from_millis(200)).unwrap();
    assert_eq!(reply.packet_type, PacketType::OkAck);
    assert_eq!(reply.payload(), &[1, 0]);
    assert_eq!((game.player_x, game.player_y), (1, 0));
}

#[test]
fn move_left_from_origin_is_rejected() {
    let (pa, pb) = peers();
    let (mut link_a, mut link_b) = LoopbackLink::pair(pa, pb);
    let mut server = ReliableChannel::new(&mut link_a, pb);
    let mut client = ReliableChannel::new(&mut link_b, pa);
    let mut game = empty_game();

    let move_pkt = Packet::new(PacketType::MoveLeft, 0, &[]);
    handle_client_packet(&mut server, &mut game, Path::new("./objetos"), &move_pkt).unwrap();

    let reply = client.recv_frame(Duration::from_millis(200)).unwrap();
    assert_eq!(reply.packet_type, PacketType::Error);
    assert_eq!(ErrorCode::from_u8(reply.payload()[0]), Some(ErrorCode::NoPermission));
    assert_eq!((game.player_x, game.player_y), (0, 0));
}

/// Scenario 3/4: a treasure at (1,0), moving right from (0,0) triggers
/// a full delivery; the client's first ACK to the filename packet is
/// dropped, forcing the server to retransmit, and the final file is
/// still byte-identical and not double-written.
#[test]
fn treasure_delivery_survives_a_dropped_ack_and_is_byte_identical() {
    let (pa, pb) = peers();
    let (mut link_a, mut link_b) = LoopbackLink::pair(pa, pb);

    let objects_dir = tempfile::tempdir().unwrap();
    let mut src = std::fs::File::create(objects_dir.path().join("1.bin")).unwrap();
    let payload: Vec<u8> = (0..150u32).map(|i| (i % 200) as u8).collect();
    src.write_all(&payload).unwrap();
    drop(src);

    let mut game = Game {
        player_x: 0,
        player_y: 0,
        treasures: vec![Treasure { x: 1, y: 0, filename: "1.bin".into(), discovered: false }],
    };

    let server_thread = std::thread::spawn(move || {
        let mut server = ReliableChannel::new(&mut link_a, pb);
        let move_pkt = Packet::new(PacketType::MoveRight, 0, &[]);
        handle_client_packet(&mut server, &mut game, objects_dir.path(), &move_pkt).unwrap();
        game
    });

    let received_dir = tempfile::tempdir().unwrap();
    let mut client = ReliableChannel::new(&mut link_b, pa);
    let size_pkt = client.recv_frame(Duration::from_secs(2)).unwrap();
    let incoming = transfer::parse_size_payload(size_pkt.payload()).unwrap();
    // Drop the client's next two outgoing sends: the SIZE ack (which
    // the server never waits on) and, crucially, the ack for the
    // filename packet, forcing the server to retransmit it. The
    // receiver must ignore the duplicate rather than re-writing or
    // corrupting the file (receiver ordering rule).
    link_b.drop_next_sends = 2;
    let dest = transfer::receive_treasure_file(&mut client, size_pkt.seq, received_dir.path(), &incoming).unwrap();

    let game = server_thread.join().unwrap();
    assert!(game.treasures[0].discovered);
    let written = std::fs::read(dest).unwrap();
    assert_eq!(written, payload);
}

#[test]
fn zero_free_space_aborts_receive_with_no_space() {
    let (pa, pb) = peers();
    let (mut link_a, mut link_b) = LoopbackLink::pair(pa, pb);

    let src_dir = tempfile::tempdir().unwrap();
    std::fs::write(src_dir.path().join("2.txt"), b"treasure contents").unwrap();

    let mut sender = ReliableChannel::new(&mut link_a, pb);
    transfer::send_treasure_file(&mut sender, &src_dir.path().join("2.txt"), (1, 0)).unwrap();

    let mut receiver = ReliableChannel::new(&mut link_b, pa);
    let size_pkt = receiver.recv_frame(Duration::from_millis(200)).unwrap();
    let mut incoming = transfer::parse_size_payload(size_pkt.payload()).unwrap();
    incoming.size = u32::MAX;

    let dest_dir = tempfile::tempdir().unwrap();
    let result = transfer::receive_treasure_file(&mut receiver, size_pkt.seq, dest_dir.path(), &incoming);
    assert!(matches!(result, Err(Error::NoSpace)));
}

#[test]
fn flipped_checksum_is_dropped_and_sender_eventually_aborts() {
    let (pa, pb) = peers();
    let (mut link_a, _link_b) = LoopbackLink::pair(pa, pb);
    let mut sender = ReliableChannel::new(&mut link_a, pb);

    let mut pkt = Packet::new(PacketType::MoveUp, 3, &[]);
    pkt.checksum ^= 0x01;
    // Nothing ever answers a corrupted frame; the sender must still
    // terminate rather than hang, using the cheapest retry budget.
    let result = sender.send_reliable(&pkt, 1);
    assert!(matches!(result, Err(Error::Timeout)));
}

#[test]
fn client_view_updates_on_ok_ack() {
    let (pa, pb) = peers();
    let (mut link_a, mut link_b) = LoopbackLink::pair(pa, pb);
    let mut client = ReliableChannel::new(&mut link_b, pa);
    let mut view = ClientView::new();

    let mut server_side = ReliableChannel::new(&mut link_a, pb);
    let ack = Packet::new(PacketType::OkAck, 0, &[1, 0]);
    server_side.send_raw(&ack).unwrap();

    let pkt = client.recv_frame(Duration::from_millis(200)).unwrap();
    let received_dir = tempfile::tempdir().unwrap();
    handle_server_response(&mut client, &mut view, received_dir.path(), &pkt);
    assert_eq!((view.player_x, view.player_y), (1, 0));
    assert!(view.cell(1, 0).visited);
}

/// The backup sub-protocol's full handshake/data/confirmation cycle,
/// run with the initiator and receiver on separate threads since both
/// sides block waiting on each other.
#[test]
fn backup_upload_round_trips_byte_identical() {
    let (pa, pb) = peers();
    let (mut link_a, mut link_b) = LoopbackLink::pair(pa, pb);

    let src_dir = tempfile::tempdir().unwrap();
    let src_path = src_dir.path().join("notes.txt");
    let payload = b"backup payload bytes, a bit longer than one chunk to exercise the loop over and over".repeat(2);
    std::fs::write(&src_path, &payload).unwrap();

    let dest_dir = tempfile::tempdir().unwrap();
    let dest_dir_path = dest_dir.path().to_path_buf();

    let receiver_thread = std::thread::spawn(move || {
        let mut receiver = ReliableChannel::new(&mut link_b, pa);
        let handshake_pkt = receiver.recv_reliable(Duration::from_secs(2)).unwrap();
        assert_eq!(handshake_pkt.packet_type, PacketType::Backup);
        let handshake = transfer::parse_backup_handshake(handshake_pkt.payload()).unwrap();
        transfer::backup_receive(&mut receiver, handshake_pkt.seq, &handshake, &dest_dir_path).unwrap()
    });

    let mut initiator = ReliableChannel::new(&mut link_a, pb);
    transfer::backup_send(&mut initiator, &src_path).unwrap();

    let dest_path = receiver_thread.join().unwrap();
    let written = std::fs::read(dest_path).unwrap();
    assert_eq!(written, payload);
}
