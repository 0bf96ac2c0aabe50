//! Wire frame codec: fixed 4+64 byte frames with a bit-packed header.
//!
//! Grounded in the original `sockets.h`/`sockets.c` (`pack_packet`,
//! `unpack_packet`, `calculate_crc`, `validate_packet`). Packing and
//! unpacking are explicit big-endian shift/mask over byte arrays, never
//! a native bit-field layout, per DESIGN NOTES §9.

/// Literal start-of-frame marker.
pub const START_MARKER: u8 = 0x7E;

/// Maximum payload bytes a frame can carry; also the fixed size of the
/// wire `data` field (shorter payloads are zero-padded).
pub const MAX_DATA_SIZE: usize = 64;

/// Total wire size: marker (1) + header (2) + checksum (1) + data (64).
pub const FRAME_SIZE: usize = 4 + MAX_DATA_SIZE;

/// The 4-bit packet type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Ack = 0,
    Nack = 1,
    OkAck = 2,
    /// Reserved / unused by any operation in this crate; kept for wire
    /// compatibility with the original protocol.
    Free = 3,
    Size = 4,
    Data = 5,
    TextAck = 6,
    VideoAck = 7,
    ImageAck = 8,
    EndFile = 9,
    MoveRight = 10,
    MoveUp = 11,
    MoveDown = 12,
    MoveLeft = 13,
    /// Bootstrap request for the backup sub-protocol (see
    /// [`crate::transfer::backup`]). Occupies the one tag value left
    /// free by the game sub-protocol.
    Backup = 14,
    Error = 15,
}

impl PacketType {
    pub fn from_u8(v: u8) -> Option<Self> {
        use PacketType::*;
        Some(match v {
            0 => Ack,
            1 => Nack,
            2 => OkAck,
            3 => Free,
            4 => Size,
            5 => Data,
            6 => TextAck,
            7 => VideoAck,
            8 => ImageAck,
            9 => EndFile,
            10 => MoveRight,
            11 => MoveUp,
            12 => MoveDown,
            13 => MoveLeft,
            14 => Backup,
            15 => Error,
            _ => return None,
        })
    }
}

/// Backup sub-protocol control tags. The header has only 4 bits of tag
/// space and the game sub-protocol already uses 15 of the 16 values, so
/// these alias the semantically closest game-mode tag rather than
/// inventing wire-incompatible ones. Game and backup frames never
/// appear in the same session, so the alias is unambiguous. Named here
/// per REDESIGN FLAGS so the backup opcodes have an explicit presence
/// in the shared type module instead of being silently absent.
pub mod backup {
    use super::PacketType;

    /// Per-chunk data acknowledgement.
    pub const OK: PacketType = PacketType::Ack;
    /// Acknowledges the `BACKUP` bootstrap request's declared size.
    pub const OK_SIZE: PacketType = PacketType::OkAck;
    /// Final confirmation after `END_TX`.
    pub const OK_CHSUM: PacketType = PacketType::OkAck;
    /// End of transfer (equivalent to `END_FILE` in the file-transfer
    /// sub-protocol).
    pub const END_TX: PacketType = PacketType::EndFile;
}

/// Error codes carried as the one-byte payload of an `Error` packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    NoPermission = 0,
    NoSpace = 1,
}

impl ErrorCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ErrorCode::NoPermission),
            1 => Some(ErrorCode::NoSpace),
            _ => None,
        }
    }
}

/// The unpacked, in-memory view of a frame.
#[derive(Debug, Clone)]
pub struct Packet {
    pub size: u8,
    pub seq: u8,
    pub packet_type: PacketType,
    pub checksum: u8,
    pub data: [u8; MAX_DATA_SIZE],
}

impl Packet {
    /// Build a packet with size derived from `payload.len()` and the
    /// checksum computed over it. `payload` must be no longer than
    /// [`MAX_DATA_SIZE`].
    pub fn new(packet_type: PacketType, seq: u8, payload: &[u8]) -> Self {
        assert!(payload.len() <= MAX_DATA_SIZE);
        let mut data = [0u8; MAX_DATA_SIZE];
        data[..payload.len()].copy_from_slice(payload);
        let mut pkt = Packet {
            size: payload.len() as u8,
            seq: seq & 0x1F,
            packet_type,
            checksum: 0,
            data,
        };
        pkt.checksum = pkt.crc();
        pkt
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.size as usize]
    }

    /// 8-bit XOR over `size`, `seq`, `type` and the first `size` data
    /// bytes. Padding bytes are never part of the checksum.
    pub fn crc(&self) -> u8 {
        let mut crc = 0u8;
        crc ^= self.size;
        crc ^= self.seq;
        crc ^= self.packet_type as u8;
        for &b in &self.data[..self.size as usize] {
            crc ^= b;
        }
        crc
    }

    /// `true` iff the marker would be valid, `size` fits the wire
    /// field, the type tag is known, and the checksum matches.
    pub fn validate(&self) -> bool {
        self.size as usize <= MAX_DATA_SIZE && self.crc() == self.checksum
    }

    /// Pack into the fixed 68-byte wire representation.
    pub fn pack(&self) -> [u8; FRAME_SIZE] {
        let mut wire = [0u8; FRAME_SIZE];
        wire[0] = START_MARKER;
        let header: u16 =
            ((self.size as u16 & 0x7F) << 9) | ((self.seq as u16 & 0x1F) << 4) | (self.packet_type as u16 & 0x0F);
        wire[1] = (header >> 8) as u8;
        wire[2] = (header & 0xFF) as u8;
        wire[3] = self.checksum;
        wire[4..].copy_from_slice(&self.data);
        wire
    }

    /// Unpack a wire frame. Returns `None` if the marker or type tag
    /// is not recognized; does NOT check the checksum (use
    /// [`Packet::validate`] for that after unpacking).
    pub fn unpack(wire: &[u8; FRAME_SIZE]) -> Option<Self> {
        if wire[0] != START_MARKER {
            return None;
        }
        let header = ((wire[1] as u16) << 8) | wire[2] as u16;
        let size = ((header >> 9) & 0x7F) as u8;
        let seq = ((header >> 4) & 0x1F) as u8;
        let packet_type = PacketType::from_u8((header & 0x0F) as u8)?;
        let checksum = wire[3];
        let mut data = [0u8; MAX_DATA_SIZE];
        data.copy_from_slice(&wire[4..]);
        Some(Packet {
            size,
            seq,
            packet_type,
            checksum,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trip() {
        for size in [0usize, 1, 33, MAX_DATA_SIZE] {
            for seq in [0u8, 1, 17, 31] {
                for packet_type in [
                    PacketType::Ack,
                    PacketType::Data,
                    PacketType::MoveLeft,
                    PacketType::Error,
                ] {
                    let payload: Vec<u8> = (0..size).map(|i| i as u8).collect();
                    let pkt = Packet::new(packet_type, seq, &payload);
                    let wire = pkt.pack();
                    let round = Packet::unpack(&wire).unwrap();
                    assert_eq!(round.size, pkt.size);
                    assert_eq!(round.seq, pkt.seq);
                    assert_eq!(round.packet_type, pkt.packet_type);
                    assert_eq!(round.checksum, pkt.checksum);
                    assert_eq!(round.payload(), pkt.payload());
                    assert!(round.validate());
                }
            }
        }
    }

    #[test]
    fn header_bit_layout_matches_spec() {
        let pkt = Packet::new(PacketType::Data, 17, &[1, 2, 3]);
        let wire = pkt.pack();
        let header = ((wire[1] as u16) << 8) | wire[2] as u16;
        assert_eq!((header >> 9) & 0x7F, 3);
        assert_eq!((header >> 4) & 0x1F, 17);
        assert_eq!(header & 0x0F, PacketType::Data as u16);
    }

    #[test]
    fn checksum_excludes_padding() {
        let mut pkt = Packet::new(PacketType::Data, 0, &[0xAA]);
        // Corrupt a padding byte beyond `size`; checksum must still match.
        pkt.data[10] = 0xFF;
        assert!(pkt.validate());
    }

    #[test]
    fn flipped_checksum_bit_fails_validation() {
        let mut pkt = Packet::new(PacketType::MoveRight, 4, &[]);
        pkt.checksum ^= 0x01;
        assert!(!pkt.validate());
    }

    #[test]
    fn unknown_type_tag_fails_to_unpack() {
        // All 16 tag values are assigned in this protocol, so unpack
        // can't actually produce an unknown type from a real header;
        // this exercises the guard path directly via `from_u8`.
        assert!(PacketType::from_u8(16).is_none());
    }

    #[test]
    fn start_marker_mismatch_rejected() {
        let pkt = Packet::new(PacketType::Ack, 0, &[]);
        let mut wire = pkt.pack();
        wire[0] = 0x00;
        assert!(Packet::unpack(&wire).is_none());
    }
}
