//! Wire-format definitions for DRTP packets.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], rejecting input
//!   too short to hold a header.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Acknowledgment Number                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Flags        |S|A|F|-|             Window            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 12 bytes.
//! seq(4) + ack(4) + flags(2) + window(2)

use thiserror::Error;

/// Bit-flag constants for the `flags` header field.
///
/// Only the low nibble is used; bit 0 is reserved and ignored on decode.
pub mod flags {
    /// Synchronise (handshake initiation).
    pub const SYN: u16 = 0b1000;
    /// Acknowledgement field is valid.
    pub const ACK: u16 = 0b0100;
    /// Finish: final data chunk, or teardown request.
    pub const FIN: u16 = 0b0010;
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 12;

/// Largest payload a data packet may carry.
pub const MAX_PAYLOAD: usize = 1460;

/// Largest datagram the protocol ever produces (stays under a 1500-byte MTU).
pub const MAX_PACKET: usize = HEADER_LEN + MAX_PAYLOAD;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 4;
const OFF_FLAGS: usize = 8;
const OFF_WINDOW: usize = 10;

/// Fixed-size protocol header.
///
/// Fields are in host byte order; [`Packet::encode`] converts to big-endian
/// on the wire and [`Packet::decode`] converts back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    /// Packet-counting sequence number; data starts at 1, control uses 0.
    pub seq: u32,
    /// Acknowledged sequence number (0 on handshake/teardown packets).
    pub ack: u32,
    /// Bitmask of [`flags`] constants.
    pub flags: u16,
    /// Advertised receive window, in packets.
    pub window: u16,
}

/// Decoded view of the three meaningful flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
}

impl std::fmt::Display for Flags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = Vec::with_capacity(3);
        if self.syn {
            names.push("SYN");
        }
        if self.ack {
            names.push("ACK");
        }
        if self.fin {
            names.push("FIN");
        }
        if names.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Extract SYN / ACK / FIN from a raw flags field.
///
/// Reserved and unknown bits are ignored, never rejected.
pub fn decode_flags(raw: u16) -> Flags {
    Flags {
        syn: raw & flags::SYN != 0,
        ack: raw & flags::ACK != 0,
        fin: raw & flags::FIN != 0,
    }
}

/// Serialise header fields followed by `payload`.
///
/// The 1460-byte data limit is the caller's responsibility.
pub fn encode(seq: u32, ack: u32, flags: u16, window: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; HEADER_LEN + payload.len()];

    buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&seq.to_be_bytes());
    buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&ack.to_be_bytes());
    buf[OFF_FLAGS..OFF_FLAGS + 2].copy_from_slice(&flags.to_be_bytes());
    buf[OFF_WINDOW..OFF_WINDOW + 2].copy_from_slice(&window.to_be_bytes());
    buf[HEADER_LEN..].copy_from_slice(payload);

    buf
}

/// Parse a header and borrow the payload that follows it.
pub fn decode(buf: &[u8]) -> Result<(Header, &[u8]), PacketError> {
    if buf.len() < HEADER_LEN {
        return Err(PacketError::Malformed { len: buf.len() });
    }

    let header = Header {
        seq: read_u32(buf, OFF_SEQ),
        ack: read_u32(buf, OFF_ACK),
        flags: read_u16(buf, OFF_FLAGS),
        window: read_u16(buf, OFF_WINDOW),
    };
    Ok((header, &buf[HEADER_LEN..]))
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    fn control(flags: u16) -> Self {
        Self {
            header: Header {
                flags,
                ..Header::default()
            },
            payload: Vec::new(),
        }
    }

    /// Handshake initiation: `flags = SYN`, everything else zero.
    pub fn syn() -> Self {
        Self::control(flags::SYN)
    }

    /// Server's handshake reply: `flags = SYN | ACK`.
    pub fn syn_ack() -> Self {
        Self::control(flags::SYN | flags::ACK)
    }

    /// Client's handshake completion: `flags = ACK`, `ack = 0`.
    pub fn handshake_ack() -> Self {
        Self::control(flags::ACK)
    }

    /// Teardown request: `flags = FIN`, no payload.
    pub fn fin() -> Self {
        Self::control(flags::FIN)
    }

    /// Server's reply to the teardown FIN: `flags = FIN | ACK`, `ack = 0`.
    pub fn fin_ack() -> Self {
        Self::control(flags::FIN | flags::ACK)
    }

    /// Data packet carrying one chunk; `last` sets FIN on the final chunk.
    pub fn data(seq: u32, payload: Vec<u8>, last: bool) -> Self {
        Self {
            header: Header {
                seq,
                ack: 0,
                flags: if last { flags::FIN } else { 0 },
                window: 0,
            },
            payload,
        }
    }

    /// Acknowledgement of data packet `ack`, advertising `window` slots.
    pub fn data_ack(ack: u32, window: u16) -> Self {
        Self {
            header: Header {
                seq: 0,
                ack,
                flags: flags::ACK,
                window,
            },
            payload: Vec::new(),
        }
    }

    pub fn flags(&self) -> Flags {
        decode_flags(self.header.flags)
    }

    /// `true` for packets carrying a data chunk (seq ≥ 1, no SYN / ACK).
    ///
    /// The teardown FIN has seq 0, which separates it from the FIN-flagged
    /// final data chunk.
    pub fn is_data(&self) -> bool {
        let f = self.flags();
        self.header.seq != 0 && !f.syn && !f.ack
    }

    /// `true` for a pure acknowledgement of a data packet.
    pub fn is_data_ack(&self) -> bool {
        let f = self.flags();
        f.ack && !f.syn && !f.fin && self.payload.is_empty()
    }

    /// Serialise this packet into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let h = &self.header;
        encode(h.seq, h.ack, h.flags, h.window, &self.payload)
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Returns [`PacketError::Malformed`] if `buf` is shorter than
    /// [`HEADER_LEN`]; everything after the header is payload.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        let (header, payload) = decode(buf)?;
        Ok(Packet {
            header,
            payload: payload.to_vec(),
        })
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("malformed packet: {len} bytes is shorter than the {HEADER_LEN}-byte header")]
    Malformed { len: usize },
}
