//! Frame definition and serialization for RELDAT.
//!
//! A frame is the unit of transmission: one frame per datagram. Every
//! frame carries two MD5 digests so that header damage and payload damage
//! are detected (and reported) separately.
//!
//! # Frame Format
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |0|N|E|D|R|A|C|O|            Sequence Number (bytes 1-4)        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Seq (cont)  |       Acknowledgment Number (bytes 5-8)       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Ack (cont)  |         Payload Length (bytes 9-12)           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Len (cont)  |    Payload MD5 (bytes 13-28, 16 bytes) ...    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Header MD5 over bytes 0-28 (bytes 29-44) ...         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Payload (0..=955 bytes) ...                |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! All integers are big-endian. A frame is either seq-bearing (its sequence
//! number identifies it) or a pure acknowledgment (sequence zero, the
//! acknowledgment number names the frame being acknowledged).

use std::fmt;
use std::ops::BitOr;

use super::checksum::{CHECKSUM_SIZE, Checksum, Digest128};
use crate::MAX_FRAME_SIZE;
use crate::error::{Error, Result};

/// Size of the checksummed header fields.
pub const HEADER_FIELDS_SIZE: usize = 1 + 4 + 4 + 4 + CHECKSUM_SIZE;

/// Header size including the header checksum.
pub const FRAME_HEADER_SIZE: usize = HEADER_FIELDS_SIZE + CHECKSUM_SIZE;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_SIZE - FRAME_HEADER_SIZE;

/// Frame flag set. Flags combine, e.g. `OPEN | ACK`.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Flags(u8);

impl Flags {
    /// No flags set.
    pub const NONE: Self = Self(0);

    /// Connection open request.
    pub const OPEN: Self = Self(1 << 0);

    /// Connection close request.
    pub const CLOSE: Self = Self(1 << 1);

    /// Acknowledgment.
    pub const ACK: Self = Self(1 << 2);

    /// Payload has been transmitted before.
    pub const RETRANSMIT: Self = Self(1 << 3);

    /// Frame carries application data.
    pub const DATA: Self = Self(1 << 4);

    /// End of data for one direction.
    pub const EOD: Self = Self(1 << 5);

    /// Liveness probe.
    pub const NUDGE: Self = Self(1 << 6);

    const NAMES: [(Self, &'static str); 7] = [
        (Self::OPEN, "OPEN"),
        (Self::CLOSE, "CLOSE"),
        (Self::ACK, "ACK"),
        (Self::RETRANSMIT, "RETRANSMIT"),
        (Self::DATA, "DATA"),
        (Self::EOD, "EOD"),
        (Self::NUDGE, "NUDGE"),
    ];

    /// Creates flags from the raw byte.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Returns the raw byte.
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Checks if every flag in `other` is set.
    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Sets a flag.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Combines two flag sets.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for Flags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "NONE");
        }
        let mut first = true;
        let mut known = 0u8;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                known |= flag.0;
                first = false;
            }
        }
        let unknown = self.0 & !known;
        if unknown != 0 {
            if !first {
                write!(f, "|")?;
            }
            write!(f, "{unknown:#04x}")?;
        }
        Ok(())
    }
}

/// The checksummed header fields of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Frame flags.
    pub flags: Flags,

    /// Sequence number, zero for pure acknowledgments.
    pub sequence: u32,

    /// Sequence number being acknowledged.
    pub ack: u32,

    /// Number of payload bytes following the header.
    pub payload_len: u32,

    /// MD5 of the payload.
    pub payload_checksum: Digest128,
}

impl Header {
    /// Serializes the header fields (without the header checksum).
    pub fn to_bytes(&self) -> [u8; HEADER_FIELDS_SIZE] {
        let mut buf = [0u8; HEADER_FIELDS_SIZE];
        buf[0] = self.flags.bits();
        buf[1..5].copy_from_slice(&self.sequence.to_be_bytes());
        buf[5..9].copy_from_slice(&self.ack.to_be_bytes());
        buf[9..13].copy_from_slice(&self.payload_len.to_be_bytes());
        buf[13..HEADER_FIELDS_SIZE].copy_from_slice(&self.payload_checksum);
        buf
    }

    /// Parses header fields. The caller verifies the header checksum first.
    pub fn from_bytes(buf: &[u8; HEADER_FIELDS_SIZE]) -> Self {
        let mut payload_checksum = [0u8; CHECKSUM_SIZE];
        payload_checksum.copy_from_slice(&buf[13..HEADER_FIELDS_SIZE]);

        Self {
            flags: Flags::from_bits(buf[0]),
            sequence: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
            ack: u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]),
            payload_len: u32::from_be_bytes([buf[9], buf[10], buf[11], buf[12]]),
            payload_checksum,
        }
    }
}

/// A decoded (or ready to encode) RELDAT frame.
///
/// Equality is plain value equality. Use [`Frame::acknowledges`] to decide
/// whether an incoming frame acknowledges an outstanding one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame flags.
    pub flags: Flags,

    /// Sequence number of this frame.
    pub sequence: u32,

    /// Acknowledgment number.
    pub ack: u32,

    /// Frame payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a frame from its parts.
    pub fn new(flags: Flags, sequence: u32, ack: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            flags,
            sequence,
            ack,
            payload: payload.into(),
        }
    }

    /// Creates an OPEN frame advertising the local window size.
    pub fn open(sequence: u32, window: u32) -> Self {
        Self::new(Flags::OPEN, sequence, 0, window.to_string())
    }

    /// Creates the OPEN|ACK reply advertising the responder's window size.
    pub fn open_ack(sequence: u32, ack: u32, window: u32) -> Self {
        Self::new(Flags::OPEN | Flags::ACK, sequence, ack, window.to_string())
    }

    /// Creates a pure ACK for `ack`.
    pub fn ack(ack: u32) -> Self {
        Self::new(Flags::ACK, 0, ack, Vec::new())
    }

    /// Creates a DATA frame.
    pub fn data(sequence: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Flags::DATA, sequence, 0, payload)
    }

    /// Creates an EOD frame.
    pub fn eod(sequence: u32) -> Self {
        Self::new(Flags::EOD, sequence, 0, Vec::new())
    }

    /// Creates the ACK|EOD reply for the EOD frame `ack`.
    pub fn eod_ack(ack: u32) -> Self {
        Self::new(Flags::ACK | Flags::EOD, 0, ack, Vec::new())
    }

    /// Creates a CLOSE frame.
    pub fn close(sequence: u32) -> Self {
        Self::new(Flags::CLOSE, sequence, 0, Vec::new())
    }

    /// Creates the CLOSE|ACK reply for the CLOSE frame `ack`.
    pub fn close_ack(ack: u32) -> Self {
        Self::new(Flags::CLOSE | Flags::ACK, 0, ack, Vec::new())
    }

    /// Creates a NUDGE probe.
    pub fn nudge() -> Self {
        Self::new(Flags::NUDGE, 0, 0, Vec::new())
    }

    /// Creates the NUDGE|ACK reply.
    pub fn nudge_ack(ack: u32) -> Self {
        Self::new(Flags::NUDGE | Flags::ACK, 0, ack, Vec::new())
    }

    /// Returns a copy flagged as a retransmission.
    pub fn retransmission(&self) -> Self {
        let mut frame = self.clone();
        frame.flags.insert(Flags::RETRANSMIT);
        frame
    }

    /// Builds the header for this frame, computing the payload checksum.
    pub fn header(&self) -> Result<Header> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge {
                len: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Header {
            flags: self.flags,
            sequence: self.sequence,
            ack: self.ack,
            payload_len: self.payload.len() as u32,
            payload_checksum: Checksum::compute(&self.payload),
        })
    }

    /// Returns the total size of this frame when serialized.
    pub fn wire_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }

    /// Serializes the frame into `buf`, returning the number of bytes written.
    pub fn serialize(&self, buf: &mut [u8]) -> Result<usize> {
        let header = self.header()?;
        let total = self.wire_size();
        if buf.len() < total {
            return Err(Error::PayloadTooLarge {
                len: self.payload.len(),
                max: buf.len().saturating_sub(FRAME_HEADER_SIZE),
            });
        }

        let fields = header.to_bytes();
        buf[..HEADER_FIELDS_SIZE].copy_from_slice(&fields);
        buf[HEADER_FIELDS_SIZE..FRAME_HEADER_SIZE].copy_from_slice(&Checksum::compute(&fields));
        buf[FRAME_HEADER_SIZE..total].copy_from_slice(&self.payload);

        Ok(total)
    }

    /// Serializes the frame into a new buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.wire_size()];
        self.serialize(&mut buf)?;
        Ok(buf)
    }

    /// Parses and verifies a frame.
    ///
    /// The header checksum is checked before any field is read, then the
    /// payload checksum. Bytes past the announced payload length are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(Error::Truncated { len: buf.len() });
        }

        let (fields, rest) = buf.split_at(HEADER_FIELDS_SIZE);
        let (stored, body) = rest.split_at(CHECKSUM_SIZE);

        if Checksum::compute(fields)[..] != *stored {
            return Err(Error::HeaderCorrupted);
        }

        let fields: &[u8; HEADER_FIELDS_SIZE] = fields
            .try_into()
            .map_err(|_| Error::Truncated { len: buf.len() })?;
        let header = Header::from_bytes(fields);

        let len = header.payload_len as usize;
        if len > body.len() {
            return Err(Error::Truncated { len: buf.len() });
        }

        let payload = &body[..len];
        if !Checksum::verify(payload, &header.payload_checksum) {
            return Err(Error::PayloadCorrupted);
        }

        Ok(Self {
            flags: header.flags,
            sequence: header.sequence,
            ack: header.ack,
            payload: payload.to_vec(),
        })
    }

    /// Returns true if this frame acknowledges the seq-bearing frame `sequence`.
    pub fn acknowledges(&self, sequence: u32) -> bool {
        self.is_ack() && self.ack == sequence
    }

    /// Parses a window size advertisement (ASCII decimal) from the payload.
    pub fn window_size(&self) -> Result<u32> {
        let text = std::str::from_utf8(&self.payload).map_err(|_| Error::InvalidWindowSize)?;
        match text.trim().parse::<u32>() {
            Ok(0) | Err(_) => Err(Error::InvalidWindowSize),
            Ok(size) => Ok(size),
        }
    }

    /// ACK flag set.
    pub fn is_ack(&self) -> bool {
        self.flags.contains(Flags::ACK)
    }

    /// DATA flag set.
    pub fn is_data(&self) -> bool {
        self.flags.contains(Flags::DATA)
    }

    /// OPEN flag set.
    pub fn is_open(&self) -> bool {
        self.flags.contains(Flags::OPEN)
    }

    /// CLOSE flag set.
    pub fn is_close(&self) -> bool {
        self.flags.contains(Flags::CLOSE)
    }

    /// EOD flag set.
    pub fn is_eod(&self) -> bool {
        self.flags.contains(Flags::EOD)
    }

    /// NUDGE flag set.
    pub fn is_nudge(&self) -> bool {
        self.flags.contains(Flags::NUDGE)
    }

    /// RETRANSMIT flag set.
    pub fn is_retransmit(&self) -> bool {
        self.flags.contains(Flags::RETRANSMIT)
    }
}
