//! Core data structures for the RELDAT wire protocol.
//!
//! - Frame: wire-level unit with flags, sequencing and dual checksums
//! - Checksum: MD5 digests for header and payload integrity
//! - SequenceCounter: the per-connection monotonic counter

mod checksum;
mod frame;
mod sequence;

pub use checksum::{CHECKSUM_SIZE, Checksum, Digest128};
pub use frame::{FRAME_HEADER_SIZE, Flags, Frame, HEADER_FIELDS_SIZE, Header, MAX_PAYLOAD_SIZE};
pub use sequence::SequenceCounter;
