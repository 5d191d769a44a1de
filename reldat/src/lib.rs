//! # RELDAT - Reliable Data Transfer over datagrams
//!
//! RELDAT is a connection-oriented reliable transport layered over an
//! unreliable, unordered, duplicating datagram service (UDP in practice).
//! This crate implements the client role of the protocol and exposes the
//! building blocks a peer needs:
//!
//! - **Dual checksums**: every frame carries an MD5 digest of its header
//!   fields and a separate MD5 digest of its payload
//! - **Handshakes**: three-way open and four-way close with bounded retry
//! - **Pipelining**: a sliding send window bounded by the peer's advertised
//!   capacity, with per-frame timers and bounded retransmission
//! - **Reassembly**: a fixed-capacity receive window that tolerates reordering
//!   and duplication
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │            Application (open / exchange / close)         │
//! ├─────────────────────────────────────────────────────────┤
//! │                 Connection controller                    │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────┐   │
//! │  │  Handshake  │ │ Send window │ │   Reassembler   │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────┘   │
//! ├─────────────────────────────────────────────────────────┤
//! │                    Frame codec                           │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────┐   │
//! │  │   Flags     │ │  MD5 x 2    │ │   Sequencing    │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────┘   │
//! ├─────────────────────────────────────────────────────────┤
//! │          Transport (UDP socket / in-memory pair)         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use reldat::{Config, Connection};
//!
//! let mut conn = Connection::open("10.0.0.2:5000".parse()?, 8, Config::default()).await?;
//! let reply = conn.exchange(b"hello, world").await?;
//! conn.close().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod buffer;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod reliable;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use self::core::{FRAME_HEADER_SIZE, Flags, Frame, MAX_PAYLOAD_SIZE, SequenceCounter};
pub use error::{Error, Result, Stage};
pub use protocol::{Connection, ConnectionState, ProtocolStats};
pub use transport::{MemoryTransport, Transport, UdpTransport};

/// Maximum frame size on the wire, header included.
pub const MAX_FRAME_SIZE: usize = 1000;

/// Default wait before an unacknowledged frame is retransmitted.
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Default number of retransmissions before the peer is declared unreachable.
pub const DEFAULT_MAX_RETRANSMISSIONS: u32 = 3;
