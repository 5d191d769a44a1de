//! Error types for the protocol engine.

use std::fmt;

use thiserror::Error;

use crate::protocol::ConnectionState;

/// Protocol step during which the peer stopped answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for OPEN|ACK.
    Open,
    /// Waiting for CLOSE|ACK after our CLOSE.
    CloseAck,
    /// Waiting for the peer's own CLOSE.
    PeerClose,
    /// Waiting for the peer's data or end-of-data.
    Exchange,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Open => write!(f, "connection open"),
            Stage::CloseAck => write!(f, "close acknowledgment"),
            Stage::PeerClose => write!(f, "peer close"),
            Stage::Exchange => write!(f, "data exchange"),
        }
    }
}

/// Errors produced by the RELDAT engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Datagram too short to hold a frame, or shorter than its header claims.
    #[error("truncated frame: {len} bytes")]
    Truncated {
        /// Bytes actually received.
        len: usize,
    },

    /// Header checksum did not match the header fields.
    #[error("header checksum mismatch")]
    HeaderCorrupted,

    /// Payload checksum did not match the payload bytes.
    #[error("payload checksum mismatch")]
    PayloadCorrupted,

    /// Payload does not fit in a single frame.
    #[error("payload of {len} bytes exceeds the {max} byte frame capacity")]
    PayloadTooLarge {
        /// Requested payload length.
        len: usize,
        /// Largest payload a frame may carry.
        max: usize,
    },

    /// A window size advertisement was zero or not a decimal number.
    #[error("invalid window size advertisement")]
    InvalidWindowSize,

    /// Configuration rejected by [`crate::Config::validate`].
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// The retry budget ran out while waiting on the peer.
    #[error("peer unreachable during {0}")]
    Unreachable(Stage),

    /// A frame went unacknowledged through every allowed retransmission.
    #[error("frame {sequence} unacknowledged after {retransmissions} retransmissions")]
    RetransmitExhausted {
        /// Sequence number of the abandoned frame.
        sequence: u32,
        /// Retransmissions performed before giving up.
        retransmissions: u32,
    },

    /// A data frame landed more than one window ahead of the receive base.
    #[error("sequence {sequence} lies beyond the receive window at {base}")]
    WindowOverrun {
        /// Offending sequence number.
        sequence: u32,
        /// Receive window base at the time.
        base: u32,
    },

    /// Operation not allowed in the current connection state.
    #[error("operation not valid while {0:?}")]
    InvalidState(ConnectionState),

    /// The peer tore the connection down.
    #[error("peer closed the connection")]
    PeerClosed,

    /// The local transport endpoint has been closed.
    #[error("transport closed")]
    TransportClosed,

    /// Underlying socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true for damaged datagrams, which are dropped and never count
    /// against a retry budget.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::Truncated { .. } | Error::HeaderCorrupted | Error::PayloadCorrupted
        )
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
