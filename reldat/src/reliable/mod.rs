//! Reliable delivery mechanisms.
//!
//! - handshake: open and close exchanges with bounded retry
//! - Reassembler: out-of-order receive buffer
//! - RetransmitTracker: per-frame timers and retransmission budget

pub mod handshake;
mod reassembler;
mod retransmit;

pub use handshake::Opened;
pub use reassembler::{Accepted, Reassembler};
pub use retransmit::{PendingSend, RetransmitTracker};
