//! Buffer management for the send path.
//!
//! - SendWindow: sliding window over the chunks of one exchange

mod window;

pub use window::{AckOutcome, SendWindow};
