//! Connection tuning knobs.

use std::time::Duration;

use crate::core::FRAME_HEADER_SIZE;
use crate::error::{Error, Result};
use crate::{DEFAULT_MAX_RETRANSMISSIONS, DEFAULT_TIMEOUT_MS, MAX_FRAME_SIZE};

/// Tunables shared by both ends of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Wait before an unacknowledged frame is retransmitted. Also bounds
    /// every inbound poll.
    pub timeout: Duration,

    /// Retransmissions allowed before the peer is declared unreachable.
    pub max_retransmissions: u32,

    /// Largest frame put on the wire, header included.
    pub max_frame_size: usize,
}

impl Config {
    /// Creates a configuration with the compiled-in defaults.
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_retransmissions: DEFAULT_MAX_RETRANSMISSIONS,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Sets the retransmission timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retransmission budget.
    pub fn with_max_retransmissions(mut self, count: u32) -> Self {
        self.max_retransmissions = count;
        self
    }

    /// Sets the maximum frame size (including the 45 byte header).
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Payload bytes that fit in one frame.
    pub fn max_payload_size(&self) -> usize {
        self.max_frame_size.saturating_sub(FRAME_HEADER_SIZE)
    }

    /// Checks that the values describe a usable connection.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::InvalidConfig("timeout must be non-zero"));
        }
        if self.max_frame_size <= FRAME_HEADER_SIZE {
            return Err(Error::InvalidConfig("max frame size leaves no room for payload"));
        }
        if self.max_frame_size > MAX_FRAME_SIZE {
            return Err(Error::InvalidConfig("max frame size exceeds the 1000 byte wire cap"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
