/// Monotonic per-connection sequence counter.
///
/// Starts at zero and is never reset for the lifetime of a connection:
/// handshakes, data chunks and end-of-data markers all draw from it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceCounter {
    next: u32,
}

impl SequenceCounter {
    /// Creates a counter starting at zero.
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Creates a counter whose next value is `start`.
    pub const fn starting_at(start: u32) -> Self {
        Self { next: start }
    }

    /// Returns the next sequence number and advances the counter.
    pub fn next(&mut self) -> u32 {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        seq
    }

    /// Returns the next sequence number without consuming it.
    pub const fn peek(&self) -> u32 {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic() {
        let mut counter = SequenceCounter::new();
        assert_eq!(counter.next(), 0);
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.peek(), 2);
        assert_eq!(counter.next(), 2);
    }

    #[test]
    fn test_wraps() {
        let mut counter = SequenceCounter::starting_at(u32::MAX);
        assert_eq!(counter.next(), u32::MAX);
        assert_eq!(counter.next(), 0);
    }
}
