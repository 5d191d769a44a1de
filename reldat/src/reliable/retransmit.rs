//! Retransmission tracking for reliable delivery.
//!
//! Every seq-bearing frame gets a pending entry on its first transmission.
//! The entry lives until a matching acknowledgment arrives, or until the
//! frame has been retransmitted `max_retransmissions` times and times out
//! once more, at which point the peer is given up on.

use std::collections::BTreeMap;
use std::time::Duration;

use log::{trace, warn};
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Entry tracking a frame pending acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSend {
    /// When the frame was last put on the wire.
    pub sent_at: Instant,

    /// Retransmissions performed so far.
    pub retransmits: u32,
}

/// Per-frame timers keyed by sequence number.
#[derive(Debug)]
pub struct RetransmitTracker {
    pending: BTreeMap<u32, PendingSend>,
    timeout: Duration,
    max_retransmissions: u32,
}

impl RetransmitTracker {
    /// Creates an empty tracker.
    pub fn new(timeout: Duration, max_retransmissions: u32) -> Self {
        Self {
            pending: BTreeMap::new(),
            timeout,
            max_retransmissions,
        }
    }

    /// Records the first transmission of `sequence`.
    pub fn register(&mut self, sequence: u32, now: Instant) {
        self.pending.insert(
            sequence,
            PendingSend {
                sent_at: now,
                retransmits: 0,
            },
        );
    }

    /// Removes the entry matched by an acknowledgment, if any.
    pub fn acknowledge(&mut self, sequence: u32) -> Option<PendingSend> {
        self.pending.remove(&sequence)
    }

    /// Smallest outstanding sequence number.
    pub fn smallest(&self) -> Option<u32> {
        self.pending.keys().next().copied()
    }

    /// Returns the sequences due for retransmission at `now`.
    ///
    /// Each returned entry has its counter bumped and its timer restarted.
    /// Fails once a frame times out with its budget already spent.
    pub fn expired(&mut self, now: Instant) -> Result<Vec<u32>> {
        let mut due = Vec::new();

        for (&sequence, entry) in self.pending.iter_mut() {
            if now.saturating_duration_since(entry.sent_at) < self.timeout {
                continue;
            }

            if entry.retransmits >= self.max_retransmissions {
                warn!(
                    "frame {} unacknowledged after {} retransmissions",
                    sequence, entry.retransmits
                );
                return Err(Error::RetransmitExhausted {
                    sequence,
                    retransmissions: entry.retransmits,
                });
            }

            entry.retransmits += 1;
            entry.sent_at = now;
            trace!("frame {} due, attempt {}", sequence, entry.retransmits);
            due.push(sequence);
        }

        Ok(due)
    }

    /// Earliest instant at which some outstanding frame times out.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|entry| entry.sent_at + self.timeout)
            .min()
    }

    /// Returns true if `sequence` is awaiting acknowledgment.
    pub fn contains(&self, sequence: u32) -> bool {
        self.pending.contains_key(&sequence)
    }

    /// Number of outstanding frames.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[test]
    fn test_register_and_ack() {
        let now = Instant::now();
        let mut tracker = RetransmitTracker::new(TIMEOUT, 3);

        tracker.register(4, now);
        tracker.register(5, now);
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.smallest(), Some(4));

        assert!(tracker.acknowledge(5).is_some());
        assert!(tracker.acknowledge(5).is_none());
        assert_eq!(tracker.smallest(), Some(4));
        assert!(!tracker.contains(5));
    }

    #[test]
    fn test_not_expired_before_timeout() {
        let now = Instant::now();
        let mut tracker = RetransmitTracker::new(TIMEOUT, 3);
        tracker.register(1, now);

        assert!(tracker.expired(now + Duration::from_millis(999)).unwrap().is_empty());
        assert_eq!(tracker.expired(now + TIMEOUT).unwrap(), vec![1]);
    }

    #[test]
    fn test_budget_exhaustion() {
        let start = Instant::now();
        let mut tracker = RetransmitTracker::new(TIMEOUT, 3);
        tracker.register(9, start);

        let mut now = start;
        for _ in 0..3 {
            now += TIMEOUT;
            assert_eq!(tracker.expired(now).unwrap(), vec![9]);
        }

        now += TIMEOUT;
        match tracker.expired(now) {
            Err(Error::RetransmitExhausted {
                sequence: 9,
                retransmissions: 3,
            }) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_next_deadline() {
        let now = Instant::now();
        let mut tracker = RetransmitTracker::new(TIMEOUT, 3);
        assert!(tracker.next_deadline().is_none());

        tracker.register(1, now + Duration::from_millis(300));
        tracker.register(2, now);
        assert_eq!(tracker.next_deadline(), Some(now + TIMEOUT));
    }

    #[test]
    fn test_timer_restarts_on_retransmit() {
        let start = Instant::now();
        let mut tracker = RetransmitTracker::new(TIMEOUT, 3);
        tracker.register(2, start);

        let first = start + TIMEOUT;
        assert_eq!(tracker.expired(first).unwrap(), vec![2]);
        assert!(tracker.expired(first + Duration::from_millis(500)).unwrap().is_empty());
    }
}
