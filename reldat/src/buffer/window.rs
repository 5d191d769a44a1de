//! Sliding send window.
//!
//! Chunks are transmitted while their index lies in `[base, base + window)`.
//! The base only slides when the smallest outstanding frame is acknowledged,
//! so out-of-order acknowledgments free their timers without moving it.

use std::time::Duration;

use log::{debug, trace};
use tokio::time::Instant;

use crate::core::Frame;
use crate::error::Result;
use crate::reliable::RetransmitTracker;

/// Result of feeding an acknowledgment to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Matched the smallest outstanding frame; the base moved by one.
    Advanced,

    /// Matched an outstanding frame other than the smallest.
    Acknowledged,

    /// Matched the outstanding end-of-data frame.
    EndOfData,

    /// Matched nothing outstanding (late or duplicate acknowledgment).
    Unmatched,
}

/// Send side of one exchange.
#[derive(Debug)]
pub struct SendWindow {
    chunks: Vec<Frame>,
    base: usize,
    next: usize,
    window: usize,
    tracker: RetransmitTracker,
    eod: Option<Frame>,
}

impl SendWindow {
    /// Creates an empty window bounded by the peer's advertised size.
    pub fn new(window: u32, timeout: Duration, max_retransmissions: u32) -> Self {
        Self {
            chunks: Vec::new(),
            base: 0,
            next: 0,
            window: window.max(1) as usize,
            tracker: RetransmitTracker::new(timeout, max_retransmissions),
            eod: None,
        }
    }

    /// Appends a data frame behind the ones already queued.
    pub fn push(&mut self, frame: Frame) {
        self.chunks.push(frame);
    }

    /// Returns the next frame the window allows on the wire, starting its timer.
    pub fn next_transmission(&mut self, now: Instant) -> Option<Frame> {
        if self.next >= self.chunks.len() || self.next >= self.base + self.window {
            return None;
        }

        let frame = self.chunks[self.next].clone();
        self.tracker.register(frame.sequence, now);
        self.next += 1;
        Some(frame)
    }

    /// Returns RETRANSMIT-flagged copies of every frame whose timer expired.
    pub fn retransmissions(&mut self, now: Instant) -> Result<Vec<Frame>> {
        let due = self.tracker.expired(now)?;
        let mut frames = Vec::with_capacity(due.len());

        for sequence in due {
            let sent = &self.chunks[self.base..self.next];
            let frame = sent
                .iter()
                .find(|f| f.sequence == sequence)
                .or(self.eod.as_ref().filter(|f| f.sequence == sequence));

            if let Some(frame) = frame {
                frames.push(frame.retransmission());
            }
        }

        Ok(frames)
    }

    /// Feeds an acknowledgment number.
    pub fn acknowledge(&mut self, ack: u32) -> AckOutcome {
        let smallest = self.tracker.smallest();
        if self.tracker.acknowledge(ack).is_none() {
            return AckOutcome::Unmatched;
        }

        if self.eod.as_ref().is_some_and(|f| f.sequence == ack) {
            debug!("end-of-data {} acknowledged", ack);
            return AckOutcome::EndOfData;
        }

        if smallest == Some(ack) && self.base < self.chunks.len() {
            self.base += 1;
            trace!("send base -> {}", self.base);
            AckOutcome::Advanced
        } else {
            AckOutcome::Acknowledged
        }
    }

    /// True once every chunk has been transmitted and acknowledged and the
    /// end-of-data frame has not gone out yet.
    pub fn ready_for_eod(&self) -> bool {
        self.eod.is_none() && self.next == self.chunks.len() && self.tracker.is_empty()
    }

    /// Records the end-of-data frame as sent and starts its timer.
    pub fn send_eod(&mut self, frame: Frame, now: Instant) {
        self.tracker.register(frame.sequence, now);
        self.eod = Some(frame);
    }

    /// Returns true if the end-of-data frame went out.
    pub fn eod_sent(&self) -> bool {
        self.eod.is_some()
    }

    /// Returns true once the end-of-data frame has been acknowledged.
    pub fn eod_acknowledged(&self) -> bool {
        self.eod
            .as_ref()
            .is_some_and(|f| !self.tracker.contains(f.sequence))
    }

    /// Earliest instant at which an outstanding frame times out.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tracker.next_deadline()
    }

    /// Returns true if nothing is waiting to be sent or acknowledged.
    pub fn is_idle(&self) -> bool {
        self.next == self.chunks.len() && self.tracker.is_empty()
    }

    /// Index of the oldest chunk not yet known to be delivered in order.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Number of queued chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn window_with(count: u32, window: u32) -> SendWindow {
        let mut w = SendWindow::new(window, TIMEOUT, 3);
        for seq in 0..count {
            w.push(Frame::data(seq, vec![seq as u8]));
        }
        w
    }

    #[test]
    fn test_window_bounds_transmission() {
        let now = Instant::now();
        let mut w = window_with(5, 2);

        assert_eq!(w.next_transmission(now).unwrap().sequence, 0);
        assert_eq!(w.next_transmission(now).unwrap().sequence, 1);
        assert!(w.next_transmission(now).is_none());

        assert_eq!(w.acknowledge(0), AckOutcome::Advanced);
        assert_eq!(w.next_transmission(now).unwrap().sequence, 2);
        assert!(w.next_transmission(now).is_none());
    }

    #[test]
    fn test_out_of_order_ack_holds_base() {
        let now = Instant::now();
        let mut w = window_with(2, 2);
        w.next_transmission(now);
        w.next_transmission(now);

        assert_eq!(w.acknowledge(1), AckOutcome::Acknowledged);
        assert_eq!(w.base(), 0);

        assert_eq!(w.acknowledge(0), AckOutcome::Advanced);
        assert_eq!(w.base(), 1);
    }

    #[test]
    fn test_unmatched_ack() {
        let now = Instant::now();
        let mut w = window_with(1, 4);
        w.next_transmission(now);

        assert_eq!(w.acknowledge(7), AckOutcome::Unmatched);
        assert_eq!(w.acknowledge(0), AckOutcome::Advanced);
        assert_eq!(w.acknowledge(0), AckOutcome::Unmatched);
    }

    #[test]
    fn test_retransmissions_are_flagged() {
        let now = Instant::now();
        let mut w = window_with(2, 2);
        w.next_transmission(now);
        w.next_transmission(now);
        w.acknowledge(0);

        let frames = w.retransmissions(now + TIMEOUT).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 1);
        assert!(frames[0].is_retransmit());
    }

    #[test]
    fn test_eod_after_all_acknowledged() {
        let now = Instant::now();
        let mut w = window_with(2, 2);
        w.next_transmission(now);
        w.next_transmission(now);
        assert!(!w.ready_for_eod());

        w.acknowledge(1);
        w.acknowledge(0);
        // Base trails the end but everything is delivered.
        assert_eq!(w.base(), 1);
        assert!(w.ready_for_eod());

        w.send_eod(Frame::eod(2), now);
        assert!(!w.ready_for_eod());
        assert!(!w.eod_acknowledged());

        let frames = w.retransmissions(now + TIMEOUT).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_eod() && frames[0].is_retransmit());

        assert_eq!(w.acknowledge(2), AckOutcome::EndOfData);
        assert!(w.eod_acknowledged());
    }

    #[test]
    fn test_empty_payload_is_ready_for_eod() {
        let w = SendWindow::new(4, TIMEOUT, 3);
        assert!(w.ready_for_eod());
        assert!(w.is_idle());
    }
}
