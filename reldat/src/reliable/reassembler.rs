//! Out-of-order reassembly of inbound data frames.
//!
//! The buffer holds one slot per sequence number in
//! `[base, base + window)`. Filling the buffer, or receiving a frame that
//! belongs to the following window, flushes the slots in order into the
//! output and moves the base forward by exactly one window. Slots still
//! empty when their window is flushed are remembered as holes: a late frame
//! for one of them can no longer be delivered in order.

use std::collections::BTreeSet;
use std::mem;

use log::trace;

use crate::error::{Error, Result};

/// What happened to an accepted data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    /// Stored in its slot.
    Stored,

    /// Its slot was already occupied; the new copy was dropped.
    Duplicate,

    /// It precedes the base, so its window was already flushed.
    Stale,

    /// It precedes the base and its slot was flushed empty.
    Skipped,
}

/// Fixed-capacity receive buffer.
#[derive(Debug)]
pub struct Reassembler {
    slots: Vec<Option<Vec<u8>>>,
    base: u32,
    filled: usize,
    holes: BTreeSet<u32>,
    output: Vec<u8>,
}

impl Reassembler {
    /// Creates a buffer of `window` slots whose first slot is `base`.
    pub fn new(window: u32, base: u32) -> Self {
        Self {
            slots: vec![None; window.max(1) as usize],
            base,
            filled: 0,
            holes: BTreeSet::new(),
            output: Vec::new(),
        }
    }

    /// Places the payload of data frame `sequence`.
    ///
    /// Sequences two or more windows past the base are rejected with
    /// [`Error::WindowOverrun`] and leave the buffer untouched.
    pub fn accept(&mut self, sequence: u32, payload: &[u8]) -> Result<Accepted> {
        if sequence < self.base {
            if self.holes.contains(&sequence) {
                return Ok(Accepted::Skipped);
            }
            return Ok(Accepted::Stale);
        }

        let window = self.slots.len();
        let mut slot = (sequence - self.base) as usize;

        if slot >= 2 * window {
            return Err(Error::WindowOverrun {
                sequence,
                base: self.base,
            });
        }

        if slot >= window {
            self.slide();
            slot -= window;
        }

        if self.slots[slot].is_some() {
            return Ok(Accepted::Duplicate);
        }

        self.slots[slot] = Some(payload.to_vec());
        self.filled += 1;
        trace!("stored {} in slot {}", sequence, slot);

        if self.filled == window {
            self.slide();
        }

        Ok(Accepted::Stored)
    }

    /// Moves every buffered payload, in slot order, to the output.
    pub fn flush(&mut self) {
        for slot in self.slots.iter_mut() {
            if let Some(payload) = slot.take() {
                self.output.extend_from_slice(&payload);
            }
        }
        self.filled = 0;
    }

    fn slide(&mut self) {
        for (offset, slot) in self.slots.iter().enumerate() {
            if slot.is_none() {
                self.holes.insert(self.base.wrapping_add(offset as u32));
            }
        }
        self.flush();
        self.base = self.base.wrapping_add(self.slots.len() as u32);
        trace!("receive base -> {}", self.base);
    }

    /// Takes the data flushed so far, leaving the buffer in place.
    pub fn take_output(&mut self) -> Vec<u8> {
        mem::take(&mut self.output)
    }

    /// Sequence number of the first slot.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Number of occupied slots.
    pub fn buffered(&self) -> usize {
        self.filled
    }

    /// Returns true if no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }
}
