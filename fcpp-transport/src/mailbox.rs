//! A per-device inbox: append-only until drained.
//!
//! Shared via `Arc<Mutex<..>>` the way the donor's process allocator shares
//! its channel table (`allocator/process.rs`), since both the simulated and
//! real connectors hand mailbox handles to code running off the main
//! scheduling thread (a parallel-batch round, or the real connector's
//! background receive loop).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::{Time, Uid};

/// One arrival: the sender, the time it was sent, and its raw payload.
pub type Arrival = (Uid, Time, Vec<u8>);

/// A thread-safe FIFO of arrivals for one device.
#[derive(Clone)]
pub struct Mailbox {
    queue: Arc<Mutex<VecDeque<Arrival>>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Mailbox { queue: Arc::new(Mutex::new(VecDeque::new())) }
    }

    /// Appends one arrival. Never blocks the sender on the receiver's pace.
    pub fn push(&self, arrival: Arrival) {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).push_back(arrival);
    }

    /// Removes and returns every arrival queued so far, oldest first.
    pub fn drain(&self) -> Vec<Arrival> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).drain(..).collect()
    }

    /// Number of arrivals currently queued.
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_and_preserves_order() {
        let mailbox = Mailbox::new();
        mailbox.push((1, Time(0.0), vec![1]));
        mailbox.push((2, Time(1.0), vec![2]));
        let drained = mailbox.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].0, 1);
        assert_eq!(drained[1].0, 2);
        assert!(mailbox.is_empty());
    }
}
