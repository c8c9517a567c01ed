//! Signal queue: timestamp-ordered intake with (symbol, side) deduplication
//!
//! Signals are released strictly at or after their timestamp, so a strategy
//! can never act on a price it has not observed yet. Duplicates of the same
//! (symbol, side) inside the dedupe window are dropped on insert.

use crate::{Side, Signal, Symbol};
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use tracing::debug;

/// Timestamp-ordered signal queue with a dedupe window
pub struct SignalQueue {
    dedupe_window: Duration,

    queue: VecDeque<Signal>,
    /// (symbol, side, timestamp) of recently accepted signals
    recent: Vec<(Symbol, Side, DateTime<Utc>)>,

    accepted: usize,
    rejected: usize,
}

impl SignalQueue {
    pub fn new(dedupe_window_seconds: i64) -> Self {
        Self {
            dedupe_window: Duration::seconds(dedupe_window_seconds),
            queue: VecDeque::new(),
            recent: Vec::new(),
            accepted: 0,
            rejected: 0,
        }
    }

    /// Queue a signal; false when rejected as a duplicate
    pub fn push(&mut self, signal: Signal) -> bool {
        if self.is_duplicate(&signal) {
            debug!("duplicate signal ignored: {} {}", signal.symbol, signal.side);
            self.rejected += 1;
            return false;
        }

        self.recent
            .push((signal.symbol.clone(), signal.side, signal.timestamp));

        debug!(
            "signal queued: {} {} @ {}",
            signal.symbol, signal.side, signal.timestamp
        );

        self.queue.push_back(signal);
        self.accepted += 1;

        true
    }

    /// Bulk insert; sorts by timestamp first so file-loaded signals drain in
    /// order. Returns the number accepted.
    pub fn extend(&mut self, mut signals: Vec<Signal>) -> usize {
        signals.sort_by_key(|s| s.timestamp);

        let mut added = 0;
        for signal in signals {
            if self.push(signal) {
                added += 1;
            }
        }
        added
    }

    /// Release all signals with timestamp <= `timestamp`, in (timestamp,
    /// insertion) order
    pub fn drain_until(&mut self, timestamp: DateTime<Utc>) -> Vec<Signal> {
        let mut released = Vec::new();

        while let Some(front) = self.queue.front() {
            if front.timestamp <= timestamp {
                released.push(self.queue.pop_front().expect("front present"));
            } else {
                break;
            }
        }

        released
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn peek_next_time(&self) -> Option<DateTime<Utc>> {
        self.queue.front().map(|s| s.timestamp)
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected
    }

    fn is_duplicate(&mut self, signal: &Signal) -> bool {
        // Prune tracking entries that fell out of the window
        let cutoff = signal.timestamp - self.dedupe_window;
        self.recent.retain(|(_, _, ts)| *ts >= cutoff);

        self.recent.iter().any(|(symbol, side, ts)| {
            symbol == &signal.symbol
                && *side == signal.side
                && (*ts - signal.timestamp).abs() < self.dedupe_window
        })
    }
}
