// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Protocol timer management.
//!
//! All protocol timers live in one priority queue. Timers fire in
//! non-decreasing deadline order; timers with the same deadline fire in the
//! order they were scheduled. Re-arming a timer replaces its deadline, and
//! cancelling a timer that is not armed does nothing.
//!
//! The queue never reads a clock: callers pass `now` in, so the same queue
//! serves the virtual-time simulation and the tokio runtime.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

use crate::protocols::{TimerKind, TimerRequest};

/// A scheduled timer with its fire time and kind
#[derive(Debug, Clone)]
struct ScheduledTimer {
    fire_at: Instant,
    seq: u64,
    kind: TimerKind,
}

impl PartialEq for ScheduledTimer {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl Eq for ScheduledTimer {}

impl PartialOrd for ScheduledTimer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTimer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Priority queue of protocol timers
///
/// Stale heap entries left behind by cancel or re-arm are skipped when they
/// reach the top; `armed` is the source of truth.
#[derive(Debug, Default)]
pub struct TimerQueue {
    /// Pending timers sorted by fire time, then scheduling order
    timers: BinaryHeap<Reverse<ScheduledTimer>>,
    /// Live deadline and sequence number of every armed timer
    armed: HashMap<TimerKind, (Instant, u64)>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a batch of requests in order
    pub fn apply(&mut self, requests: impl IntoIterator<Item = TimerRequest>) {
        for request in requests {
            match request {
                TimerRequest::Start { kind, fire_at } => self.schedule(kind, fire_at),
                TimerRequest::Cancel { kind } => {
                    self.cancel(&kind);
                }
            }
        }
    }

    /// Arm a timer, replacing any deadline it already has
    pub fn schedule(&mut self, kind: TimerKind, fire_at: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.armed.insert(kind, (fire_at, seq));
        self.timers.push(Reverse(ScheduledTimer { fire_at, seq, kind }));
    }

    /// Disarm a timer; returns whether it was armed
    pub fn cancel(&mut self, kind: &TimerKind) -> bool {
        let was_armed = self.armed.remove(kind).is_some();
        if self.armed.is_empty() {
            self.timers.clear();
        }
        was_armed
    }

    /// Pop the earliest timer due at or before `now`
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerKind, Instant)> {
        self.discard_stale();
        let Reverse(next) = self.timers.peek()?;
        if next.fire_at > now {
            return None;
        }
        let Reverse(timer) = self.timers.pop()?;
        self.armed.remove(&timer.kind);
        Some((timer.kind, timer.fire_at))
    }

    /// Deadline of the earliest armed timer
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.discard_stale();
        self.timers.peek().map(|Reverse(timer)| timer.fire_at)
    }

    /// Deadline of one timer, if armed
    pub fn deadline(&self, kind: &TimerKind) -> Option<Instant> {
        self.armed.get(kind).map(|(fire_at, _)| *fire_at)
    }

    pub fn is_armed(&self, kind: &TimerKind) -> bool {
        self.armed.contains_key(kind)
    }

    /// Number of armed timers
    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    /// Armed timers, in no particular order
    pub fn armed(&self) -> impl Iterator<Item = (&TimerKind, Instant)> {
        self.armed.iter().map(|(kind, (fire_at, _))| (kind, *fire_at))
    }

    fn discard_stale(&mut self) {
        while let Some(Reverse(top)) = self.timers.peek() {
            let live = self.armed.get(&top.kind).is_some_and(|(_, seq)| *seq == top.seq);
            if live {
                break;
            }
            self.timers.pop();
        }
    }
}
