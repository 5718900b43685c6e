// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The per-loop timer wheel: an ordered map from deadline to callback
//! token.
//!
//! Deadlines are served strictly in order and never early. Cancellation
//! is idempotent, and cancelling a timer which already fired is a no-op.

use quiver_core::time::Timestamp;
use std::collections::{BTreeMap, HashMap};

/// Stable identifier for a scheduled timer
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct TimerId(u64);

/// The opaque value handed back when a timer fires
pub type Token = u64;

#[derive(Debug, Default)]
pub struct TimerWheel {
    /// (deadline, id) keys give FIFO order among equal deadlines
    entries: BTreeMap<(Timestamp, TimerId), Token>,
    /// Reverse index for cancellation
    deadlines: HashMap<TimerId, Timestamp>,
    next_id: u64,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `token` to fire at `deadline`
    pub fn insert(&mut self, deadline: Timestamp, token: Token) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.insert((deadline, id), token);
        self.deadlines.insert(id, deadline);
        id
    }

    /// Cancels a timer; unknown or already-fired ids are no-ops
    pub fn cancel(&mut self, id: TimerId) {
        if let Some(deadline) = self.deadlines.remove(&id) {
            self.entries.remove(&(deadline, id));
        }
    }

    /// Replaces a timer's deadline, keeping its token
    pub fn reschedule(&mut self, id: TimerId, deadline: Timestamp) -> Option<TimerId> {
        let old_deadline = self.deadlines.remove(&id)?;
        let token = self.entries.remove(&(old_deadline, id))?;
        Some(self.insert(deadline, token))
    }

    /// The earliest scheduled deadline
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.entries
            .keys()
            .next()
            .map(|(deadline, _)| *deadline)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fires every timer whose deadline has passed, in deadline order
    pub fn run<F: FnMut(Token)>(&mut self, now: Timestamp, mut fire: F) {
        loop {
            let Some((&(deadline, id), _)) = self.entries.first_key_value() else {
                return;
            };
            if !deadline.has_elapsed(now) {
                return;
            }
            let token = self
                .entries
                .remove(&(deadline, id))
                .expect("key just observed");
            self.deadlines.remove(&id);
            fire(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;

    fn at(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    #[test]
    fn fire_in_order_test() {
        let mut wheel = TimerWheel::new();
        wheel.insert(at(30), 3);
        wheel.insert(at(10), 1);
        wheel.insert(at(20), 2);
        assert_eq!(wheel.next_deadline(), Some(at(10)));

        let mut fired = Vec::new();
        wheel.run(at(20), |token| fired.push(token));
        assert_eq!(fired, vec![1, 2]);
        assert_eq!(wheel.next_deadline(), Some(at(30)));

        // deadlines are never served early
        wheel.run(at(29), |token| fired.push(token));
        assert_eq!(fired, vec![1, 2]);
        wheel.run(at(30), |token| fired.push(token));
        assert_eq!(fired, vec![1, 2, 3]);
        assert!(wheel.is_empty());
    }

    #[test]
    fn cancel_idempotent_test() {
        let mut wheel = TimerWheel::new();
        let id = wheel.insert(at(10), 7);
        wheel.cancel(id);
        wheel.cancel(id);

        let mut fired = Vec::new();
        wheel.run(at(100), |token| fired.push(token));
        assert!(fired.is_empty());
    }

    #[test]
    fn cancel_after_fire_is_noop_test() {
        let mut wheel = TimerWheel::new();
        let id = wheel.insert(at(10), 7);
        let mut fired = Vec::new();
        wheel.run(at(10), |token| fired.push(token));
        assert_eq!(fired, vec![7]);
        // the id already fired; cancelling resolves as a no-op
        wheel.cancel(id);
    }

    #[test]
    fn equal_deadlines_fifo_test() {
        let mut wheel = TimerWheel::new();
        wheel.insert(at(5), 1);
        wheel.insert(at(5), 2);
        wheel.insert(at(5), 3);
        let mut fired = Vec::new();
        wheel.run(at(5), |token| fired.push(token));
        assert_eq!(fired, vec![1, 2, 3]);
    }

    #[test]
    fn reschedule_test() {
        let mut wheel = TimerWheel::new();
        let id = wheel.insert(at(50), 9);
        let id = wheel.reschedule(id, at(5)).unwrap();
        assert_eq!(wheel.next_deadline(), Some(at(5)));
        wheel.cancel(id);
        assert!(wheel.is_empty());
    }
}
