// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Monotonic time primitives.
//!
//! All protocol math is performed on [`Timestamp`]s handed in by the
//! caller. Nothing in the core crates reads the system clock, which keeps
//! recovery and timer logic deterministic under test.

use core::{fmt, ops, time::Duration};

/// Millisecond granularity floor used by loss recovery timers
pub const K_GRANULARITY: Duration = Duration::from_millis(1);

/// A point in time, measured as the duration since the owning clock's epoch.
///
/// Timestamps from different clocks must never be mixed; the arithmetic
/// here assumes a single monotonic source per endpoint.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Timestamp(Duration);

impl Timestamp {
    #[inline]
    pub const fn from_duration(duration: Duration) -> Self {
        Self(duration)
    }

    #[inline]
    pub const fn as_duration(self) -> Duration {
        self.0
    }

    /// Time elapsed since `earlier`, or zero if `earlier` is in the future
    #[inline]
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        self.0.saturating_sub(earlier.0)
    }

    #[inline]
    pub fn checked_add(self, duration: Duration) -> Option<Self> {
        self.0.checked_add(duration).map(Self)
    }

    #[inline]
    pub fn checked_sub(self, duration: Duration) -> Option<Self> {
        self.0.checked_sub(duration).map(Self)
    }

    /// Whether `self` has passed at the instant `now`
    #[inline]
    pub fn has_elapsed(self, now: Self) -> bool {
        self <= now
    }
}

impl ops::Add<Duration> for Timestamp {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs)
    }
}

impl ops::AddAssign<Duration> for Timestamp {
    #[inline]
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs;
    }
}

impl ops::Sub for Timestamp {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Self) -> Duration {
        self.0 - rhs.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// A source of monotonic [`Timestamp`]s
pub trait Clock {
    fn get_time(&self) -> Timestamp;
}

impl<C: Clock> Clock for &C {
    #[inline]
    fn get_time(&self) -> Timestamp {
        (**self).get_time()
    }
}

/// A single armed deadline.
///
/// Cancellation is idempotent and cancelling an already-fired timer is a
/// no-op, matching the endpoint-wide timer contract.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timer {
    deadline: Option<Timestamp>,
}

impl Timer {
    #[inline]
    pub fn set(&mut self, deadline: Timestamp) {
        self.deadline = Some(deadline);
    }

    #[inline]
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    #[inline]
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    #[inline]
    pub fn deadline(&self) -> Option<Timestamp> {
        self.deadline
    }

    /// Returns `true` if the timer is armed and the deadline has passed
    #[inline]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        matches!(self.deadline, Some(deadline) if deadline.has_elapsed(now))
    }

    /// Disarms and reports an expired timer; `false` leaves the timer armed
    #[inline]
    pub fn poll_expiration(&mut self, now: Timestamp) -> bool {
        if self.is_expired(now) {
            self.deadline = None;
            true
        } else {
            false
        }
    }

    /// Re-arms the timer only if the new deadline is earlier
    #[inline]
    pub fn set_min(&mut self, deadline: Timestamp) {
        match self.deadline {
            Some(current) if current <= deadline => {}
            _ => self.deadline = Some(deadline),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_test() {
        let mut timer = Timer::default();
        let start = Timestamp::from_duration(Duration::from_millis(100));
        assert!(!timer.is_armed());
        assert!(!timer.poll_expiration(start));

        timer.set(start + Duration::from_millis(25));
        assert!(timer.is_armed());
        assert!(!timer.poll_expiration(start));
        assert!(timer.poll_expiration(start + Duration::from_millis(25)));
        // already fired, polling again is a no-op
        assert!(!timer.poll_expiration(start + Duration::from_millis(25)));

        // cancelling an unarmed timer is a no-op
        timer.cancel();
        assert!(!timer.is_armed());
    }

    #[test]
    fn set_min_test() {
        let mut timer = Timer::default();
        let base = Timestamp::from_duration(Duration::from_millis(10));
        timer.set_min(base + Duration::from_millis(50));
        timer.set_min(base + Duration::from_millis(20));
        assert_eq!(timer.deadline(), Some(base + Duration::from_millis(20)));
        timer.set_min(base + Duration::from_millis(40));
        assert_eq!(timer.deadline(), Some(base + Duration::from_millis(20)));
    }
}
