//! Time sources for the event loop.
//!
//! The loop reads time through the [`Clock`] trait so that production code can
//! run against the monotonic wall clock while tests run against a
//! [`VirtualClock`] that only moves when told to.

use loop_types::Instant;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A monotonic time source.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time.
    fn now(&self) -> Instant;

    /// Moves the clock forward to `deadline` if this clock can be moved by hand.
    ///
    /// Returns `false` for clocks that track real time; the caller has to wait
    /// instead. Moving to a time in the past is a no-op that still returns `true`.
    fn advance_to(&self, deadline: Instant) -> bool;

    /// Returns true when time only moves through [`Clock::advance_to`].
    fn is_virtual(&self) -> bool;
}

/// Production clock backed by [`std::time::Instant`].
///
/// The epoch is the moment the clock was created.
#[derive(Debug)]
pub struct WallClock {
    epoch: std::time::Instant,
}

impl WallClock {
    /// Creates a wall clock whose epoch is now.
    pub fn new() -> Self {
        Self {
            epoch: std::time::Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WallClock {
    fn now(&self) -> Instant {
        Instant::ZERO + self.epoch.elapsed()
    }

    fn advance_to(&self, _deadline: Instant) -> bool {
        false
    }

    fn is_virtual(&self) -> bool {
        false
    }
}

/// Deterministic clock for tests and simulations.
///
/// # Examples
///
/// ```
/// use event_runtime::{Clock, VirtualClock};
/// use loop_types::Instant;
/// use std::time::Duration;
///
/// let clock = VirtualClock::new();
/// assert_eq!(clock.now(), Instant::ZERO);
///
/// clock.advance(Duration::from_millis(250));
/// assert_eq!(clock.now(), Instant::from_millis(250));
/// ```
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: AtomicU64,
}

impl VirtualClock {
    /// Creates a virtual clock at [`Instant::ZERO`].
    pub fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
        }
    }

    /// Creates a virtual clock starting at `time`.
    pub fn starting_at(time: Instant) -> Self {
        Self {
            now: AtomicU64::new(time.as_nanos()),
        }
    }

    /// Moves time forward by `by`.
    pub fn advance(&self, by: Duration) {
        let nanos = by.as_nanos().min(u128::from(u64::MAX)) as u64;
        let _ = self
            .now
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(nanos))
            });
    }

    /// Sets the current time, including backwards. Intended for test setup only.
    pub fn set(&self, time: Instant) {
        self.now.store(time.as_nanos(), Ordering::Release);
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Instant {
        Instant::from_nanos(self.now.load(Ordering::Acquire))
    }

    fn advance_to(&self, deadline: Instant) -> bool {
        self.now.fetch_max(deadline.as_nanos(), Ordering::AcqRel);
        true
    }

    fn is_virtual(&self) -> bool {
        true
    }
}
