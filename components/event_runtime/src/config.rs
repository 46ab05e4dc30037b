//! Event loop configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which clock an event loop built from a [`LoopConfig`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockMode {
    /// Monotonic wall time; idle waits really sleep.
    #[default]
    Wall,
    /// Deterministic virtual time; idle waits jump the clock.
    Virtual,
}

/// Tunables for an [`EventLoop`](crate::EventLoop).
///
/// Every field has a default, so a JSON document only needs to name the
/// fields it changes.
///
/// # Examples
///
/// ```
/// use event_runtime::{ClockMode, LoopConfig};
///
/// let config = LoopConfig::from_json_str(r#"{ "clock": "virtual", "microtask_capacity": 64 }"#)
///     .unwrap();
/// assert_eq!(config.clock, ClockMode::Virtual);
/// assert_eq!(config.microtask_capacity, Some(64));
/// assert_eq!(config.macrotask_capacity, None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Clock used by [`EventLoop::from_config`](crate::EventLoop::from_config).
    pub clock: ClockMode,
    /// Upper bound on microtasks queued through `queue_microtask`.
    pub microtask_capacity: Option<usize>,
    /// Upper bound on live (scheduled, not yet run or cancelled) macrotasks.
    pub macrotask_capacity: Option<usize>,
    /// Shortest allowed period for repeating macrotasks, in milliseconds.
    pub min_interval_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            clock: ClockMode::Wall,
            microtask_capacity: None,
            macrotask_capacity: None,
            min_interval_ms: 1,
        }
    }
}

impl LoopConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Selects the clock mode.
    pub fn with_clock(mut self, clock: ClockMode) -> Self {
        self.clock = clock;
        self
    }

    /// Bounds the microtask queue.
    pub fn with_microtask_capacity(mut self, capacity: usize) -> Self {
        self.microtask_capacity = Some(capacity);
        self
    }

    /// Bounds the macrotask queue.
    pub fn with_macrotask_capacity(mut self, capacity: usize) -> Self {
        self.macrotask_capacity = Some(capacity);
        self
    }

    /// Sets the minimum repeating-task period.
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval_ms = min_interval.as_millis().min(u128::from(u64::MAX)) as u64;
        self
    }

    /// The minimum repeating-task period as a [`Duration`].
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}
