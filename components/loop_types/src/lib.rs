//! Shared value and error types for the cooperative event loop.
//!
//! This crate holds the small, dependency-free vocabulary that the scheduler
//! and its callers exchange.
//!
//! # Overview
//!
//! - [`Instant`] - Point on a scheduler clock (nanoseconds since its epoch)
//! - [`TaskHandle`] - Generation-checked identifier of a scheduled macrotask
//! - [`TaskKind`] - Which queue a unit of work came from
//! - [`QueueError`] - Errors returned when queueing or cancelling work
//! - [`TaskError`] - Diagnostics reported through the loop's hooks
//!
//! # Examples
//!
//! ```
//! use loop_types::{Instant, QueueError, TaskHandle};
//! use std::time::Duration;
//!
//! let due = Instant::ZERO + Duration::from_millis(10);
//! assert_eq!(due.as_millis(), 10);
//!
//! let err = QueueError::InvalidHandle(TaskHandle::new(0, 2));
//! assert_eq!(err.to_string(), "invalid or stale task handle task#0v2");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod handle;
mod time;

pub use error::{panic_message, QueueError, TaskError};
pub use handle::{TaskHandle, TaskKind};
pub use time::Instant;
