//! Error types for scheduling and task execution.
//!
//! Two families exist:
//! - [`QueueError`] is returned synchronously to whoever asked for work to be
//!   queued or cancelled.
//! - [`TaskError`] is a diagnostic. It is never returned from a scheduling call;
//!   the event loop hands it to the registered diagnostic hooks instead.

use crate::{TaskHandle, TaskKind};
use std::any::Any;
use thiserror::Error;

/// Errors raised while queueing, cancelling or handing off work.
///
/// # Examples
///
/// ```
/// use loop_types::{QueueError, TaskKind};
///
/// let err = QueueError::QueueOverflow { kind: TaskKind::Microtask, capacity: 8 };
/// assert_eq!(err.to_string(), "microtask queue is full (capacity 8)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The handle is unknown, already executed, cancelled, or from an older
    /// generation of its slot.
    #[error("invalid or stale task handle {0}")]
    InvalidHandle(TaskHandle),

    /// A bounded queue refused new work.
    #[error("{kind} queue is full (capacity {capacity})")]
    QueueOverflow {
        /// The queue that refused the work.
        kind: TaskKind,
        /// The configured capacity.
        capacity: usize,
    },

    /// The event loop that owned the handoff channel has been dropped.
    #[error("event loop has shut down")]
    LoopClosed,
}

/// Diagnostics reported through the event loop's hooks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// A callback panicked. The loop caught the panic and carried on.
    #[error("{kind} callback panicked: {message}")]
    CallbackPanic {
        /// Which queue the callback came from.
        kind: TaskKind,
        /// The panic message, if the payload carried one.
        message: String,
    },

    /// A deferred was rejected and nothing ever consumed the rejection.
    #[error("unhandled rejection of deferred #{deferred}: {reason}")]
    UnhandledRejection {
        /// Identifier of the rejected deferred.
        deferred: u64,
        /// `Debug` rendering of the rejection value.
        reason: String,
    },
}

impl TaskError {
    /// Builds a [`TaskError::CallbackPanic`] from a `catch_unwind` payload.
    pub fn from_panic(kind: TaskKind, payload: &(dyn Any + Send)) -> Self {
        TaskError::CallbackPanic {
            kind,
            message: panic_message(payload),
        }
    }

    /// Returns true for [`TaskError::UnhandledRejection`].
    pub fn is_unhandled_rejection(&self) -> bool {
        matches!(self, TaskError::UnhandledRejection { .. })
    }
}

/// Extracts the message carried by a panic payload.
///
/// `panic!("...")` payloads are `&'static str` or `String`; anything else is
/// reported as an opaque payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
