//! Unit tests for the error taxonomy

use loop_types::{QueueError, TaskError, TaskHandle, TaskKind};
use std::error::Error;

#[test]
fn invalid_handle_names_the_handle() {
    let err = QueueError::InvalidHandle(TaskHandle::new(7, 3));
    assert_eq!(err.to_string(), "invalid or stale task handle task#7v3");
}

#[test]
fn overflow_reports_queue_and_capacity() {
    let err = QueueError::QueueOverflow {
        kind: TaskKind::Macrotask,
        capacity: 2,
    };
    assert_eq!(err.to_string(), "macrotask queue is full (capacity 2)");
}

#[test]
fn loop_closed_message() {
    assert_eq!(QueueError::LoopClosed.to_string(), "event loop has shut down");
}

#[test]
fn queue_error_is_std_error() {
    let err: Box<dyn Error> = Box::new(QueueError::LoopClosed);
    assert!(err.source().is_none());
}

#[test]
fn callback_panic_from_payload() {
    let payload = std::panic::catch_unwind(|| panic!("task blew up")).unwrap_err();
    let err = TaskError::from_panic(TaskKind::Microtask, payload.as_ref());

    assert_eq!(
        err,
        TaskError::CallbackPanic {
            kind: TaskKind::Microtask,
            message: "task blew up".to_string(),
        }
    );
    assert!(!err.is_unhandled_rejection());
}

#[test]
fn unhandled_rejection_display() {
    let err = TaskError::UnhandledRejection {
        deferred: 4,
        reason: "\"timeout\"".to_string(),
    };
    assert!(err.is_unhandled_rejection());
    assert_eq!(
        err.to_string(),
        "unhandled rejection of deferred #4: \"timeout\""
    );
}
