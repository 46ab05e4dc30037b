//! Unhandled-rejection bookkeeping.
//!
//! A deferred that is rejected while nothing has ever attached a reaction to
//! it is recorded here. At the next microtask checkpoint the record is
//! re-checked: if a reaction was attached in the meantime the rejection is
//! considered handled, otherwise it is reported exactly once.

use loop_types::TaskError;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

struct PendingRejection {
    deferred: u64,
    reason: String,
    // Shared with the deferred, so it outlives it. `None` for a rejection
    // that reached a deferred nobody holds.
    observed: Option<Rc<Cell<bool>>>,
}

#[derive(Default)]
pub(crate) struct RejectionTracker {
    pending: RefCell<Vec<PendingRejection>>,
}

impl RejectionTracker {
    pub(crate) fn track(&self, deferred: u64, reason: String, observed: Rc<Cell<bool>>) {
        self.pending.borrow_mut().push(PendingRejection {
            deferred,
            reason,
            observed: Some(observed),
        });
    }

    /// Records a rejection that was propagated into a deferred nobody holds.
    pub(crate) fn track_orphan(&self, deferred: u64, reason: String) {
        self.pending.borrow_mut().push(PendingRejection {
            deferred,
            reason,
            observed: None,
        });
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    /// Clears every record, returning the ones still unobserved.
    pub(crate) fn take_unhandled(&self) -> Vec<TaskError> {
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        pending
            .into_iter()
            .filter(|record| !record.observed.as_ref().is_some_and(|flag| flag.get()))
            .map(|record| TaskError::UnhandledRejection {
                deferred: record.deferred,
                reason: record.reason,
            })
            .collect()
    }
}
