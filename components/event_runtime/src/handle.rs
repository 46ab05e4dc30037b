//! Shared loop state and the handle callbacks use to reach it.

use crate::clock::Clock;
use crate::event_loop::{LoopState, LoopStats};
use crate::rejection::RejectionTracker;
use crate::task_queue::{MacrotaskQueue, Microtask, MicrotaskQueue};
use loop_types::{Instant, QueueError, TaskHandle};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// State shared by the event loop, its handles and every deferred created on it.
pub(crate) struct LoopShared {
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) microtasks: MicrotaskQueue,
    pub(crate) macrotasks: RefCell<MacrotaskQueue>,
    pub(crate) rejections: RejectionTracker,
    pub(crate) stats: RefCell<LoopStats>,
    pub(crate) state: Cell<LoopState>,
    pub(crate) stop_requested: Cell<bool>,
    pub(crate) min_interval: Duration,
    next_deferred_id: Cell<u64>,
}

impl LoopShared {
    pub(crate) fn new(
        clock: Arc<dyn Clock>,
        microtasks: MicrotaskQueue,
        macrotasks: MacrotaskQueue,
        min_interval: Duration,
    ) -> Self {
        Self {
            clock,
            microtasks,
            macrotasks: RefCell::new(macrotasks),
            rejections: RejectionTracker::default(),
            stats: RefCell::new(LoopStats::default()),
            state: Cell::new(LoopState::Idle),
            stop_requested: Cell::new(false),
            min_interval,
            next_deferred_id: Cell::new(1),
        }
    }
}

/// A cloneable reference to an event loop's queues and clock.
///
/// Handles are how code running *inside* the loop schedules more work:
/// macrotask and microtask callbacks capture a handle, and every
/// [`Deferred`](crate::Deferred) keeps one to queue its reactions.
///
/// Handles are `!Send`; work from other threads goes through a
/// [`RemoteHandle`](crate::RemoteHandle).
///
/// # Examples
///
/// ```
/// use event_runtime::EventLoop;
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use std::time::Duration;
///
/// let mut event_loop = EventLoop::deterministic();
/// let handle = event_loop.handle();
/// let log = Rc::new(RefCell::new(Vec::new()));
///
/// let l = log.clone();
/// let h = handle.clone();
/// handle
///     .schedule_macrotask(Duration::ZERO, move || {
///         l.borrow_mut().push("macrotask");
///         let l = l.clone();
///         h.queue_microtask(move || l.borrow_mut().push("microtask")).unwrap();
///     })
///     .unwrap();
///
/// event_loop.run_until_idle();
/// assert_eq!(*log.borrow(), vec!["macrotask", "microtask"]);
/// ```
#[derive(Clone)]
pub struct LoopHandle {
    pub(crate) shared: Rc<LoopShared>,
}

impl LoopHandle {
    pub(crate) fn new(shared: LoopShared) -> Self {
        Self {
            shared: Rc::new(shared),
        }
    }

    /// Current time on the loop's clock.
    pub fn now(&self) -> Instant {
        self.shared.clock.now()
    }

    /// Schedules `callback` to run once, `delay` from now.
    ///
    /// Tasks with equal due times run in the order they were scheduled.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::QueueOverflow`] when the macrotask queue is full.
    pub fn schedule_macrotask<F>(&self, delay: Duration, callback: F) -> Result<TaskHandle, QueueError>
    where
        F: FnOnce() + 'static,
    {
        let due = self.now() + delay;
        let handle = self.shared.macrotasks.borrow_mut().schedule(due, callback)?;
        tracing::trace!(task = %handle, due = %due, "macrotask scheduled");
        Ok(handle)
    }

    /// Schedules `callback` to run every `period`, first after one period.
    ///
    /// Periods shorter than the configured minimum are raised to it. The
    /// returned handle cancels all future repetitions.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::QueueOverflow`] when the macrotask queue is full.
    pub fn set_interval<F>(&self, period: Duration, callback: F) -> Result<TaskHandle, QueueError>
    where
        F: FnMut() + 'static,
    {
        let period = period.max(self.shared.min_interval);
        let first_due = self.now() + period;
        let handle = self
            .shared
            .macrotasks
            .borrow_mut()
            .schedule_repeating(first_due, period, callback)?;
        tracing::debug!(task = %handle, period = ?period, "interval scheduled");
        Ok(handle)
    }

    /// Cancels a macrotask before it runs.
    ///
    /// Returns false if the task already ran, was already cancelled, or the
    /// handle is stale. A task that is currently running cannot be
    /// interrupted, but cancelling an interval from inside its own callback
    /// stops its later repetitions.
    pub fn cancel_macrotask(&self, handle: TaskHandle) -> bool {
        let cancelled = self.shared.macrotasks.borrow_mut().cancel(handle);
        if cancelled {
            self.shared.stats.borrow_mut().cancelled_tasks += 1;
            tracing::debug!(task = %handle, "macrotask cancelled");
        }
        cancelled
    }

    /// Queues `callback` to run at the next microtask checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::QueueOverflow`] when the microtask queue is bounded
    /// and full.
    pub fn queue_microtask<F>(&self, callback: F) -> Result<(), QueueError>
    where
        F: FnOnce() + 'static,
    {
        self.shared.microtasks.enqueue(Microtask::new(callback))
    }

    /// Asks the loop to stop once the current callback and its microtasks finish.
    pub fn stop(&self) {
        self.shared.stop_requested.set(true);
    }

    /// Current phase of the loop.
    pub fn state(&self) -> LoopState {
        self.shared.state.get()
    }

    /// Due time of the earliest live macrotask.
    pub fn next_due_time(&self) -> Option<Instant> {
        self.shared.macrotasks.borrow_mut().next_due_time()
    }

    /// Number of live macrotasks.
    pub fn pending_macrotasks(&self) -> usize {
        self.shared.macrotasks.borrow().len()
    }

    /// Number of queued microtasks.
    pub fn pending_microtasks(&self) -> usize {
        self.shared.microtasks.len()
    }

    pub(crate) fn enqueue_reaction(&self, microtask: Microtask) {
        self.shared.microtasks.enqueue_reaction(microtask);
    }

    pub(crate) fn next_deferred_id(&self) -> u64 {
        let id = self.shared.next_deferred_id.get();
        self.shared.next_deferred_id.set(id + 1);
        id
    }

    pub(crate) fn rejections(&self) -> &RejectionTracker {
        &self.shared.rejections
    }
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("now", &self.now())
            .field("state", &self.state())
            .field("pending_microtasks", &self.pending_microtasks())
            .finish_non_exhaustive()
    }
}
