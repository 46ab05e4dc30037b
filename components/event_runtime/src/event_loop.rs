//! Event loop implementation.
//!
//! The loop owns the macrotask and microtask queues (through its
//! [`LoopHandle`]) and drives them. Each iteration:
//! 1. Ingests work handed over from other threads
//! 2. Takes the earliest ready macrotask and executes it
//! 3. Drains all microtasks, then reports unhandled rejections
//! 4. If nothing is ready, jumps a virtual clock to the next due time or
//!    waits for it on a wall clock
//!
//! Entry work registered with [`EventLoop::enter`] runs before the first
//! iteration, followed by its own microtask checkpoint.

use crate::clock::{Clock, VirtualClock, WallClock};
use crate::config::{ClockMode, LoopConfig};
use crate::deferred::Deferred;
use crate::handle::{LoopHandle, LoopShared};
use crate::remote::{Completer, Handoff, RemoteHandle};
use crate::task_queue::{run_guarded, MacrotaskQueue, MicrotaskQueue};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use loop_types::{Instant, QueueError, TaskError, TaskHandle, TaskKind};
use serde::Serialize;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Phase of an event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Not inside any `run_*` call.
    Idle,
    /// Inside a `run_*` call, between callbacks.
    Running,
    /// Draining the microtask queue.
    DrainingMicrotasks,
    /// Executing a macrotask callback.
    RunningMacrotask,
    /// The last run ended because of a stop request.
    Stopped,
}

/// Counters kept by an event loop over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    /// Macrotask callbacks executed, counting each interval repetition.
    pub macrotasks_run: u64,
    /// Microtasks executed, including deferred reactions.
    pub microtasks_run: u64,
    /// Callbacks that panicked.
    pub task_errors: u64,
    /// Rejections reported as unhandled.
    pub unhandled_rejections: u64,
    /// Successful macrotask cancellations.
    pub cancelled_tasks: u64,
}

/// Why a `run_*` call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Both queues are empty and no external producer is registered.
    Idle,
    /// [`EventLoop::stop`] or a handle's `stop` was called.
    Stopped,
    /// The `run_for` deadline was reached with work still scheduled.
    Deadline,
    /// `run_turns` executed its requested number of macrotasks.
    TurnLimit,
    /// `run_ready` ran out of ready work while later work remains.
    Pending,
}

#[derive(Debug, Clone, Copy)]
enum RunLimit {
    Ready,
    Idle,
    Deadline(Instant),
    Turns(u64),
    Forever,
}

type Hook = Box<dyn FnMut(&TaskError)>;

#[derive(Default)]
struct Diagnostics {
    on_task_error: Option<Hook>,
    on_unhandled_rejection: Option<Hook>,
}

impl Diagnostics {
    fn task_error(&mut self, stats: &RefCell<LoopStats>, error: TaskError) {
        stats.borrow_mut().task_errors += 1;
        match self.on_task_error.as_mut() {
            Some(hook) => hook(&error),
            None => tracing::warn!(error = %error, "task failed"),
        }
    }

    fn unhandled_rejection(&mut self, stats: &RefCell<LoopStats>, error: TaskError) {
        stats.borrow_mut().unhandled_rejections += 1;
        match self.on_unhandled_rejection.as_mut() {
            Some(hook) => hook(&error),
            None => tracing::warn!(error = %error, "unhandled rejection"),
        }
    }
}

type Settler = Box<dyn FnOnce(Box<dyn Any + Send>)>;

/// A single-threaded cooperative event loop.
///
/// Exactly one callback runs at a time. Microtasks queued by a callback all
/// run before the next macrotask starts, and macrotasks with equal due
/// times run in the order they were scheduled.
///
/// # Examples
///
/// ```
/// use event_runtime::{Deferred, EventLoop};
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use std::time::Duration;
///
/// let mut event_loop = EventLoop::deterministic();
/// let log = Rc::new(RefCell::new(Vec::new()));
///
/// let l = log.clone();
/// event_loop.run_main(move |handle| {
///     let l2 = l.clone();
///     handle
///         .schedule_macrotask(Duration::from_millis(10), move || l2.borrow_mut().push("timer"))
///         .unwrap();
///     let l3 = l.clone();
///     let _ = Deferred::<(), ()>::resolved(handle, ()).map(move |_| l3.borrow_mut().push("reaction"));
///     l.borrow_mut().push("main");
/// });
///
/// assert_eq!(*log.borrow(), vec!["main", "reaction", "timer"]);
/// assert_eq!(event_loop.now().as_millis(), 10);
/// ```
pub struct EventLoop {
    handle: LoopHandle,
    entry: Vec<Box<dyn FnOnce(&LoopHandle)>>,
    diagnostics: Diagnostics,
    handoff: Sender<Handoff>,
    inbox: Receiver<Handoff>,
    producers: Arc<AtomicUsize>,
    completions: HashMap<u64, Settler>,
    next_completion: u64,
}

impl EventLoop {
    /// Creates an event loop on the wall clock with default settings.
    pub fn new() -> Self {
        Self::from_config(&LoopConfig::default())
    }

    /// Creates an event loop on a fresh [`VirtualClock`].
    ///
    /// Idle waits jump the clock instead of sleeping, so timer-heavy code runs
    /// instantly and reproducibly.
    pub fn deterministic() -> Self {
        Self::from_config(&LoopConfig::default().with_clock(ClockMode::Virtual))
    }

    /// Creates an event loop from a configuration, choosing the clock it names.
    pub fn from_config(config: &LoopConfig) -> Self {
        let clock: Arc<dyn Clock> = match config.clock {
            ClockMode::Wall => Arc::new(WallClock::new()),
            ClockMode::Virtual => Arc::new(VirtualClock::new()),
        };
        Self::with_clock(config, clock)
    }

    /// Creates an event loop on the given clock, ignoring `config.clock`.
    pub fn with_clock(config: &LoopConfig, clock: Arc<dyn Clock>) -> Self {
        let microtasks = match config.microtask_capacity {
            Some(capacity) => MicrotaskQueue::bounded(capacity),
            None => MicrotaskQueue::new(),
        };
        let macrotasks = match config.macrotask_capacity {
            Some(capacity) => MacrotaskQueue::bounded(capacity),
            None => MacrotaskQueue::new(),
        };
        let (handoff, inbox) = unbounded();
        tracing::debug!(
            virtual_clock = clock.is_virtual(),
            microtask_capacity = ?config.microtask_capacity,
            macrotask_capacity = ?config.macrotask_capacity,
            "event loop created"
        );
        Self {
            handle: LoopHandle::new(LoopShared::new(clock, microtasks, macrotasks, config.min_interval())),
            entry: Vec::new(),
            diagnostics: Diagnostics::default(),
            handoff,
            inbox,
            producers: Arc::new(AtomicUsize::new(0)),
            completions: HashMap::new(),
            next_completion: 1,
        }
    }

    /// Returns a handle for scheduling work from inside callbacks.
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Returns a `Send` handle for handing work over from other threads.
    ///
    /// The loop counts it as a registered producer until it is dropped.
    pub fn remote(&self) -> RemoteHandle {
        RemoteHandle::new(self.handoff.clone(), Arc::clone(&self.producers))
    }

    /// Creates a deferred that another thread settles through the returned
    /// [`Completer`].
    ///
    /// The outcome is applied in a macrotask on the loop thread.
    pub fn completion<T, E>(&mut self) -> (Deferred<T, E>, Completer<T, E>)
    where
        T: Clone + Send + 'static,
        E: Clone + fmt::Debug + Send + 'static,
    {
        let (deferred, resolve, reject) = Deferred::with_resolvers(&self.handle);
        let id = self.next_completion;
        self.next_completion += 1;

        let deferred_id = deferred.id();
        self.completions.insert(
            id,
            Box::new(move |payload| match payload.downcast::<Result<T, E>>() {
                Ok(outcome) => match *outcome {
                    Ok(value) => {
                        resolve.resolve(value);
                    }
                    Err(error) => {
                        reject.reject(error);
                    }
                },
                Err(_) => tracing::warn!(deferred = deferred_id, "completion payload has the wrong type"),
            }),
        );
        let completer = Completer::new(id, self.handoff.clone(), Arc::clone(&self.producers));
        (deferred, completer)
    }

    /// Registers work to run synchronously at the start of the next `run_*`
    /// call, before any macrotask.
    pub fn enter<F>(&mut self, f: F)
    where
        F: FnOnce(&LoopHandle) + 'static,
    {
        self.entry.push(Box::new(f));
    }

    /// Runs `f` as entry work, then runs until idle.
    pub fn run_main<F>(&mut self, f: F) -> LoopExit
    where
        F: FnOnce(&LoopHandle) + 'static,
    {
        self.enter(f);
        self.run_until_idle()
    }

    /// Installs the hook that receives callback panics.
    ///
    /// Without a hook they are logged at `warn` level.
    pub fn on_task_error<F>(&mut self, hook: F)
    where
        F: FnMut(&TaskError) + 'static,
    {
        self.diagnostics.on_task_error = Some(Box::new(hook));
    }

    /// Installs the hook that receives unhandled rejections.
    ///
    /// Without a hook they are logged at `warn` level.
    pub fn on_unhandled_rejection<F>(&mut self, hook: F)
    where
        F: FnMut(&TaskError) + 'static,
    {
        self.diagnostics.on_unhandled_rejection = Some(Box::new(hook));
    }

    /// See [`LoopHandle::schedule_macrotask`].
    pub fn schedule_macrotask<F>(&self, delay: Duration, callback: F) -> Result<TaskHandle, QueueError>
    where
        F: FnOnce() + 'static,
    {
        self.handle.schedule_macrotask(delay, callback)
    }

    /// See [`LoopHandle::set_interval`].
    pub fn set_interval<F>(&self, period: Duration, callback: F) -> Result<TaskHandle, QueueError>
    where
        F: FnMut() + 'static,
    {
        self.handle.set_interval(period, callback)
    }

    /// See [`LoopHandle::cancel_macrotask`].
    pub fn cancel_macrotask(&self, handle: TaskHandle) -> bool {
        self.handle.cancel_macrotask(handle)
    }

    /// See [`LoopHandle::queue_microtask`].
    pub fn queue_microtask<F>(&self, callback: F) -> Result<(), QueueError>
    where
        F: FnOnce() + 'static,
    {
        self.handle.queue_microtask(callback)
    }

    /// Asks the loop to stop once the current callback and its microtasks
    /// finish. A request made outside a run stops the next run immediately.
    pub fn stop(&self) {
        self.handle.stop();
    }

    /// Current time on the loop's clock.
    pub fn now(&self) -> Instant {
        self.handle.now()
    }

    /// The loop's clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.handle.shared.clock
    }

    /// Moves a virtual clock to `deadline` without running anything.
    ///
    /// Returns false on a wall clock.
    pub fn advance_to(&self, deadline: Instant) -> bool {
        self.clock().advance_to(deadline)
    }

    /// Moves a virtual clock forward by `by` without running anything.
    pub fn advance_by(&self, by: Duration) -> bool {
        self.advance_to(self.now() + by)
    }

    /// Due time of the earliest live macrotask.
    pub fn next_due_time(&self) -> Option<Instant> {
        self.handle.next_due_time()
    }

    /// Current phase.
    pub fn state(&self) -> LoopState {
        self.handle.state()
    }

    /// Snapshot of the loop's counters.
    pub fn stats(&self) -> LoopStats {
        *self.handle.shared.stats.borrow()
    }

    /// Returns true if no macrotask is scheduled.
    pub fn is_task_queue_empty(&self) -> bool {
        self.handle.pending_macrotasks() == 0
    }

    /// Returns true if no microtask is queued.
    pub fn is_microtask_queue_empty(&self) -> bool {
        self.handle.pending_microtasks() == 0
    }

    /// Number of registered external producers.
    pub fn producers(&self) -> usize {
        self.producers.load(Ordering::Acquire)
    }

    /// Runs entry work and every macrotask already due, without waiting or
    /// moving the clock.
    pub fn run_ready(&mut self) -> LoopExit {
        self.run(RunLimit::Ready)
    }

    /// Runs until both queues are empty and no external producer is
    /// registered.
    ///
    /// On a virtual clock, waits for future macrotasks are replaced by clock
    /// jumps. On a wall clock the loop sleeps on its handoff channel, so
    /// remote work wakes it early.
    pub fn run_until_idle(&mut self) -> LoopExit {
        self.run(RunLimit::Idle)
    }

    /// Runs everything due within `duration` of now.
    ///
    /// On a virtual clock the clock ends exactly at the deadline unless the
    /// loop was stopped first.
    pub fn run_for(&mut self, duration: Duration) -> LoopExit {
        let deadline = self.now() + duration;
        self.run(RunLimit::Deadline(deadline))
    }

    /// Runs at most `turns` macrotasks, draining microtasks after each.
    pub fn run_turns(&mut self, turns: u64) -> LoopExit {
        self.run(RunLimit::Turns(turns))
    }

    /// Runs until stopped. Empty queues block on the handoff channel.
    pub fn run_forever(&mut self) -> LoopExit {
        self.run(RunLimit::Forever)
    }

    fn shared(&self) -> Rc<LoopShared> {
        Rc::clone(&self.handle.shared)
    }

    fn run(&mut self, limit: RunLimit) -> LoopExit {
        let shared = self.shared();
        shared.state.set(LoopState::Running);
        tracing::debug!(limit = ?limit, now = %self.now(), "event loop running");

        let entry = std::mem::take(&mut self.entry);
        for work in entry {
            let handle = self.handle.clone();
            self.run_callback(TaskKind::Macrotask, move || work(&handle));
        }
        self.checkpoint();

        let mut turns = 0;
        let exit = loop {
            self.ingest();
            if shared.stop_requested.replace(false) {
                break LoopExit::Stopped;
            }
            if let RunLimit::Turns(max) = limit {
                if turns >= max {
                    break LoopExit::TurnLimit;
                }
            }

            let now = self.now();
            let horizon = match limit {
                RunLimit::Deadline(deadline) => now.min(deadline),
                _ => now,
            };
            let ready = shared.macrotasks.borrow_mut().pop_ready(horizon);
            if let Some(task) = ready {
                tracing::trace!(task = %task.handle, due = %task.due_time, "running macrotask");
                shared.state.set(LoopState::RunningMacrotask);
                shared.stats.borrow_mut().macrotasks_run += 1;
                self.run_callback(TaskKind::Macrotask, move || task.run());
                shared.state.set(LoopState::Running);
                self.checkpoint();
                turns += 1;
                continue;
            }

            let next_due = self.next_due_time();
            // A producer may send and detach after `ingest`; the count is read
            // before the inbox so its last message is never missed.
            let producers = self.producers() > 0 || !self.inbox.is_empty();
            match (limit, next_due) {
                (RunLimit::Ready, Some(_)) => break LoopExit::Pending,
                (RunLimit::Ready, None) if producers => break LoopExit::Pending,
                (RunLimit::Ready, None) => break LoopExit::Idle,
                (RunLimit::Deadline(deadline), Some(due)) if due > deadline => {
                    self.wait_until(deadline);
                    if self.now() >= deadline {
                        break LoopExit::Deadline;
                    }
                }
                (RunLimit::Deadline(deadline), None) if producers => {
                    if self.clock().is_virtual() {
                        // Virtual time cannot wait on other threads; anything
                        // already handed over is ingested on the next pass.
                        if self.inbox.is_empty() {
                            self.advance_to(deadline);
                            break LoopExit::Deadline;
                        }
                    } else {
                        self.wait_until(deadline);
                        if self.now() >= deadline && self.inbox.is_empty() {
                            break LoopExit::Deadline;
                        }
                    }
                }
                (RunLimit::Deadline(deadline), None) => {
                    self.advance_to(deadline);
                    break LoopExit::Idle;
                }
                (_, Some(due)) => self.wait_until(due),
                (RunLimit::Idle | RunLimit::Turns(_), None) if !producers => break LoopExit::Idle,
                (_, None) => self.block_on_inbox(),
            }
        };

        let state = if exit == LoopExit::Stopped {
            LoopState::Stopped
        } else {
            LoopState::Idle
        };
        shared.state.set(state);
        tracing::debug!(exit = ?exit, now = %self.now(), "event loop returned");
        exit
    }

    /// Jumps a virtual clock to `deadline`, or sleeps on the handoff channel
    /// until it on a wall clock.
    fn wait_until(&mut self, deadline: Instant) {
        if self.advance_to(deadline) {
            tracing::debug!(to = %deadline, "virtual clock advanced");
            return;
        }
        let wait = deadline.duration_since(self.now());
        if wait.is_zero() {
            return;
        }
        match self.inbox.recv_timeout(wait) {
            Ok(message) => self.accept(message),
            Err(RecvTimeoutError::Timeout) => {}
            // The loop holds a sender of its own, so the channel stays open.
            Err(RecvTimeoutError::Disconnected) => std::thread::sleep(wait),
        }
    }

    fn block_on_inbox(&mut self) {
        tracing::trace!(producers = self.producers(), "waiting for handed-over work");
        if let Ok(message) = self.inbox.recv() {
            self.accept(message);
        }
    }

    fn ingest(&mut self) {
        while let Ok(message) = self.inbox.try_recv() {
            self.accept(message);
        }
    }

    fn accept(&mut self, message: Handoff) {
        tracing::debug!(message = ?message, "handoff received");
        let shared = self.shared();
        match message {
            Handoff::Macrotask { delay, callback } => {
                let due = self.now() + delay;
                shared.macrotasks.borrow_mut().schedule_admitted(due, callback);
            }
            Handoff::Complete { id, payload } => match self.completions.remove(&id) {
                Some(settler) => {
                    let due = self.now();
                    shared
                        .macrotasks
                        .borrow_mut()
                        .schedule_admitted(due, Box::new(move || settler(payload)));
                }
                None => tracing::warn!(completion = id, "completion for an unknown deferred"),
            },
            Handoff::Abandoned { id } => {
                self.completions.remove(&id);
            }
            Handoff::Detached => {}
            Handoff::Stop => shared.stop_requested.set(true),
        }
    }

    fn run_callback(&mut self, kind: TaskKind, f: impl FnOnce()) {
        if let Err(error) = run_guarded(kind, f) {
            let shared = self.shared();
            self.diagnostics.task_error(&shared.stats, error);
        }
    }

    /// Drains microtasks and reports rejections that are still unobserved.
    ///
    /// Hooks may queue more microtasks, so this repeats until a drain finds
    /// the queue empty.
    fn checkpoint(&mut self) {
        let shared = self.shared();
        let outer = shared.state.replace(LoopState::DrainingMicrotasks);
        loop {
            let diagnostics = &mut self.diagnostics;
            let stats = &shared.stats;
            let executed = shared
                .microtasks
                .drain(&mut |error| diagnostics.task_error(stats, error));
            shared.stats.borrow_mut().microtasks_run += executed as u64;

            for rejection in shared.rejections.take_unhandled() {
                self.diagnostics.unhandled_rejection(&shared.stats, rejection);
            }
            if shared.microtasks.is_empty() && shared.rejections.is_empty() {
                break;
            }
        }
        shared.state.set(outer);
    }
}

// Queued callbacks usually capture a `LoopHandle`, which keeps the queues
// that hold them alive. Emptying the queues here breaks that cycle.
impl Drop for EventLoop {
    fn drop(&mut self) {
        let shared = self.shared();
        loop {
            let macrotasks = std::mem::take(&mut *shared.macrotasks.borrow_mut());
            let microtasks = shared.microtasks.take_all();
            if macrotasks.is_empty() && microtasks.is_empty() {
                break;
            }
            tracing::debug!(
                macrotasks = macrotasks.len(),
                microtasks = microtasks.len(),
                "dropping unfinished work"
            );
            // Dropped outside the borrows: a callback's captures may touch the queues.
            drop(macrotasks);
            drop(microtasks);
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("now", &self.now())
            .field("state", &self.state())
            .field("pending_macrotasks", &self.handle.pending_macrotasks())
            .field("pending_microtasks", &self.handle.pending_microtasks())
            .field("producers", &self.producers())
            .finish_non_exhaustive()
    }
}
