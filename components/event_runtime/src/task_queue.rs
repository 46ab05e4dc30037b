//! Macrotask and microtask queue management.
//!
//! This module provides the two queues the event loop drives:
//! - [`MicrotaskQueue`] is a strict FIFO that is drained to exhaustion,
//!   including microtasks queued by the microtasks being drained.
//! - [`MacrotaskQueue`] orders work by due time, breaking ties by insertion
//!   sequence, and hands out generation-checked [`TaskHandle`]s for
//!   cancellation.

use loop_types::{Instant, QueueError, TaskError, TaskHandle, TaskKind};
use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;

/// Runs `f`, converting a panic into a [`TaskError::CallbackPanic`].
pub(crate) fn run_guarded(kind: TaskKind, f: impl FnOnce()) -> Result<(), TaskError> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| TaskError::from_panic(kind, payload.as_ref()))
}

/// A microtask to be executed by the event loop.
///
/// Microtasks carry deferred reactions and `queue_microtask` callbacks. They
/// have no due time and no identity beyond their position in the queue.
pub struct Microtask {
    callback: Box<dyn FnOnce()>,
}

impl Microtask {
    /// Creates a new Microtask from a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self {
            callback: Box::new(f),
        }
    }

    /// Executes the microtask, consuming it.
    pub fn run(self) {
        (self.callback)()
    }
}

impl fmt::Debug for Microtask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Microtask {{ ... }}")
    }
}

/// A FIFO queue of microtasks.
///
/// All methods take `&self` so that a microtask being drained can queue more
/// microtasks into the same queue; no borrow is held while a callback runs.
#[derive(Debug, Default)]
pub struct MicrotaskQueue {
    queue: RefCell<VecDeque<Microtask>>,
    capacity: Option<usize>,
}

impl MicrotaskQueue {
    /// Creates an unbounded queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a queue that refuses `enqueue` calls beyond `capacity` entries.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
            capacity: Some(capacity),
        }
    }

    /// Appends a microtask to the tail.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::QueueOverflow`] when the queue is bounded and full.
    pub fn enqueue(&self, microtask: Microtask) -> Result<(), QueueError> {
        let mut queue = self.queue.borrow_mut();
        if let Some(capacity) = self.capacity {
            if queue.len() >= capacity {
                return Err(QueueError::QueueOverflow {
                    kind: TaskKind::Microtask,
                    capacity,
                });
            }
        }
        queue.push_back(microtask);
        Ok(())
    }

    /// Appends a deferred reaction, ignoring the capacity bound.
    ///
    /// Settlement cannot be refused after the fact, so reaction jobs always
    /// get a place in the queue.
    pub(crate) fn enqueue_reaction(&self, microtask: Microtask) {
        self.queue.borrow_mut().push_back(microtask);
    }

    /// Removes every queued microtask without running it.
    pub(crate) fn take_all(&self) -> VecDeque<Microtask> {
        std::mem::take(&mut *self.queue.borrow_mut())
    }

    /// Removes and returns the microtask at the head of the queue.
    pub fn dequeue(&self) -> Option<Microtask> {
        self.queue.borrow_mut().pop_front()
    }

    /// Runs microtasks from the head until the queue is empty.
    ///
    /// Microtasks queued while draining run in the same drain. A panicking
    /// microtask is reported through `on_error` and draining continues.
    ///
    /// Returns the number of microtasks executed.
    pub fn drain(&self, on_error: &mut dyn FnMut(TaskError)) -> usize {
        let mut executed = 0;
        loop {
            let next = self.dequeue();
            let Some(microtask) = next else {
                break;
            };
            executed += 1;
            if let Err(err) = run_guarded(TaskKind::Microtask, || microtask.run()) {
                on_error(err);
            }
        }
        executed
    }

    /// Returns true if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Returns the number of queued microtasks.
    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }
}

/// The callable stored in a macrotask slot.
pub enum TaskCallback {
    /// Runs once and is consumed.
    Once(Box<dyn FnOnce()>),
    /// Runs on every repetition of an interval task.
    Repeating(Rc<RefCell<dyn FnMut()>>),
}

impl fmt::Debug for TaskCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskCallback::Once(_) => write!(f, "Once(..)"),
            TaskCallback::Repeating(_) => write!(f, "Repeating(..)"),
        }
    }
}

/// A macrotask popped from the queue, ready to run.
#[derive(Debug)]
pub struct Task {
    /// Handle the task was scheduled under.
    pub handle: TaskHandle,
    /// When the task became due.
    pub due_time: Instant,
    /// Insertion sequence, used to order tasks with equal due times.
    pub sequence: u64,
    callback: TaskCallback,
}

impl Task {
    /// Returns true if this task is one repetition of an interval.
    pub fn is_repeating(&self) -> bool {
        matches!(self.callback, TaskCallback::Repeating(_))
    }

    /// Executes the task, consuming it.
    pub fn run(self) {
        match self.callback {
            TaskCallback::Once(f) => f(),
            TaskCallback::Repeating(f) => (&mut *f.borrow_mut())(),
        }
    }
}

#[derive(Debug)]
enum SlotState {
    Vacant,
    Scheduled {
        due: Instant,
        sequence: u64,
        period: Option<Duration>,
        callback: TaskCallback,
    },
    Cancelled,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    state: SlotState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct HeapEntry {
    due: Instant,
    sequence: u64,
    index: u32,
    generation: u32,
}

/// A time-ordered queue of macrotasks.
///
/// Tasks live in an arena of generation-counted slots; a binary heap of
/// `(due, sequence)` keys references those slots. Cancellation only marks the
/// slot, and the stale heap entry is discarded when it reaches the top, so
/// handle checks stay O(1).
///
/// # Examples
///
/// ```
/// use event_runtime::MacrotaskQueue;
/// use loop_types::Instant;
///
/// let mut queue = MacrotaskQueue::new();
/// let late = queue.schedule(Instant::from_millis(20), || {}).unwrap();
/// let early = queue.schedule(Instant::from_millis(10), || {}).unwrap();
///
/// assert!(queue.pop_ready(Instant::from_millis(5)).is_none());
/// assert_eq!(queue.next_due_time(), Some(Instant::from_millis(10)));
///
/// assert!(queue.cancel(early));
/// let task = queue.pop_ready(Instant::from_millis(30)).unwrap();
/// assert_eq!(task.handle, late);
/// ```
#[derive(Debug, Default)]
pub struct MacrotaskQueue {
    slots: Vec<Slot>,
    free: Vec<u32>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    next_sequence: u64,
    live: usize,
    capacity: Option<usize>,
}

impl MacrotaskQueue {
    /// Creates an unbounded queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a queue that holds at most `capacity` live tasks.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Schedules `callback` to run once at `due_time`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::QueueOverflow`] when the queue is bounded and full.
    pub fn schedule<F>(&mut self, due_time: Instant, callback: F) -> Result<TaskHandle, QueueError>
    where
        F: FnOnce() + 'static,
    {
        self.insert(due_time, None, TaskCallback::Once(Box::new(callback)))
    }

    /// Schedules a task handed over from another thread.
    ///
    /// The sender has already let go of the work, so the capacity bound is
    /// not applied.
    pub(crate) fn schedule_admitted(&mut self, due_time: Instant, callback: Box<dyn FnOnce()>) -> TaskHandle {
        self.place(due_time, None, TaskCallback::Once(callback))
    }

    /// Schedules `callback` to run at `first_due` and then every `period`.
    ///
    /// The returned handle stays valid across repetitions until it is
    /// cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::QueueOverflow`] when the queue is bounded and full.
    pub fn schedule_repeating<F>(
        &mut self,
        first_due: Instant,
        period: Duration,
        callback: F,
    ) -> Result<TaskHandle, QueueError>
    where
        F: FnMut() + 'static,
    {
        let callback: Rc<RefCell<dyn FnMut()>> = Rc::new(RefCell::new(callback));
        self.insert(first_due, Some(period), TaskCallback::Repeating(callback))
    }

    fn insert(
        &mut self,
        due: Instant,
        period: Option<Duration>,
        callback: TaskCallback,
    ) -> Result<TaskHandle, QueueError> {
        if let Some(capacity) = self.capacity {
            if self.live >= capacity {
                return Err(QueueError::QueueOverflow {
                    kind: TaskKind::Macrotask,
                    capacity,
                });
            }
        }
        Ok(self.place(due, period, callback))
    }

    fn place(&mut self, due: Instant, period: Option<Duration>, callback: TaskCallback) -> TaskHandle {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    state: SlotState::Vacant,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let sequence = self.bump_sequence();
        let slot = &mut self.slots[index as usize];
        slot.state = SlotState::Scheduled {
            due,
            sequence,
            period,
            callback,
        };
        let generation = slot.generation;

        self.heap.push(Reverse(HeapEntry {
            due,
            sequence,
            index,
            generation,
        }));
        self.live += 1;

        TaskHandle::new(index, generation)
    }

    fn bump_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    /// Cancels a scheduled task.
    ///
    /// Returns false if the task already ran, was already cancelled, or the
    /// handle is stale.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        if self.lookup(handle).is_err() {
            return false;
        }
        self.slots[handle.index() as usize].state = SlotState::Cancelled;
        self.live -= 1;
        true
    }

    /// Returns the due time of a live task, or `None` for an invalid handle.
    pub fn due_time(&self, handle: TaskHandle) -> Option<Instant> {
        match self.lookup(handle).ok()?.state {
            SlotState::Scheduled { due, .. } => Some(due),
            _ => None,
        }
    }

    /// Returns true if `handle` refers to a task that will still run.
    pub fn contains(&self, handle: TaskHandle) -> bool {
        self.lookup(handle).is_ok()
    }

    fn lookup(&self, handle: TaskHandle) -> Result<&Slot, QueueError> {
        match self.slots.get(handle.index() as usize) {
            Some(slot)
                if slot.generation == handle.generation()
                    && matches!(slot.state, SlotState::Scheduled { .. }) =>
            {
                Ok(slot)
            }
            _ => Err(QueueError::InvalidHandle(handle)),
        }
    }

    fn is_current(&self, entry: &HeapEntry) -> bool {
        let slot = &self.slots[entry.index as usize];
        slot.generation == entry.generation
            && matches!(slot.state, SlotState::Scheduled { sequence, .. } if sequence == entry.sequence)
    }

    /// Frees the slot behind a heap entry that no longer schedules anything.
    fn discard(&mut self, entry: HeapEntry) {
        let slot = &mut self.slots[entry.index as usize];
        if slot.generation == entry.generation && matches!(slot.state, SlotState::Cancelled) {
            self.release(entry.index);
        }
    }

    fn release(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.state = SlotState::Vacant;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
    }

    /// Pops stale entries off the top of the heap.
    fn purge_head(&mut self) {
        while let Some(Reverse(entry)) = self.heap.peek().copied() {
            if self.is_current(&entry) {
                break;
            }
            self.heap.pop();
            self.discard(entry);
        }
    }

    /// Returns the earliest live task due at or before `now`.
    ///
    /// Once-tasks give up their slot, invalidating their handle. Repeating
    /// tasks are re-queued at `due + period` before being returned, so their
    /// handle stays valid and can cancel the next repetition.
    pub fn pop_ready(&mut self, now: Instant) -> Option<Task> {
        self.purge_head();
        let Reverse(entry) = *self.heap.peek()?;
        if entry.due > now {
            return None;
        }
        self.heap.pop();

        let handle = TaskHandle::new(entry.index, entry.generation);
        let index = entry.index as usize;

        let repeating = match &self.slots[index].state {
            SlotState::Scheduled {
                period: Some(period),
                callback: TaskCallback::Repeating(callback),
                ..
            } => Some((*period, Rc::clone(callback))),
            _ => None,
        };

        if let Some((period, callback)) = repeating {
            let next_due = entry.due + period;
            let sequence = self.bump_sequence();
            if let SlotState::Scheduled {
                due, sequence: seq, ..
            } = &mut self.slots[index].state
            {
                *due = next_due;
                *seq = sequence;
            }
            self.heap.push(Reverse(HeapEntry {
                due: next_due,
                sequence,
                index: entry.index,
                generation: entry.generation,
            }));
            return Some(Task {
                handle,
                due_time: entry.due,
                sequence: entry.sequence,
                callback: TaskCallback::Repeating(callback),
            });
        }

        let state = std::mem::replace(&mut self.slots[index].state, SlotState::Vacant);
        self.release(entry.index);
        self.live -= 1;
        match state {
            SlotState::Scheduled { callback, .. } => Some(Task {
                handle,
                due_time: entry.due,
                sequence: entry.sequence,
                callback,
            }),
            _ => None,
        }
    }

    /// Returns the due time of the earliest live task.
    pub fn next_due_time(&mut self) -> Option<Instant> {
        self.purge_head();
        self.heap.peek().map(|Reverse(entry)| entry.due)
    }

    /// Returns true if no live task is scheduled.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Returns the number of live tasks.
    pub fn len(&self) -> usize {
        self.live
    }
}
