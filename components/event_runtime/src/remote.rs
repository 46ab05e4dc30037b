//! Cross-thread handoff into the event loop.
//!
//! Other threads never touch loop state. They send messages over a
//! crossbeam MPSC channel; the loop ingests them on its own thread at the
//! start of every iteration and turns them into macrotasks.
//!
//! Every live [`RemoteHandle`] and [`Completer`] counts as a registered
//! external producer. While any producer is registered, `run_until_idle`
//! waits on the channel instead of returning.

use crossbeam::channel::Sender;
use loop_types::QueueError;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A message from a producer thread to the loop.
pub(crate) enum Handoff {
    Macrotask {
        delay: Duration,
        callback: Box<dyn FnOnce() + Send>,
    },
    Complete {
        id: u64,
        payload: Box<dyn Any + Send>,
    },
    /// A completer was dropped without completing.
    Abandoned { id: u64 },
    /// A producer went away; wakes a loop that may now be idle.
    Detached,
    Stop,
}

impl fmt::Debug for Handoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handoff::Macrotask { delay, .. } => write!(f, "Macrotask({:?})", delay),
            Handoff::Complete { id, .. } => write!(f, "Complete(#{})", id),
            Handoff::Abandoned { id } => write!(f, "Abandoned(#{})", id),
            Handoff::Detached => write!(f, "Detached"),
            Handoff::Stop => write!(f, "Stop"),
        }
    }
}

/// One registration in the loop's producer count.
struct ProducerGuard {
    sender: Sender<Handoff>,
    producers: Arc<AtomicUsize>,
}

impl ProducerGuard {
    fn register(sender: Sender<Handoff>, producers: Arc<AtomicUsize>) -> Self {
        producers.fetch_add(1, Ordering::AcqRel);
        Self { sender, producers }
    }

    fn send(&self, message: Handoff) -> Result<(), QueueError> {
        self.sender.send(message).map_err(|_| QueueError::LoopClosed)
    }
}

impl Clone for ProducerGuard {
    fn clone(&self) -> Self {
        Self::register(self.sender.clone(), Arc::clone(&self.producers))
    }
}

impl Drop for ProducerGuard {
    fn drop(&mut self) {
        self.producers.fetch_sub(1, Ordering::AcqRel);
        // The loop may already be gone.
        let _ = self.sender.send(Handoff::Detached);
    }
}

/// A `Send` handle for feeding work into an event loop from other threads.
///
/// # Examples
///
/// ```
/// use event_runtime::EventLoop;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let mut event_loop = EventLoop::new();
/// let remote = event_loop.remote();
/// let done = Arc::new(AtomicBool::new(false));
///
/// let d = done.clone();
/// let worker = std::thread::spawn(move || {
///     remote
///         .schedule_macrotask(Duration::ZERO, move || d.store(true, Ordering::SeqCst))
///         .unwrap();
/// });
///
/// // Returns once the worker's handle is dropped and its task has run.
/// event_loop.run_until_idle();
/// worker.join().unwrap();
/// assert!(done.load(Ordering::SeqCst));
/// ```
#[derive(Clone)]
pub struct RemoteHandle {
    guard: ProducerGuard,
}

impl RemoteHandle {
    pub(crate) fn new(sender: Sender<Handoff>, producers: Arc<AtomicUsize>) -> Self {
        Self {
            guard: ProducerGuard::register(sender, producers),
        }
    }

    /// Hands `callback` to the loop as a macrotask due `delay` after the loop
    /// receives it.
    ///
    /// Handed-over tasks are not subject to the macrotask capacity bound.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::LoopClosed`] if the loop has been dropped.
    pub fn schedule_macrotask<F>(&self, delay: Duration, callback: F) -> Result<(), QueueError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.guard.send(Handoff::Macrotask {
            delay,
            callback: Box::new(callback),
        })
    }

    /// Asks the loop to stop after its current callback.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::LoopClosed`] if the loop has been dropped.
    pub fn stop(&self) -> Result<(), QueueError> {
        self.guard.send(Handoff::Stop)
    }
}

impl fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("producers", &self.guard.producers.load(Ordering::Acquire))
            .finish()
    }
}

/// The sending half of a deferred created by
/// [`EventLoop::completion`](crate::EventLoop::completion).
///
/// Completing hands the outcome to the loop, which settles the deferred in a
/// macrotask on its own thread. Dropping a completer without completing
/// leaves the deferred pending forever.
pub struct Completer<T, E> {
    id: u64,
    completed: bool,
    guard: ProducerGuard,
    _outcome: PhantomData<fn() -> (T, E)>,
}

impl<T, E> Completer<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn new(id: u64, sender: Sender<Handoff>, producers: Arc<AtomicUsize>) -> Self {
        Self {
            id,
            completed: false,
            guard: ProducerGuard::register(sender, producers),
            _outcome: PhantomData,
        }
    }

    /// Fulfills the deferred with `value`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::LoopClosed`] if the loop has been dropped.
    pub fn resolve(self, value: T) -> Result<(), QueueError> {
        self.complete(Ok(value))
    }

    /// Rejects the deferred with `error`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::LoopClosed`] if the loop has been dropped.
    pub fn reject(self, error: E) -> Result<(), QueueError> {
        self.complete(Err(error))
    }

    /// Settles the deferred with `outcome`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::LoopClosed`] if the loop has been dropped.
    pub fn complete(mut self, outcome: Result<T, E>) -> Result<(), QueueError> {
        self.completed = true;
        self.guard.send(Handoff::Complete {
            id: self.id,
            payload: Box::new(outcome),
        })
    }
}

impl<T, E> Drop for Completer<T, E> {
    fn drop(&mut self) {
        if !self.completed {
            let _ = self.guard.send(Handoff::Abandoned { id: self.id });
        }
    }
}

impl<T, E> fmt::Debug for Completer<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("id", &self.id)
            .field("completed", &self.completed)
            .finish()
    }
}
