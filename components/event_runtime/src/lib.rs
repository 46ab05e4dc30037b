//! Single-threaded cooperative event loop.
//!
//! This crate provides the scheduling core for callback-driven programs:
//! - Time-ordered macrotasks with cancellable, generation-checked handles
//! - A microtask queue drained to exhaustion after every macrotask
//! - Settle-once [`Deferred`] values with chained reactions
//! - Unhandled-rejection detection at every microtask checkpoint
//! - A thread-safe handoff channel for work produced on other threads
//!
//! # Overview
//!
//! - [`EventLoop`] - Owns the queues and drives them
//! - [`LoopHandle`] - Cloneable access to the loop from inside callbacks
//! - [`Deferred`] - Eventually available value or error
//! - [`Clock`] - Time source; [`WallClock`] in production, [`VirtualClock`] in tests
//! - [`RemoteHandle`] / [`Completer`] - Cross-thread producers
//! - [`LoopConfig`] - Queue bounds, clock mode and interval clamp
//!
//! # Examples
//!
//! ## Ordering
//!
//! ```
//! use event_runtime::EventLoop;
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use std::time::Duration;
//!
//! let mut event_loop = EventLoop::deterministic();
//! let handle = event_loop.handle();
//! let log = Rc::new(RefCell::new(Vec::new()));
//!
//! let (l, h) = (log.clone(), handle.clone());
//! handle
//!     .schedule_macrotask(Duration::ZERO, move || {
//!         l.borrow_mut().push("A");
//!         let l = l.clone();
//!         h.queue_microtask(move || l.borrow_mut().push("M1")).unwrap();
//!     })
//!     .unwrap();
//! let l = log.clone();
//! handle
//!     .schedule_macrotask(Duration::ZERO, move || l.borrow_mut().push("B"))
//!     .unwrap();
//!
//! event_loop.run_until_idle();
//! assert_eq!(*log.borrow(), vec!["A", "M1", "B"]);
//! ```
//!
//! ## Deferred chains
//!
//! ```
//! use event_runtime::{Deferred, EventLoop};
//!
//! let mut event_loop = EventLoop::deterministic();
//! let handle = event_loop.handle();
//!
//! let failed: Deferred<i32, String> = Deferred::rejected(&handle, "offline".to_string());
//! let recovered = failed.catch(|_| Ok::<_, String>(0)).map(|v| v + 1);
//!
//! event_loop.run_until_idle();
//! assert_eq!(recovered.value(), Some(1));
//! assert_eq!(event_loop.stats().unhandled_rejections, 0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
mod combinators;
pub mod config;
pub mod deferred;
pub mod event_loop;
pub mod handle;
mod rejection;
pub mod remote;
pub mod task_queue;

// Re-export main types at crate root
pub use clock::{Clock, VirtualClock, WallClock};
pub use config::{ClockMode, LoopConfig};
pub use deferred::{Deferred, DeferredState, Handler, Reject, Resolve};
pub use event_loop::{EventLoop, LoopExit, LoopState, LoopStats};
pub use handle::LoopHandle;
pub use remote::{Completer, RemoteHandle};
pub use task_queue::{MacrotaskQueue, Microtask, MicrotaskQueue, Task, TaskCallback};
