//! Settle-once deferred values with chained reactions.
//!
//! A [`Deferred<T, E>`] starts out pending and settles exactly once, either
//! fulfilled with a `T` or rejected with an `E`. Reactions attached with
//! [`Deferred::then`] and its sugar never run inline: they are queued as
//! microtasks when the deferred settles, or immediately if it already has.
//!
//! Ownership runs one way. A derived deferred keeps its upstream alive, while
//! a reaction only refers to the deferred it settles through a weak
//! reference, so chains never form reference cycles.

use crate::handle::LoopHandle;
use crate::task_queue::Microtask;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};

/// The state of a Deferred.
///
/// Once settled (Fulfilled or Rejected), a Deferred cannot change state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredState {
    /// Not settled yet.
    Pending,
    /// Settled with a value.
    Fulfilled,
    /// Settled with an error.
    Rejected,
}

/// A boxed reaction handler as accepted by [`Deferred::then`].
pub type Handler<A, U, F> = Box<dyn FnOnce(A) -> Result<U, F>>;

type Reaction<T, E> = Box<dyn FnOnce(Result<T, E>)>;

/// What a reaction hands to the deferred it settles.
enum Resolution<T, E> {
    Settle(Result<T, E>),
    Adopt(Deferred<T, E>),
}

pub(crate) struct Inner<T, E> {
    id: u64,
    outcome: Option<Result<T, E>>,
    // Set by the first resolve/reject/adopt; later calls are no-ops even while
    // an adopted source is still pending.
    claimed: bool,
    // Shared with the rejection tracker, which may outlive this deferred.
    observed: Rc<Cell<bool>>,
    reactions: Vec<Reaction<T, E>>,
    upstream: Vec<Rc<dyn Upstream>>,
}

type Shared<T, E> = Rc<RefCell<Inner<T, E>>>;

/// A deferred of any type, seen as a node in the keep-alive graph.
pub(crate) trait Upstream {
    fn upstream(&self) -> Vec<Rc<dyn Upstream>>;
}

impl<T: 'static, E: 'static> Upstream for RefCell<Inner<T, E>> {
    fn upstream(&self) -> Vec<Rc<dyn Upstream>> {
        self.try_borrow()
            .map(|inner| inner.upstream.clone())
            .unwrap_or_default()
    }
}

fn address(node: &Rc<dyn Upstream>) -> *const () {
    Rc::as_ptr(node) as *const ()
}

/// Returns true if `from` keeps `target` alive, directly or through other
/// pending deferreds.
fn keeps_alive(from: Rc<dyn Upstream>, target: *const ()) -> bool {
    let mut seen = HashSet::new();
    let mut stack = vec![from];
    while let Some(node) = stack.pop() {
        let at = address(&node);
        if at == target {
            return true;
        }
        if seen.insert(at) {
            stack.extend(node.upstream());
        }
    }
    false
}

/// A settle-once container for an eventually available value or error.
///
/// # Examples
///
/// ```
/// use event_runtime::{Deferred, EventLoop};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let mut event_loop = EventLoop::deterministic();
/// let handle = event_loop.handle();
/// let seen = Rc::new(Cell::new(0));
///
/// let deferred: Deferred<i32, String> = Deferred::new(&handle, |resolve, _reject| {
///     resolve.resolve(42);
/// });
///
/// let s = seen.clone();
/// let _chained = deferred.map(move |v| s.set(v + 1));
///
/// // Reactions never run inline.
/// assert_eq!(seen.get(), 0);
/// event_loop.run_until_idle();
/// assert_eq!(seen.get(), 43);
/// ```
pub struct Deferred<T, E> {
    inner: Shared<T, E>,
    handle: LoopHandle,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            handle: self.handle.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Deferred<T, E>
where
    T: fmt::Debug,
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Deferred")
            .field("id", &inner.id)
            .field("outcome", &inner.outcome)
            .field("reactions", &inner.reactions.len())
            .finish()
    }
}

/// Capability that fulfills a [`Deferred`].
pub struct Resolve<T, E> {
    inner: Shared<T, E>,
    handle: LoopHandle,
}

/// Capability that rejects a [`Deferred`].
pub struct Reject<T, E> {
    inner: Shared<T, E>,
    handle: LoopHandle,
}

impl<T, E> Clone for Resolve<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            handle: self.handle.clone(),
        }
    }
}

impl<T, E> Clone for Reject<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            handle: self.handle.clone(),
        }
    }
}

impl<T, E> Resolve<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    /// Fulfills the deferred with `value`.
    ///
    /// Returns false, changing nothing, if the deferred was already resolved,
    /// rejected, or is following another deferred.
    pub fn resolve(&self, value: T) -> bool {
        claim(&self.inner) && settle(&self.inner, &self.handle, Ok(value))
    }

    /// Makes the deferred follow `source`, settling the same way once it does.
    ///
    /// Returns false if the deferred was already resolved or rejected.
    pub fn adopt(&self, source: Deferred<T, E>) -> bool {
        claim(&self.inner) && {
            adopt(&self.inner, &self.handle, source);
            true
        }
    }
}

impl<T, E> Reject<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    /// Rejects the deferred with `error`.
    ///
    /// Returns false, changing nothing, if the deferred was already resolved
    /// or rejected.
    pub fn reject(&self, error: E) -> bool {
        claim(&self.inner) && settle(&self.inner, &self.handle, Err(error))
    }
}

/// Marks the deferred as resolved-or-resolving; false if it already was.
fn claim<T, E>(inner: &Shared<T, E>) -> bool {
    let mut state = inner.borrow_mut();
    if state.claimed || state.outcome.is_some() {
        return false;
    }
    state.claimed = true;
    true
}

/// Stores the outcome and queues every registered reaction as a microtask.
fn settle<T, E>(inner: &Shared<T, E>, handle: &LoopHandle, outcome: Result<T, E>) -> bool
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    let (id, reactions, upstream, observed) = {
        let mut state = inner.borrow_mut();
        if state.outcome.is_some() {
            return false;
        }
        state.claimed = true;
        state.outcome = Some(outcome.clone());
        (
            state.id,
            std::mem::take(&mut state.reactions),
            std::mem::take(&mut state.upstream),
            Rc::clone(&state.observed),
        )
    };
    drop(upstream);

    tracing::trace!(
        deferred = id,
        fulfilled = outcome.is_ok(),
        reactions = reactions.len(),
        "deferred settled"
    );

    if let Err(error) = &outcome {
        if !observed.get() {
            handle.rejections().track(id, format!("{:?}", error), observed);
        }
    }

    for reaction in reactions {
        let outcome = outcome.clone();
        handle.enqueue_reaction(Microtask::new(move || reaction(outcome)));
    }
    true
}

/// Makes `inner` settle with whatever `source` settles with.
fn adopt<T, E>(inner: &Shared<T, E>, handle: &LoopHandle, source: Deferred<T, E>)
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    // Following a deferred that already follows this one would never settle
    // and would keep both alive forever.
    if keeps_alive(source.as_dependency(), Rc::as_ptr(inner) as *const ()) {
        tracing::warn!(deferred = source.id(), "deferred cannot adopt itself; it stays pending");
        return;
    }
    let id = inner.borrow().id;
    inner.borrow_mut().upstream.push(source.as_dependency());
    let target = Rc::downgrade(inner);
    let handle = handle.clone();
    source.attach(Box::new(move |outcome| {
        settle_weak(&target, id, &handle, Resolution::Settle(outcome));
    }));
}

/// Settles a reaction's child, if it is still alive.
///
/// A rejection that reaches a child nobody holds any more is recorded as
/// unhandled, since no consumer can ever observe it.
fn settle_weak<U, F>(
    target: &Weak<RefCell<Inner<U, F>>>,
    id: u64,
    handle: &LoopHandle,
    resolution: Resolution<U, F>,
) where
    U: Clone + 'static,
    F: Clone + fmt::Debug + 'static,
{
    match (target.upgrade(), resolution) {
        (Some(inner), Resolution::Settle(outcome)) => {
            settle(&inner, handle, outcome);
        }
        (Some(inner), Resolution::Adopt(source)) => {
            if claim(&inner) {
                adopt(&inner, handle, source);
            }
        }
        (None, Resolution::Settle(Err(error))) => {
            handle.rejections().track_orphan(id, format!("{:?}", error));
        }
        (None, _) => {}
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    fn pending(handle: &LoopHandle) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                id: handle.next_deferred_id(),
                outcome: None,
                claimed: false,
                observed: Rc::new(Cell::new(false)),
                reactions: Vec::new(),
                upstream: Vec::new(),
            })),
            handle: handle.clone(),
        }
    }

    /// Creates a deferred and runs `executor` synchronously with its
    /// resolve and reject capabilities.
    ///
    /// Only the first resolve or reject call has any effect.
    pub fn new<X>(handle: &LoopHandle, executor: X) -> Self
    where
        X: FnOnce(Resolve<T, E>, Reject<T, E>),
    {
        let (deferred, resolve, reject) = Self::with_resolvers(handle);
        executor(resolve, reject);
        deferred
    }

    /// Creates a pending deferred together with its capabilities.
    pub fn with_resolvers(handle: &LoopHandle) -> (Self, Resolve<T, E>, Reject<T, E>) {
        let deferred = Self::pending(handle);
        let resolve = Resolve {
            inner: Rc::clone(&deferred.inner),
            handle: handle.clone(),
        };
        let reject = Reject {
            inner: Rc::clone(&deferred.inner),
            handle: handle.clone(),
        };
        (deferred, resolve, reject)
    }

    /// Creates a deferred that is already fulfilled with `value`.
    pub fn resolved(handle: &LoopHandle, value: T) -> Self {
        let deferred = Self::pending(handle);
        settle(&deferred.inner, handle, Ok(value));
        deferred
    }

    /// Creates a deferred that is already rejected with `error`.
    ///
    /// Like any rejection, it is reported as unhandled if no reaction is
    /// attached before the next microtask checkpoint.
    pub fn rejected(handle: &LoopHandle, error: E) -> Self {
        let deferred = Self::pending(handle);
        settle(&deferred.inner, handle, Err(error));
        deferred
    }

    /// Identifier used in diagnostics.
    pub fn id(&self) -> u64 {
        self.inner.borrow().id
    }

    /// The loop this deferred queues its reactions on.
    pub fn handle(&self) -> &LoopHandle {
        &self.handle
    }

    /// Current state.
    pub fn state(&self) -> DeferredState {
        match &self.inner.borrow().outcome {
            None => DeferredState::Pending,
            Some(Ok(_)) => DeferredState::Fulfilled,
            Some(Err(_)) => DeferredState::Rejected,
        }
    }

    /// Returns true while the deferred has not settled.
    pub fn is_pending(&self) -> bool {
        self.state() == DeferredState::Pending
    }

    /// The fulfillment value, if fulfilled.
    pub fn value(&self) -> Option<T> {
        match &self.inner.borrow().outcome {
            Some(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// The rejection error, if rejected.
    ///
    /// Inspecting the error does not count as handling the rejection.
    pub fn error(&self) -> Option<E> {
        match &self.inner.borrow().outcome {
            Some(Err(error)) => Some(error.clone()),
            _ => None,
        }
    }

    /// The settled outcome, if any.
    pub fn outcome(&self) -> Option<Result<T, E>> {
        self.inner.borrow().outcome.clone()
    }

    /// Registers a raw reaction, marking this deferred as observed.
    ///
    /// If the deferred has already settled the reaction is queued as a
    /// microtask right away; it never runs inside this call.
    pub(crate) fn attach(&self, reaction: Reaction<T, E>) {
        let mut state = self.inner.borrow_mut();
        state.observed.set(true);
        let settled = state.outcome.clone();
        match settled {
            None => state.reactions.push(reaction),
            Some(outcome) => {
                drop(state);
                self.handle
                    .enqueue_reaction(Microtask::new(move || reaction(outcome)));
            }
        }
    }

    /// Records `dependency` as something the returned deferred keeps alive.
    pub(crate) fn retain(&self, dependency: Rc<dyn Upstream>) {
        self.inner.borrow_mut().upstream.push(dependency);
    }

    pub(crate) fn as_dependency(&self) -> Rc<dyn Upstream> {
        Rc::clone(&self.inner) as Rc<dyn Upstream>
    }

    pub(crate) fn downgrade(&self) -> Weak<RefCell<Inner<T, E>>> {
        Rc::downgrade(&self.inner)
    }

    /// Settles a deferred through a weak reference, as combinators do.
    pub(crate) fn settle_weak(
        target: &Weak<RefCell<Inner<T, E>>>,
        id: u64,
        handle: &LoopHandle,
        outcome: Result<T, E>,
    ) {
        settle_weak(target, id, handle, Resolution::Settle(outcome));
    }

    fn chain<U, F, R>(&self, react: R) -> Deferred<U, F>
    where
        U: Clone + 'static,
        F: Clone + fmt::Debug + 'static,
        R: FnOnce(Result<T, E>) -> Resolution<U, F> + 'static,
    {
        let child = Deferred::<U, F>::pending(&self.handle);
        child.retain(self.as_dependency());

        let target = child.downgrade();
        let child_id = child.id();
        let handle = self.handle.clone();
        self.attach(Box::new(move |outcome| {
            let resolution = react(outcome);
            settle_weak(&target, child_id, &handle, resolution);
        }));
        child
    }

    /// Attaches optional fulfillment and rejection handlers.
    ///
    /// Returns a new deferred settled with the handler's result. A missing
    /// handler passes the value or error through unchanged (converted with
    /// `Into`), so `then(None, None)` mirrors this deferred exactly.
    ///
    /// The handlers always run as microtasks, even if this deferred has
    /// already settled.
    pub fn then<U, F>(
        &self,
        on_fulfilled: Option<Handler<T, U, F>>,
        on_rejected: Option<Handler<E, U, F>>,
    ) -> Deferred<U, F>
    where
        T: Into<U>,
        E: Into<F>,
        U: Clone + 'static,
        F: Clone + fmt::Debug + 'static,
    {
        self.chain(move |outcome| {
            let result = match outcome {
                Ok(value) => match on_fulfilled {
                    Some(handler) => handler(value),
                    None => Ok(value.into()),
                },
                Err(error) => match on_rejected {
                    Some(handler) => handler(error),
                    None => Err(error.into()),
                },
            };
            Resolution::Settle(result)
        })
    }

    /// Attaches both handlers, each producing the child's outcome.
    pub fn then_either<U, F, OnOk, OnErr>(&self, on_fulfilled: OnOk, on_rejected: OnErr) -> Deferred<U, F>
    where
        U: Clone + 'static,
        F: Clone + fmt::Debug + 'static,
        OnOk: FnOnce(T) -> Result<U, F> + 'static,
        OnErr: FnOnce(E) -> Result<U, F> + 'static,
    {
        self.chain(move |outcome| {
            Resolution::Settle(match outcome {
                Ok(value) => on_fulfilled(value),
                Err(error) => on_rejected(error),
            })
        })
    }

    /// Transforms the fulfillment value; errors pass through.
    pub fn map<U, M>(&self, f: M) -> Deferred<U, E>
    where
        U: Clone + 'static,
        M: FnOnce(T) -> U + 'static,
    {
        self.chain(move |outcome| Resolution::Settle(outcome.map(f)))
    }

    /// Runs a fallible step on the fulfillment value; errors pass through.
    pub fn and_then<U, M>(&self, f: M) -> Deferred<U, E>
    where
        U: Clone + 'static,
        M: FnOnce(T) -> Result<U, E> + 'static,
    {
        self.chain(move |outcome| Resolution::Settle(outcome.and_then(f)))
    }

    /// Runs a step that itself produces a deferred, and follows it.
    ///
    /// The returned deferred settles when the one produced by `f` settles.
    pub fn then_deferred<U, M>(&self, f: M) -> Deferred<U, E>
    where
        U: Clone + 'static,
        M: FnOnce(T) -> Deferred<U, E> + 'static,
    {
        self.chain(move |outcome| match outcome {
            Ok(value) => Resolution::Adopt(f(value)),
            Err(error) => Resolution::Settle(Err(error)),
        })
    }

    /// Handles a rejection; fulfillment values pass through.
    ///
    /// Equivalent to `then(None, Some(on_rejected))`.
    pub fn catch<F, C>(&self, on_rejected: C) -> Deferred<T, F>
    where
        F: Clone + fmt::Debug + 'static,
        C: FnOnce(E) -> Result<T, F> + 'static,
    {
        self.chain(move |outcome| {
            Resolution::Settle(match outcome {
                Ok(value) => Ok(value),
                Err(error) => on_rejected(error),
            })
        })
    }

    /// Runs `on_settled` whichever way this deferred settles, then passes the
    /// original outcome through unchanged.
    pub fn finally<S>(&self, on_settled: S) -> Deferred<T, E>
    where
        S: FnOnce() + 'static,
    {
        self.chain(move |outcome| {
            on_settled();
            Resolution::Settle(outcome)
        })
    }
}
