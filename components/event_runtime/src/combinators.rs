//! Combinators over several deferreds, and timer-backed deferreds.

use crate::deferred::Deferred;
use crate::handle::LoopHandle;
use loop_types::QueueError;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    /// Fulfills with every input's value, in input order, once all inputs
    /// are fulfilled; rejects with the first rejection.
    ///
    /// An empty input fulfills with an empty vector.
    pub fn all(handle: &LoopHandle, inputs: Vec<Deferred<T, E>>) -> Deferred<Vec<T>, E> {
        if inputs.is_empty() {
            return Deferred::resolved(handle, Vec::new());
        }

        let (result, _, _) = Deferred::<Vec<T>, E>::with_resolvers(handle);
        let slots: Rc<RefCell<Vec<Option<T>>>> = Rc::new(RefCell::new(vec![None; inputs.len()]));
        let remaining = Rc::new(RefCell::new(inputs.len()));

        for (index, input) in inputs.iter().enumerate() {
            result.retain(input.as_dependency());
            let target = result.downgrade();
            let id = result.id();
            let handle = handle.clone();
            let slots = Rc::clone(&slots);
            let remaining = Rc::clone(&remaining);
            input.attach(Box::new(move |outcome| match outcome {
                Ok(value) => {
                    slots.borrow_mut()[index] = Some(value);
                    let mut left = remaining.borrow_mut();
                    *left -= 1;
                    if *left == 0 {
                        let values = slots.borrow_mut().drain(..).flatten().collect();
                        Deferred::settle_weak(&target, id, &handle, Ok(values));
                    }
                }
                Err(error) => Deferred::settle_weak(&target, id, &handle, Err(error)),
            }));
        }
        result
    }

    /// Settles the same way as whichever input settles first.
    ///
    /// An empty input never settles.
    pub fn race(handle: &LoopHandle, inputs: Vec<Deferred<T, E>>) -> Deferred<T, E> {
        let (result, _, _) = Deferred::<T, E>::with_resolvers(handle);
        for input in &inputs {
            result.retain(input.as_dependency());
            let target = result.downgrade();
            let id = result.id();
            let handle = handle.clone();
            input.attach(Box::new(move |outcome| {
                Deferred::settle_weak(&target, id, &handle, outcome);
            }));
        }
        result
    }

    /// Fulfills with every input's outcome once all inputs have settled.
    /// Never rejects.
    pub fn all_settled(handle: &LoopHandle, inputs: Vec<Deferred<T, E>>) -> Deferred<Vec<Result<T, E>>, E> {
        if inputs.is_empty() {
            return Deferred::resolved(handle, Vec::new());
        }

        let (result, _, _) = Deferred::<Vec<Result<T, E>>, E>::with_resolvers(handle);
        let slots: Rc<RefCell<Vec<Option<Result<T, E>>>>> =
            Rc::new(RefCell::new(vec![None; inputs.len()]));
        let remaining = Rc::new(RefCell::new(inputs.len()));

        for (index, input) in inputs.iter().enumerate() {
            result.retain(input.as_dependency());
            let target = result.downgrade();
            let id = result.id();
            let handle = handle.clone();
            let slots = Rc::clone(&slots);
            let remaining = Rc::clone(&remaining);
            input.attach(Box::new(move |outcome| {
                slots.borrow_mut()[index] = Some(outcome);
                let mut left = remaining.borrow_mut();
                *left -= 1;
                if *left == 0 {
                    let outcomes = slots.borrow_mut().drain(..).flatten().collect();
                    Deferred::settle_weak(&target, id, &handle, Ok(outcomes));
                }
            }));
        }
        result
    }

    /// Creates a deferred fulfilled with `value` by a macrotask `delay` from now.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::QueueOverflow`] when the macrotask queue is full.
    pub fn resolve_after(handle: &LoopHandle, delay: Duration, value: T) -> Result<Deferred<T, E>, QueueError> {
        let (deferred, resolve, _) = Deferred::with_resolvers(handle);
        handle.schedule_macrotask(delay, move || {
            resolve.resolve(value);
        })?;
        Ok(deferred)
    }

    /// Races this deferred against a timer that rejects with `error` after
    /// `delay`.
    ///
    /// If this deferred settles first, the timer is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::QueueOverflow`] when the macrotask queue is full.
    pub fn timeout(&self, delay: Duration, error: E) -> Result<Deferred<T, E>, QueueError> {
        let handle = self.handle().clone();
        let (timer, _, reject) = Deferred::<T, E>::with_resolvers(&handle);
        let task = handle.schedule_macrotask(delay, move || {
            reject.reject(error);
        })?;

        let canceller = handle.clone();
        self.attach(Box::new(move |_| {
            canceller.cancel_macrotask(task);
        }));

        Ok(Deferred::race(&handle, vec![self.clone(), timer]))
    }
}
