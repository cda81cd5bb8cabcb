//! `Promise<T>` (`spec.md` §4.4): a single-fire value cell with
//! ordered listeners. Where the teacher would protect shared state with
//! `Arc<Mutex<..>>` and wake blocked threads via `Condvar`, a promise
//! here is `Rc<RefCell<..>>` and "waking" a listener is just calling it
//! — there is only one thread, so there is nothing to block.

use std::cell::RefCell;
use std::rc::Rc;

use crate::await_engine::await_op;
use crate::error::{RuntimeError, Try};

enum State<T> {
    Awaiting(Vec<Box<dyn FnOnce(T)>>),
    Resolved(T),
}

/// A value that starts `Awaiting` and transitions to `Resolved` at most
/// once. `await` suspends until resolution; `try_await` never
/// suspends. Cloning shares the same underlying cell.
pub struct Promise<T> {
    state: Rc<RefCell<State<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            state: self.state.clone(),
        }
    }
}

impl<T: Clone + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> Promise<T> {
    pub fn new() -> Self {
        Promise {
            state: Rc::new(RefCell::new(State::Awaiting(Vec::new()))),
        }
    }

    /// The value if already resolved, without suspending.
    pub fn try_await(&self) -> Option<T> {
        match &*self.state.borrow() {
            State::Resolved(value) => Some(value.clone()),
            State::Awaiting(_) => None,
        }
    }

    /// Suspend until the promise resolves. Resolves immediately, without
    /// registering anything, if it already has.
    pub async fn get(&self) -> Try<T> {
        if let Some(value) = self.try_await() {
            return Ok(value);
        }
        let state = self.state.clone();
        await_op(move |resolve| {
            let mut guard = state.borrow_mut();
            match &mut *guard {
                State::Resolved(value) => {
                    let value = value.clone();
                    drop(guard);
                    resolve(Ok(value), true);
                }
                State::Awaiting(listeners) => {
                    listeners.push(Box::new(move |v| resolve(Ok(v), true)));
                }
            }
            None
        })
        .await
    }

    /// Resolve the promise, firing every registered listener in the
    /// order it was registered. Fails if the promise was already
    /// resolved — `Promise` is single-fire, never a cell you can
    /// overwrite.
    pub fn resolve(&self, value: T) -> Result<(), RuntimeError> {
        let listeners = {
            let mut guard = self.state.borrow_mut();
            match &*guard {
                State::Resolved(_) => return Err(RuntimeError::PromiseAlreadyResolved),
                State::Awaiting(_) => {
                    let previous = std::mem::replace(&mut *guard, State::Resolved(value.clone()));
                    match previous {
                        State::Awaiting(listeners) => listeners,
                        State::Resolved(_) => unreachable!(),
                    }
                }
            }
        };
        for listener in listeners {
            listener(value.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::async_handle;
    use crate::host::TestLoop;

    #[test]
    fn resolve_before_await_returns_immediately() {
        async_handle(TestLoop::new(), || async {
            let p: Promise<i32> = Promise::new();
            p.resolve(7).unwrap();
            assert_eq!(p.get().await.unwrap(), 7);
        })
        .unwrap();
    }

    #[test]
    fn await_before_resolve_suspends_then_resolves() {
        async_handle(TestLoop::new(), || async {
            let p: Promise<i32> = Promise::new();
            let p2 = p.clone();
            p2.resolve(9).unwrap();
            assert_eq!(p.get().await.unwrap(), 9);
        })
        .unwrap();
    }

    #[test]
    fn double_resolve_is_an_error() {
        let p: Promise<i32> = Promise::new();
        p.resolve(1).unwrap();
        assert!(matches!(
            p.resolve(2),
            Err(RuntimeError::PromiseAlreadyResolved)
        ));
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let p: Promise<i32> = Promise::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        {
            let mut guard = p.state.borrow_mut();
            if let State::Awaiting(listeners) = &mut *guard {
                let o1 = order.clone();
                listeners.push(Box::new(move |v| o1.borrow_mut().push((1, v))));
                let o2 = order.clone();
                listeners.push(Box::new(move |v| o2.borrow_mut().push((2, v))));
            }
        }
        p.resolve(42).unwrap();
        assert_eq!(*order.borrow(), vec![(1, 42), (2, 42)]);
    }
}
