//! `Channel<T>` (`spec.md` §4.5): a single-producer/single-consumer
//! rendezvous queue with synchronous delivery. Distinct from the
//! teacher's `channel.rs`, which backs an MPSC model with
//! `Mutex`/`Condvar` so multiple OS threads can block on `send`/`recv`
//! — this channel runs on one thread, so `emit` never blocks and
//! `receive` is a suspension (`await_op`), not a lock wait.
//!
//! A channel is always in exactly one of three states: `Empty`, holding
//! buffered `Values` nobody has received yet, or holding `Waiting`
//! receivers with nothing buffered. It can never hold both.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::await_engine::await_op;
use crate::error::Try;
use crate::scope::Cleanup;

enum State<T> {
    Empty,
    Values(VecDeque<T>),
    Waiting(VecDeque<(u64, Box<dyn FnOnce(T)>)>),
}

struct Inner<T> {
    state: State<T>,
    next_waiter_id: u64,
}

/// A cloneable handle to a shared channel. Cloning shares the queue —
/// there is no separate sender/receiver split, since `emit`/`receive`
/// are both called on the same handle type throughout this crate.
pub struct Channel<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Channel<T> {
    pub fn new() -> Self {
        Channel {
            inner: Rc::new(RefCell::new(Inner {
                state: State::Empty,
                next_waiter_id: 0,
            })),
        }
    }

    /// Take a buffered value without suspending. `None` whether the
    /// channel is empty or has receivers already waiting on it.
    pub fn try_receive(&self) -> Option<T> {
        let mut inner = self.inner.borrow_mut();
        match &mut inner.state {
            State::Values(values) => {
                let value = values.pop_front();
                if values.is_empty() {
                    inner.state = State::Empty;
                }
                value
            }
            _ => None,
        }
    }

    /// Deliver `value`. If a receiver is already waiting, it runs
    /// synchronously, in this call, before `emit` returns — `emit`
    /// itself never suspends. Otherwise the value is buffered for the
    /// next `receive`/`try_receive`.
    pub fn emit(&self, value: T) {
        let waiter = {
            let mut inner = self.inner.borrow_mut();
            match &mut inner.state {
                State::Waiting(waiters) => {
                    let waiter = waiters.pop_front().map(|(_, cb)| cb);
                    if waiters.is_empty() {
                        inner.state = State::Empty;
                    }
                    waiter
                }
                _ => None,
            }
        };
        match waiter {
            Some(cb) => cb(value),
            None => {
                let mut inner = self.inner.borrow_mut();
                match &mut inner.state {
                    State::Values(values) => values.push_back(value),
                    State::Empty => {
                        let mut values = VecDeque::new();
                        values.push_back(value);
                        inner.state = State::Values(values);
                    }
                    State::Waiting(_) => unreachable!("waiters already drained above"),
                }
            }
        }
    }

    /// Receive the next value, suspending if none is buffered.
    /// Cancelable: if the enclosing scope is canceled while waiting,
    /// this registration is withdrawn before it can ever fire.
    pub async fn receive(&self) -> Try<T> {
        self.receivex(true).await
    }

    /// `receive`, with cancellation behavior explicit. Passing
    /// `cancelable = false` registers no cleanup, so an enclosing
    /// `cancel` cannot withdraw this particular wait — used internally
    /// where abandoning a receive mid-flight would leave the channel in
    /// an inconsistent state.
    pub async fn receivex(&self, cancelable: bool) -> Try<T> {
        if let Some(value) = self.try_receive() {
            return Ok(value);
        }
        let channel = self.clone();
        let channel_for_cleanup = self.clone();
        await_op(move |resolve| {
            let id = channel.push_waiter(Box::new(move |v| resolve(Ok(v), true)));
            if cancelable {
                Some(Box::new(move || channel_for_cleanup.remove_waiter(id)) as Cleanup)
            } else {
                None
            }
        })
        .await
    }

    fn push_waiter(&self, cb: Box<dyn FnOnce(T)>) -> u64 {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_waiter_id;
        inner.next_waiter_id += 1;
        match &mut inner.state {
            State::Waiting(waiters) => waiters.push_back((id, cb)),
            State::Empty => {
                let mut waiters = VecDeque::new();
                waiters.push_back((id, cb));
                inner.state = State::Waiting(waiters);
            }
            State::Values(_) => unreachable!("push_waiter called while values are buffered"),
        }
        id
    }

    fn remove_waiter(&self, id: u64) {
        let mut inner = self.inner.borrow_mut();
        if let State::Waiting(waiters) = &mut inner.state {
            waiters.retain(|(wid, _)| *wid != id);
            if waiters.is_empty() {
                inner.state = State::Empty;
            }
        }
    }
}
