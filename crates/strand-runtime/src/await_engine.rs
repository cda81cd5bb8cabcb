//! The await engine (`spec.md` §4.1): the single primitive every other
//! suspension in this crate is built from.
//!
//! The teacher's `async_handler.rs` bridges a C-style effect handler
//! (`do_await`/`no_await`/`cancel`/`async_iox`) onto its OS-thread pool.
//! This module keeps that same four-operation surface but bridges it
//! onto a real `Future`: `await_op` IS `do_await` — there is no separate
//! interception layer, because polling a Rust `Future` already gives
//! each suspension point its own independently-resumable state machine,
//! which is exactly what the teacher's handler had to fake with thread
//! parking. See `DESIGN.md` for the fuller account of this substitution.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::driver::{current_driver, current_scope};
use crate::error::{Exn, Try};
use crate::scope::{Cleanup, EntryId};

/// Delivers an operation's outcome back into the engine. `done = false`
/// means "more deliveries may follow" (used by [`await_to_channel`]'s
/// streaming setups); every other caller always passes `true`.
pub type Resolve<T> = Box<dyn FnOnce(Try<T>, bool)>;

/// Arms a host-side (or promise/channel-side) operation and hands back
/// an optional cleanup to run if the registration is torn down by
/// `cancel` before `Resolve` is ever called.
pub type Setup<T> = Box<dyn FnOnce(Resolve<T>) -> Option<Cleanup>>;

enum State<T> {
    Pending(Option<Box<dyn FnOnce(Resolve<T>) -> Option<Cleanup>>>),
    Armed {
        id: EntryId,
        cell: Rc<RefCell<Option<Try<T>>>>,
    },
    Done,
}

/// The future returned by [`await_op`].
pub struct AwaitOp<T> {
    state: State<T>,
}

/// The engine's core primitive: allocate a child scope, register
/// `(scope, cleanup)`, invoke `setup`, and resume with whatever it
/// eventually delivers through [`Resolve`] — exactly once.
///
/// If `setup` calls `Resolve` synchronously (before returning), the
/// first `poll` resolves immediately without ever returning `Pending`.
pub fn await_op<T, S>(setup: S) -> AwaitOp<T>
where
    S: FnOnce(Resolve<T>) -> Option<Cleanup> + 'static,
    T: 'static,
{
    AwaitOp {
        state: State::Pending(Some(Box::new(setup))),
    }
}

impl<T> Future for AwaitOp<T> {
    type Output = Try<T>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Try<T>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                State::Pending(setup_slot) => {
                    let setup = setup_slot
                        .take()
                        .expect("AwaitOp polled twice while still pending setup");
                    let driver = current_driver();
                    let parent = current_scope();
                    let frame = driver.fresh_frame();
                    let cscope = parent.child(frame);
                    let id = driver.register(cscope, Box::new(|| {}));

                    let cell: Rc<RefCell<Option<Try<T>>>> = Rc::new(RefCell::new(None));
                    // Holds whatever cleanup `setup` hands back, shared
                    // between the two paths that can complete this
                    // entry: `resolve` firing normally, or the registry
                    // sweeping it out from under us (`cancel`/`cancel_scope`
                    // reaching in from outside). Whichever happens first
                    // takes it, so it never runs twice.
                    let user_cleanup: Rc<RefCell<Option<Cleanup>>> = Rc::new(RefCell::new(None));

                    let cell_cb = cell.clone();
                    let user_cleanup_cb = user_cleanup.clone();
                    let driver_cb = driver.clone();
                    let resolve: Resolve<T> = Box::new(move |res, done| {
                        if !driver_cb.contains(id) {
                            return;
                        }
                        if done {
                            driver_cb.take(id);
                            if res.is_err() {
                                if let Some(cleanup) = user_cleanup_cb.borrow_mut().take() {
                                    cleanup();
                                }
                            }
                        }
                        *cell_cb.borrow_mut() = Some(res);
                    });

                    // The registry's own cleanup for this entry: if
                    // `cancel`/`cancel_scope` sweeps it before `resolve`
                    // ever fires, run whatever cleanup `setup` armed and
                    // deliver a cancel outcome into the cell exactly as
                    // if `resolve` itself had produced it — this is what
                    // lets a suspended `await_op` be torn down from
                    // outside its own call stack instead of hanging.
                    let cell_sweep = cell.clone();
                    let user_cleanup_sweep = user_cleanup.clone();
                    let sweep_cleanup: Cleanup = Box::new(move || {
                        if let Some(cleanup) = user_cleanup_sweep.borrow_mut().take() {
                            cleanup();
                        }
                        *cell_sweep.borrow_mut() = Some(Err(Exn::cancel()));
                    });
                    driver.set_cleanup(id, sweep_cleanup);

                    if let Some(cleanup) = setup(resolve) {
                        *user_cleanup.borrow_mut() = Some(cleanup);
                    }
                    this.state = State::Armed { id, cell };
                }
                State::Armed { cell, .. } => {
                    if let Some(res) = cell.borrow_mut().take() {
                        this.state = State::Done;
                        return Poll::Ready(res);
                    }
                    return Poll::Pending;
                }
                State::Done => panic!("AwaitOp polled after completion"),
            }
        }
    }
}

/// Registers `setup` and runs `f` every time it delivers an outcome,
/// without suspending the caller — `spec.md`'s `no_await`. Unlike
/// [`await_op`], `f` may be called more than once (`done = false`
/// deliveries keep the registration alive); used directly by
/// [`await_to_channel`] and available for any fire-and-forget
/// subscription.
pub fn no_await<T, S, F>(setup: S, f: F)
where
    S: FnOnce(Resolve<T>) -> Option<Cleanup>,
    F: Fn(Try<T>) + 'static,
    T: 'static,
{
    let driver = current_driver();
    let parent = current_scope();
    let frame = driver.fresh_frame();
    let cscope = parent.child(frame);
    let id = driver.register(cscope, Box::new(|| {}));

    let f = Rc::new(f);
    let user_cleanup: Rc<RefCell<Option<Cleanup>>> = Rc::new(RefCell::new(None));

    let f_cb = f.clone();
    let user_cleanup_cb = user_cleanup.clone();
    let driver_cb = driver.clone();
    let resolve: Resolve<T> = Box::new(move |res, done| {
        if !driver_cb.contains(id) {
            return;
        }
        if done {
            driver_cb.take(id);
            if res.is_err() {
                if let Some(cleanup) = user_cleanup_cb.borrow_mut().take() {
                    cleanup();
                }
            }
        }
        f_cb(res);
    });

    // Same externally-triggered-teardown path as `await_op`: a sweep
    // that reaches this entry before `resolve` ever fires runs the
    // user cleanup and delivers a cancel outcome to `f`, once.
    let f_sweep = f.clone();
    let user_cleanup_sweep = user_cleanup.clone();
    let sweep_cleanup: Cleanup = Box::new(move || {
        if let Some(cleanup) = user_cleanup_sweep.borrow_mut().take() {
            cleanup();
        }
        f_sweep(Err(Exn::cancel()));
    });
    driver.set_cleanup(id, sweep_cleanup);

    if let Some(cleanup) = setup(resolve) {
        *user_cleanup.borrow_mut() = Some(cleanup);
    }
}

/// Adapts a host callback of shape `FnOnce()` (no value, no error) into
/// `Try<()>`.
pub async fn await0<S>(setup: S) -> Try<()>
where
    S: FnOnce(Box<dyn FnOnce()>) -> Option<Cleanup> + 'static,
{
    await_op(move |resolve| setup(Box::new(move || resolve(Ok(()), true)))).await
}

/// Adapts a host callback of shape `FnOnce(T)` (a value, no error path)
/// into `Try<T>`.
pub async fn await1<T, S>(setup: S) -> Try<T>
where
    T: 'static,
    S: FnOnce(Box<dyn FnOnce(T)>) -> Option<Cleanup> + 'static,
{
    await_op(move |resolve| setup(Box::new(move |v| resolve(Ok(v), true)))).await
}

/// Adapts a Node-style `FnOnce(Option<String>)` error-only callback
/// into `Try<()>`.
pub async fn await_exn0<S>(setup: S) -> Try<()>
where
    S: FnOnce(Box<dyn FnOnce(Option<String>)>) -> Option<Cleanup> + 'static,
{
    await_op(move |resolve| {
        setup(Box::new(move |err| match err {
            Some(message) => resolve(Err(Exn::error(message)), true),
            None => resolve(Ok(()), true),
        }))
    })
    .await
}

/// Adapts a Node-style `FnOnce(Option<String>, Option<T>)` error-or-value
/// callback into `Try<T>`.
pub async fn await_exn1<T, S>(setup: S) -> Try<T>
where
    T: 'static,
    S: FnOnce(Box<dyn FnOnce(Option<String>, Option<T>)>) -> Option<Cleanup> + 'static,
{
    await_op(move |resolve| {
        setup(Box::new(move |err, value| match err {
            Some(message) => resolve(Err(Exn::error(message)), true),
            None => resolve(
                Ok(value.expect(
                    "await_exn1: host callback reported no error but also no value",
                )),
                true,
            ),
        }))
    })
    .await
}

/// Runs a synchronous operation, mapping its `Result::Err` into `Exn`.
/// There is nothing to suspend on here — this exists so fallible
/// synchronous host calls can be folded into the same `Try<T>` surface
/// as everything suspended.
pub fn async_io<T, E: std::fmt::Display>(f: impl FnOnce() -> Result<T, E>) -> Try<T> {
    f().map_err(|e| Exn::error(e.to_string()))
}

/// Runs a synchronous operation that is asserted not to fail. Kept
/// separate from plain function calls so call sites read the same way
/// as `async_io` at a glance.
pub fn async_io_noexn<T>(f: impl FnOnce() -> T) -> T {
    f()
}

/// Adapts a streaming host setup (a source that may call its callback
/// any number of times, e.g. a subscription) into a
/// [`crate::channel::Channel`] that receives one value per delivery.
/// The registration lives until the enclosing scope is canceled, at
/// which point `setup`'s cleanup (if any) unsubscribes it.
pub fn await_to_channel<T, S>(setup: S) -> crate::channel::Channel<T>
where
    T: 'static,
    S: FnOnce(Box<dyn Fn(T)>) -> Option<Cleanup> + 'static,
{
    let channel = crate::channel::Channel::new();
    let channel_cb = channel.clone();
    no_await(
        move |resolve| setup(Box::new(move |v| resolve(Ok(v), false))),
        move |res| {
            if let Ok(value) = res {
                channel_cb.emit(value);
            }
        },
    );
    channel
}
