//! `cancelable`, `cancel`, `timeout`, `first_of` (`spec.md` §4.2): the
//! crate's defining feature. A `cancelable` block allocates its own
//! scope frame; anything it (transitively) registers through
//! `await_op`/`no_await` is tagged under that frame, so canceling the
//! block — explicitly via `cancel()`, or implicitly by losing a
//! `first_of` race — tears down every outstanding registration beneath
//! it in one sweep.
//!
//! Dropping is the mechanism. A `cancelable` block that is still
//! polling when it is dropped (the loser of a race, or nested inside an
//! outer block that is itself dropped) drops its inner future — which,
//! being a state machine, drops every `await_op`/`no_await` it was
//! suspended in — and then sweeps its own scope for anything that
//! wasn't tied to a dropped future at all (a detached `no_await`
//! subscription, a promise listener registered from elsewhere). This is
//! the Rust-native reading of the teacher's `async_handler.rs`
//! `cancel(scope)` dispatch: where the teacher has to walk a thread
//! registry and interrupt parked threads, here most of the work is
//! already done by `Drop` — the registry only has to catch what Drop
//! didn't.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::driver::{current_driver, current_scope, with_scope};
use crate::error::{Exn, Try};
use crate::scope::Scope;

fn sweep_scope(scope: &Scope) {
    let cleanups = current_driver().sweep(scope);
    for cleanup in cleanups {
        cleanup();
    }
}

/// Cancel the current `cancelable` block — every registration tagged
/// under the ambient scope is swept and its cleanup run.
pub fn cancel() {
    cancel_scope(&current_scope());
}

/// Cancel a specific, previously-captured scope. Needed for the cases
/// `cancel()` can't reach: a detached subscription or listener
/// registered from code that has since returned, with no live `Future`
/// left for `Drop` to walk.
pub fn cancel_scope(scope: &Scope) {
    sweep_scope(scope);
}

struct Cancelable<T> {
    scope: Scope,
    inner: Option<Pin<Box<dyn Future<Output = Try<T>>>>>,
}

impl<T> Future for Cancelable<T> {
    type Output = Try<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Try<T>> {
        let this = self.get_mut();
        let scope = this.scope.clone();
        let result = {
            let inner = this
                .inner
                .as_mut()
                .expect("Cancelable polled after completion");
            with_scope(scope, || inner.as_mut().poll(cx))
        };
        if result.is_ready() {
            this.inner = None;
            sweep_scope(&this.scope);
        }
        result
    }
}

impl<T> Drop for Cancelable<T> {
    fn drop(&mut self) {
        if self.inner.take().is_some() {
            sweep_scope(&self.scope);
        }
    }
}

/// Run `body` under a fresh scope frame. Every `await_op`/`no_await`
/// `body` performs, directly or through anything it calls, is tagged
/// under that frame — `cancel()` called from inside `body`, or this
/// future being dropped before `body` finishes, tears all of it down.
pub fn cancelable<T, Fut>(body: Fut) -> impl Future<Output = Try<T>>
where
    Fut: Future<Output = Try<T>> + 'static,
    T: 'static,
{
    let driver = current_driver();
    let parent = current_scope();
    let frame = driver.fresh_frame();
    Cancelable {
        scope: parent.child(frame),
        inner: Some(Box::pin(body)),
    }
}

fn cancelable_boxed<T: 'static>(
    body: Pin<Box<dyn Future<Output = Try<T>>>>,
) -> Pin<Box<dyn Future<Output = Try<T>>>> {
    Box::pin(cancelable(body))
}

struct FirstOf<T> {
    branches: Vec<Pin<Box<dyn Future<Output = Try<T>>>>>,
}

impl<T> Future for FirstOf<T> {
    type Output = Try<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Try<T>> {
        let this = self.get_mut();
        // One pass isn't enough: a branch polled early in the vec can
        // depend on a promise/channel a later branch resolves
        // synchronously within this same call. Re-scan until a winner
        // turns up; a synchronous cascade can only chain through as
        // many branches as there are, so that many rounds always
        // suffice.
        for _ in 0..this.branches.len().max(1) {
            for branch in this.branches.iter_mut() {
                if let Poll::Ready(res) = branch.as_mut().poll(cx) {
                    // Dropping every branch (the winner included — its
                    // work is already done) tears down every loser's
                    // scope.
                    this.branches.clear();
                    return Poll::Ready(res);
                }
            }
        }
        Poll::Pending
    }
}

/// Race `branches` against each other. The first to resolve (value or
/// error) wins; every other branch is dropped, canceling whatever it
/// had outstanding. Each branch is automatically wrapped in its own
/// [`cancelable`] scope, so this is a building block for `timeout` and
/// any other "run these concurrently, keep only the first" combinator.
pub async fn first_of<T: 'static>(branches: Vec<Pin<Box<dyn Future<Output = Try<T>>>>>) -> Try<T> {
    FirstOf {
        branches: branches.into_iter().map(cancelable_boxed).collect(),
    }
    .await
}

/// Run `body`, racing it against a timer. If `body` hasn't resolved
/// within `duration`, `body` is canceled and this resolves to an
/// ordinary error (not a `Cancel` — the caller asked for a bounded
/// wait, this isn't the unwinding case `ExnKind::Cancel` denotes).
pub async fn timeout<T, Fut>(duration: Duration, body: Fut) -> Try<T>
where
    Fut: Future<Output = Try<T>> + 'static,
    T: 'static,
{
    let body_branch: Pin<Box<dyn Future<Output = Try<T>>>> = Box::pin(body);
    let timeout_branch: Pin<Box<dyn Future<Output = Try<T>>>> = Box::pin(async move {
        crate::timer::wait(duration).await?;
        Err(Exn::error(format!("timed out after {duration:?}")))
    });
    first_of(vec![body_branch, timeout_branch]).await
}
