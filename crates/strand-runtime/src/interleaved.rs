//! `interleavedx`/`interleaved` (`spec.md` §4.6): run a fixed batch of
//! strands concurrently on one thread.
//!
//! The teacher's "internal channel of resumption thunks" design exists
//! to solve a problem Rust's `Future` already solves: each strand needs
//! to suspend and resume independently of the others. Here every strand
//! is itself a polled `Future`, and this module's own `poll` is the
//! "resumption channel" — every call round-robins across whatever
//! strands are still running, which is the same technique
//! `futures::stream::FuturesUnordered` uses internally (there, a
//! per-child waker posts a ready-index into a shared queue; here, since
//! nothing here relies on `Waker::wake` to drive progress — see
//! `driver::block_on` — a plain rescan is equivalent without the
//! bookkeeping).
//!
//! Strands are **not** given a private scope of their own: they run
//! directly under whatever scope was ambient when `interleavedx`/
//! `interleaved` was called (§4.6 step 2 — the strand handler only
//! intercepts `do_await`, it never mints a frame). A bare `cancel()`
//! called from inside one strand therefore reaches every sibling
//! registered under that same scope, not just its own — isolating a
//! batch of strands from the rest of the program is the caller's job,
//! by wrapping the whole call in its own `cancelable { ... }` (`spec.md`
//! §8 S6).

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::cancelable::cancel_scope;
use crate::driver::current_scope;
use crate::error::{dominant, Exn, Try};

type Strand<T> = Pin<Box<dyn Future<Output = Try<T>>>>;

struct Interleaved<T> {
    strands: Vec<Option<Strand<T>>>,
    results: Vec<Option<Try<T>>>,
    remaining: usize,
}

impl<T> Interleaved<T> {
    /// Scan every still-running strand, and keep re-scanning as long as
    /// a pass makes progress. One strand resolving a promise/channel
    /// another strand is waiting on settles synchronously, in the same
    /// call, rather than needing a separate wake to notice it — a
    /// single pass would miss that if the waiter happened to be polled
    /// before the resolver in strand order.
    fn poll_strands(&mut self, cx: &mut Context<'_>) {
        loop {
            let mut progressed = false;
            for (strand, result) in self.strands.iter_mut().zip(self.results.iter_mut()) {
                if let Some(fut) = strand {
                    if let Poll::Ready(res) = fut.as_mut().poll(cx) {
                        tracing::trace!(
                            ok = res.is_ok(),
                            remaining = self.remaining - 1,
                            "interleaved: strand settled"
                        );
                        *result = Some(res);
                        *strand = None;
                        self.remaining -= 1;
                        progressed = true;
                    }
                }
            }
            if !progressed || self.remaining == 0 {
                break;
            }
        }
    }
}

/// Run every strand in `strands` to completion, whether it succeeds or
/// throws, and return every outcome in the same order the strands were
/// given. Nothing is canceled early — this is the "gather everything"
/// form.
pub async fn interleavedx<T: 'static>(strands: Vec<Strand<T>>) -> Vec<Try<T>> {
    struct Gather<T>(Interleaved<T>);

    impl<T> Future for Gather<T> {
        type Output = Vec<Try<T>>;

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Vec<Try<T>>> {
            let this = self.get_mut();
            this.0.poll_strands(cx);
            if this.0.remaining == 0 {
                Poll::Ready(this.0.results.iter_mut().map(|r| r.take().unwrap()).collect())
            } else {
                Poll::Pending
            }
        }
    }

    let n = strands.len();
    Gather(Interleaved {
        strands: strands.into_iter().map(Some).collect(),
        results: (0..n).map(|_| None).collect(),
        remaining: n,
    })
    .await
}

/// Reduce a batch of already-resolved outcomes to the single `Exn` that
/// should surface, per `spec.md` §4.6's dominance rule: a `Finalize`
/// always wins, a non-`Cancel` always beats a `Cancel`, and otherwise
/// the earliest one (in strand order) wins. Panics if `outcomes` is
/// empty or contains no `Err`.
pub fn ordered_throw<T>(outcomes: &[Try<T>]) -> Exn {
    let mut winner: Try<()> = Ok(());
    let mut seen_err = false;
    for outcome in outcomes {
        let projected: Try<()> = match outcome {
            Ok(_) => continue,
            Err(e) => Err(e.clone()),
        };
        seen_err = true;
        winner = dominant(&winner, &projected).clone();
    }
    assert!(seen_err, "ordered_throw called with no failing outcome");
    winner.unwrap_err()
}

/// Run every strand concurrently; as soon as any one of them finalizes
/// (an unwind in progress, not an ordinary error — see `spec.md` §4.6
/// step 5), every other strand is canceled and this resolves to the
/// dominant exception. An ordinary error from one strand does *not*
/// cut the others short: they run to their own natural completion, and
/// `ordered_throw` picks the dominant exception over the full result
/// set. If every strand succeeds, this resolves to their results in
/// order.
pub async fn interleaved<T: 'static>(strands: Vec<Strand<T>>) -> Try<Vec<T>> {
    struct Race<T>(Interleaved<T>);

    impl<T> Future for Race<T> {
        type Output = Vec<Try<T>>;

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Vec<Try<T>>> {
            let this = self.get_mut();
            this.0.poll_strands(cx);

            let finalized = this
                .0
                .results
                .iter()
                .any(|r| matches!(r, Some(Err(e)) if e.is_finalize()));
            if finalized && this.0.remaining > 0 {
                // A bare `cancel()` sweep of the ambient scope — the
                // same scope every still-running strand registered
                // under, since none of them got a private frame of its
                // own. Each swept strand's pending cell is handed a
                // cancel outcome, so re-polling collects them normally
                // instead of having to synthesize one here.
                tracing::trace!("interleaved: finalize observed, canceling the rest");
                cancel_scope(&current_scope());
                this.0.poll_strands(cx);
            }

            if this.0.remaining == 0 {
                Poll::Ready(this.0.results.iter_mut().map(|r| r.take().unwrap()).collect())
            } else {
                Poll::Pending
            }
        }
    }

    let n = strands.len();
    let outcomes = Race(Interleaved {
        strands: strands.into_iter().map(Some).collect(),
        results: (0..n).map(|_| None).collect(),
        remaining: n,
    })
    .await;

    if outcomes.iter().any(|o| o.is_err()) {
        Err(ordered_throw(&outcomes))
    } else {
        Ok(outcomes.into_iter().map(|o| o.unwrap()).collect())
    }
}
