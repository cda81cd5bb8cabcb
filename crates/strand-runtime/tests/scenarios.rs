//! Integration scenarios exercising the primitives together, the way a
//! real caller would combine them — as opposed to the unit tests next
//! to each primitive, which exercise one at a time.

use std::pin::Pin;
use std::time::Duration;

use strand_runtime::channel::Channel;
use strand_runtime::promise::Promise;
use strand_runtime::{
    cancel, cancelable, driver, first_of, host, interleaved, interleavedx, timeout, wait, Exn, Try,
};

type Strand<T> = Pin<Box<dyn std::future::Future<Output = Try<T>>>>;

/// A `cancelable` block that outlives its own timeout is torn down:
/// the loser's `wait` never fires into anything, and the scope it
/// registered under is empty once `timeout` returns.
#[test]
fn scenario_timeout_tears_down_the_slow_branch() {
    driver::async_handle(host::TestLoop::new(), || async {
        let result: Try<&'static str> = timeout(Duration::from_millis(10), async {
            wait(Duration::from_millis(10_000)).await?;
            Ok("finished")
        })
        .await;
        assert!(result.is_err());
        assert!(!result.unwrap_err().is_cancel());
    })
    .unwrap();
}

/// An ordinary error from one strand does not cut its siblings short —
/// they run to their own natural completion, and `ordered_throw` picks
/// the dominant exception over the full result set.
#[test]
fn scenario_interleaved_ordinary_failure_lets_the_rest_finish() {
    driver::async_handle(host::TestLoop::new(), || async {
        let failing: Strand<()> = Box::pin(async { Err(Exn::error("first to fail")) });
        let slow: Strand<()> = Box::pin(async move {
            wait(Duration::from_millis(5_000)).await?;
            Ok(())
        });

        let result = interleaved(vec![failing, slow]).await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().message(), "first to fail");
    })
    .unwrap();
}

/// A finalize outcome from one strand does cut the rest short: the
/// still-pending sibling is swept and comes back as a cancel outcome
/// rather than running to completion.
#[test]
fn scenario_interleaved_finalize_cancels_the_rest() {
    driver::async_handle(host::TestLoop::new(), || async {
        let finalizing: Strand<()> = Box::pin(async { Err(Exn::finalize("unwinding")) });
        let slow: Strand<()> = Box::pin(async move {
            wait(Duration::from_millis(5_000)).await?;
            Ok(())
        });

        let result = interleaved(vec![finalizing, slow]).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().is_finalize());
    })
    .unwrap();
}

/// Strands in `interleaved` share the scope ambient when it was called
/// — a bare `cancel()` in one strand reaches a sibling's still-pending
/// `wait`, not just its own (`spec.md` §4.6 step 2 / S6).
#[test]
fn scenario_interleaved_bare_cancel_reaches_a_sibling_strand() {
    driver::async_handle(host::TestLoop::new(), || async {
        let result: Try<Vec<i32>> = cancelable(async {
            let waiter: Strand<i32> = Box::pin(async {
                wait(Duration::from_millis(1_000)).await?;
                Ok(1)
            });
            let canceller: Strand<i32> = Box::pin(async {
                cancel();
                Ok(2)
            });
            interleaved(vec![waiter, canceller]).await
        })
        .await;

        assert!(result.is_err());
        assert!(result.unwrap_err().is_cancel());
    })
    .unwrap();
}

/// `interleavedx` (the "gather everything" form) reports every strand's
/// own outcome, in argument order, regardless of which succeeded.
#[test]
fn scenario_interleavedx_reports_every_outcome() {
    driver::async_handle(host::TestLoop::new(), || async {
        let a: Strand<i32> = Box::pin(async { Ok(1) });
        let b: Strand<i32> = Box::pin(async {
            wait(Duration::from_millis(5)).await?;
            Err(Exn::error("b failed"))
        });
        let c: Strand<i32> = Box::pin(async { Ok(3) });

        let results = interleavedx(vec![a, b, c]).await;
        assert_eq!(results[0].as_ref().unwrap(), &1);
        assert_eq!(results[1].as_ref().unwrap_err().message(), "b failed");
        assert_eq!(results[2].as_ref().unwrap(), &3);
    })
    .unwrap();
}

/// Racing two timers with `first_of` returns the earlier one's result
/// and tears down the later one before it ever fires.
#[test]
fn scenario_first_of_picks_the_earliest_branch() {
    driver::async_handle(host::TestLoop::new(), || async {
        let late: Strand<&'static str> = Box::pin(async {
            wait(Duration::from_millis(200)).await?;
            Ok("late")
        });
        let early: Strand<&'static str> = Box::pin(async {
            wait(Duration::from_millis(20)).await?;
            Ok("early")
        });

        let result = first_of(vec![late, early]).await;
        assert_eq!(result.unwrap(), "early");
    })
    .unwrap();
}

/// A `cancelable` block that calls `cancel()` on itself mid-flight
/// leaves no outstanding registration behind — a sibling channel
/// receive, registered before the cancel, never fires, and comes back
/// as a cancel outcome through the strand batch rather than hanging.
#[test]
fn scenario_self_cancel_withdraws_pending_registrations() {
    driver::async_handle(host::TestLoop::new(), || async {
        let ch: Channel<i32> = Channel::new();

        let result: Try<Vec<i32>> = cancelable(async move {
            let pending: Strand<i32> = Box::pin(async move {
                let value = ch.receivex(true).await?;
                Ok(value)
            });
            let canceller: Strand<i32> = Box::pin(async {
                cancel();
                Ok(0)
            });
            interleaved(vec![pending, canceller]).await
        })
        .await;

        // The block resolved via the cancel sweeping the pending
        // receive, not the receive ever being answered.
        assert!(result.is_err());
        assert!(result.unwrap_err().is_cancel());
    })
    .unwrap();
}

/// A promise chained with a channel: the channel only ever sees the
/// resolved value once, even though two listeners are registered
/// before resolution.
#[test]
fn scenario_promise_fans_out_to_a_channel() {
    driver::async_handle(host::TestLoop::new(), || async {
        let p: Promise<i32> = Promise::new();
        let ch: Channel<i32> = Channel::new();

        let p1 = p.clone();
        let ch1 = ch.clone();
        let relay: Strand<()> = Box::pin(async move {
            let value = p1.get().await?;
            ch1.emit(value);
            Ok(())
        });

        let resolver: Strand<()> = Box::pin(async move {
            p.resolve(99).ok();
            Ok(())
        });

        interleavedx(vec![relay, resolver]).await;
        assert_eq!(ch.receive().await.unwrap(), 99);
    })
    .unwrap();
}
