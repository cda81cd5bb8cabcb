//! Time-based suspension (`spec.md` §4.7): `wait`, `yield_now`, and the
//! millisecond conversion the host bridge actually wants.
//!
//! The teacher's `timer.rs` is a hierarchical timing wheel sized for
//! thousands of concurrent OS-thread timers. A single-threaded event
//! loop has no such volume problem — every `wait` is just one
//! `HostBridge::set_timeout` call — so this module is a thin adapter
//! from `Duration` onto [`crate::await_engine::await0`], not a wheel.

use std::time::Duration;

use crate::await_engine::await0;
use crate::driver::current_driver;
use crate::error::Try;
use crate::scope::Cleanup;

/// `max(0, floor(duration in milliseconds))`, saturating at `u32::MAX`.
/// `Duration` is already non-negative, so this is really just the
/// saturating cast `HostBridge::set_timeout` needs.
pub fn d_ms(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

/// Suspend for at least `duration`, canceling the underlying host timer
/// if the enclosing scope is canceled first.
pub async fn wait(duration: Duration) -> Try<()> {
    let ms = d_ms(duration);
    tracing::trace!(ms, "timer: wait requested");
    await0(move |cb| {
        let driver = current_driver();
        let timer_id = driver.set_timeout(cb, ms);
        let driver_for_cleanup = driver.clone();
        Some(Box::new(move || {
            tracing::trace!(?timer_id, "timer: clear (canceled before firing)");
            driver_for_cleanup.clear_timeout(timer_id)
        }) as Cleanup)
    })
    .await
}

/// Suspend until the next tick without any minimum delay — lets other
/// ready work run before resuming.
pub async fn yield_now() -> Try<()> {
    wait(Duration::from_millis(0)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::async_handle;
    use crate::host::TestLoop;

    #[test]
    fn d_ms_floors_and_saturates() {
        assert_eq!(d_ms(Duration::from_millis(250)), 250);
        assert_eq!(d_ms(Duration::from_nanos(999)), 0);
    }

    #[test]
    fn wait_resumes_after_the_virtual_clock_advances() {
        async_handle(TestLoop::new(), || async {
            wait(Duration::from_millis(50)).await.unwrap();
        })
        .unwrap();
    }

    #[test]
    fn yield_now_resumes_on_the_next_tick() {
        async_handle(TestLoop::new(), || async {
            yield_now().await.unwrap();
        })
        .unwrap();
    }
}
