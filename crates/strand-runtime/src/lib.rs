//! strand-runtime — scoped cancellation, promises, channels and
//! interleaved strands over a single-threaded event loop.
//!
//! - [`scope`] — `Scope` paths and the callback [`scope::Registry`] that
//!   cancellation sweeps.
//! - [`driver`] — [`driver::Runtime`], the ambient current-scope/driver
//!   thread-locals, and [`driver::async_handle`], the entry point.
//! - [`host`] — the [`host::HostBridge`] contract plus the two hosts
//!   this crate ships: [`host::TestLoop`] and [`host::ThreadedClock`].
//! - [`await_engine`] — `await_op`/`no_await` and the typed adapters
//!   built on them (`await0`, `await1`, `await_exn0`, `await_exn1`,
//!   `async_io`, `async_io_noexn`, `await_to_channel`).
//! - [`promise`] / [`channel`] — the two value-passing primitives.
//! - [`cancelable`] — `cancelable`, `cancel`, `timeout`, `first_of`.
//! - [`interleaved`] — `interleavedx`, `interleaved`, `ordered_throw`.
//! - [`timer`] — `wait`, `yield_now`.
//! - [`error`] — `Try<T>`, `Exn`, `RuntimeError`.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use strand_runtime::{driver, host, timer};
//!
//! driver::async_handle(host::TestLoop::new(), || async {
//!     timer::wait(Duration::from_millis(10)).await
//! }).unwrap();
//! ```

pub mod await_engine;
pub mod cancelable;
pub mod channel;
pub mod driver;
pub mod error;
pub mod host;
pub mod interleaved;
pub mod promise;
pub mod scope;
pub mod timer;

pub use await_engine::{
    async_io, async_io_noexn, await0, await1, await_exn0, await_exn1, await_op, await_to_channel,
    no_await, AwaitOp, Resolve, Setup,
};
pub use cancelable::{cancel, cancel_scope, cancelable, first_of, timeout};
pub use channel::Channel;
pub use driver::{async_handle, async_handle_with_config};
pub use error::{dominant, Exn, ExnKind, RuntimeError, Try};
pub use host::{HostBridge, TestLoop, ThreadedClock, TimerId};
pub use interleaved::{interleaved, interleavedx, ordered_throw};
pub use promise::Promise;
pub use scope::Scope;
pub use timer::{d_ms, wait, yield_now};

/// Runtime-wide tuning knobs, handed to the embedding program rather
/// than read from globals — mirrors the teacher's `RuntimeConfig`
/// builder, re-targeted at the single-threaded event loop: there is no
/// thread pool to size, but there is still a timer namespace and a
/// soft cap worth surfacing for diagnostics.
#[derive(Debug, Clone)]
pub struct EventLoopConfig {
    /// Above this many outstanding timers, [`host::TestLoop`] and
    /// [`host::ThreadedClock`] emit a `tracing::warn!` — a hint that a
    /// `cancelable` scope isn't being torn down somewhere, not a hard
    /// limit.
    pub max_timers: usize,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self { max_timers: 10_000 }
    }
}

impl EventLoopConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_timers(mut self, max_timers: usize) -> Self {
        self.max_timers = max_timers;
        self
    }
}
