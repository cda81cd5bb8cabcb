//! The runtime: owns the [`Registry`], the [`HostBridge`], and the
//! ambient "current scope" every `await_op`/`no_await`/`cancelable`
//! call reads implicitly.
//!
//! The teacher's `aria-runtime` wires its scope registry and its thread
//! pool together through a `Runtime` struct threaded explicitly through
//! every call; this crate keeps that shape but the single-threaded
//! event loop means there is only ever one `Runtime` live on a given
//! thread at a time, so it is installed in a thread-local for the
//! duration of [`Runtime::run`] rather than passed down every call.
//! Reentrant use (`run` called again before the first returns) is out
//! of scope (`spec.md` §9) and rejected with
//! [`RuntimeError::ReentrantHandle`].

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Wake, Waker};

use crate::error::RuntimeError;
use crate::host::HostBridge;
use crate::scope::{Cleanup, EntryId, Registry, Scope};

/// The ambient operations `await_engine`, `promise`, `channel` and
/// `cancelable` all need, abstracted away from the concrete [`HostBridge`]
/// type so a single thread-local can hold one regardless of which host
/// the embedding program chose.
pub(crate) trait Driver {
    fn fresh_frame(&self) -> u64;
    fn register(&self, scope: Scope, cleanup: Cleanup) -> EntryId;
    fn set_cleanup(&self, id: EntryId, cleanup: Cleanup);
    fn contains(&self, id: EntryId) -> bool;
    fn take(&self, id: EntryId) -> Option<Cleanup>;
    fn sweep(&self, scope: &Scope) -> Vec<Cleanup>;
    fn set_timeout(&self, cb: Box<dyn FnOnce()>, ms: u32) -> crate::host::TimerId;
    fn clear_timeout(&self, id: crate::host::TimerId);
    fn pump(&self) -> bool;
}

/// Owns the callback registry and the host bridge for one `run` of the
/// event loop. `H` is whatever [`HostBridge`] the embedding program
/// supplies — [`crate::host::TestLoop`] in tests, [`crate::host::ThreadedClock`]
/// or a host-native bridge in production.
pub struct Runtime<H> {
    registry: RefCell<Registry>,
    host: H,
    next_frame: std::cell::Cell<u64>,
    config: crate::EventLoopConfig,
    warned_max_timers: std::cell::Cell<bool>,
}

impl<H: HostBridge> Runtime<H> {
    pub fn new(host: H) -> Rc<Self> {
        Self::with_config(host, crate::EventLoopConfig::default())
    }

    pub fn with_config(host: H, config: crate::EventLoopConfig) -> Rc<Self> {
        Rc::new(Self {
            registry: RefCell::new(Registry::new()),
            host,
            next_frame: std::cell::Cell::new(0),
            config,
            warned_max_timers: std::cell::Cell::new(false),
        })
    }

    /// The host bridge this runtime was built with.
    pub fn host(&self) -> &H {
        &self.host
    }
}

impl<H: HostBridge> Driver for Runtime<H> {
    fn fresh_frame(&self) -> u64 {
        let id = self.next_frame.get();
        self.next_frame.set(id + 1);
        id
    }

    fn register(&self, scope: Scope, cleanup: Cleanup) -> EntryId {
        let id = self.registry.borrow_mut().register(scope, cleanup);
        if self.registry.borrow().len() > self.config.max_timers && !self.warned_max_timers.get() {
            self.warned_max_timers.set(true);
            tracing::warn!(
                max_timers = self.config.max_timers,
                live = self.registry.borrow().len(),
                "strand-runtime: outstanding registrations exceed max_timers \
                 — a `cancelable` scope may not be getting torn down"
            );
        }
        id
    }

    fn set_cleanup(&self, id: EntryId, cleanup: Cleanup) {
        self.registry.borrow_mut().set_cleanup(id, cleanup)
    }

    fn contains(&self, id: EntryId) -> bool {
        self.registry.borrow().contains(id)
    }

    fn take(&self, id: EntryId) -> Option<Cleanup> {
        self.registry.borrow_mut().take(id)
    }

    fn sweep(&self, scope: &Scope) -> Vec<Cleanup> {
        self.registry.borrow_mut().sweep(scope)
    }

    fn set_timeout(&self, cb: Box<dyn FnOnce()>, ms: u32) -> crate::host::TimerId {
        self.host.set_timeout(cb, ms)
    }

    fn clear_timeout(&self, id: crate::host::TimerId) {
        self.host.clear_timeout(id)
    }

    fn pump(&self) -> bool {
        self.host.pump()
    }
}

thread_local! {
    static CURRENT_DRIVER: RefCell<Option<Rc<dyn Driver>>> = const { RefCell::new(None) };
    static CURRENT_SCOPE: RefCell<Scope> = RefCell::new(Scope::root());
}

/// The ambient runtime `await_op`/`no_await`/`cancelable` register
/// against. Panics outside a [`Runtime::run`] call — there is no
/// operation in this crate that makes sense without one.
pub(crate) fn current_driver() -> Rc<dyn Driver> {
    CURRENT_DRIVER.with(|cell| {
        cell.borrow()
            .clone()
            .expect("strand-runtime: no Runtime is active on this thread")
    })
}

/// The scope new registrations are tagged with. Set by [`Runtime::run`]
/// to [`Scope::root`] and, for the duration of each `cancelable` wrapper
/// future's `poll`, to that block's own scope (`crate::cancelable`).
pub(crate) fn current_scope() -> Scope {
    CURRENT_SCOPE.with(|cell| cell.borrow().clone())
}

/// Replace the ambient scope for the duration of `f`, restoring the
/// previous one afterward even if `f` panics. Used by `cancelable`'s
/// wrapper future on every `poll` to re-enter its captured scope, the
/// same technique `tracing::Instrumented` uses to re-enter a span.
pub(crate) fn with_scope<T>(scope: Scope, f: impl FnOnce() -> T) -> T {
    let previous = CURRENT_SCOPE.with(|cell| cell.replace(scope));
    struct Restore(Option<Scope>);
    impl Drop for Restore {
        fn drop(&mut self) {
            if let Some(scope) = self.0.take() {
                CURRENT_SCOPE.with(|cell| *cell.borrow_mut() = scope);
            }
        }
    }
    let _restore = Restore(Some(previous));
    f()
}

struct NoopWake;
impl Wake for NoopWake {
    fn wake(self: std::sync::Arc<Self>) {}
    fn wake_by_ref(self: &std::sync::Arc<Self>) {}
}
// `Waker::from` requires `Send + Sync`; a unit struct with an empty
// `wake` trivially satisfies that without claiming any real
// thread-safety, since nothing it touches is ever shared across
// threads. See `DESIGN.md` for why this crate doesn't need a waker
// that actually wakes anything: every suspension is resumed either
// synchronously (promise/channel) or by re-polling after `Driver::pump`
// fires something host-side, never by `Waker::wake` itself.
unsafe impl Send for NoopWake {}
unsafe impl Sync for NoopWake {}

fn noop_waker() -> Waker {
    Waker::from(std::sync::Arc::new(NoopWake))
}

/// Runs `action` to completion as the root of a new event loop on this
/// thread, installing `host` as the ambient [`HostBridge`] for the
/// duration. This is the crate's `async_handle` (`spec.md` §4.3): the
/// single entry point that bridges a host's event loop into the
/// registry/await-engine machinery every other module assumes is
/// ambient.
///
/// `action` builds the root future; it is only invoked (and the future
/// only polled) once a `Runtime` is installed, so `await_op` and
/// friends called from inside it see a live ambient driver.
pub fn async_handle<H, F, Fut>(host: H, action: F) -> Result<Fut::Output, RuntimeError>
where
    H: HostBridge + 'static,
    F: FnOnce() -> Fut,
    Fut: Future,
{
    async_handle_with_config(host, crate::EventLoopConfig::default(), action)
}

/// `async_handle`, with explicit [`crate::EventLoopConfig`] tuning.
pub fn async_handle_with_config<H, F, Fut>(
    host: H,
    config: crate::EventLoopConfig,
    action: F,
) -> Result<Fut::Output, RuntimeError>
where
    H: HostBridge + 'static,
    F: FnOnce() -> Fut,
    Fut: Future,
{
    let already_running = CURRENT_DRIVER.with(|cell| cell.borrow().is_some());
    if already_running {
        return Err(RuntimeError::ReentrantHandle);
    }

    let runtime = Runtime::with_config(host, config);
    CURRENT_DRIVER.with(|cell| *cell.borrow_mut() = Some(runtime.clone() as Rc<dyn Driver>));
    CURRENT_SCOPE.with(|cell| *cell.borrow_mut() = Scope::root());

    struct Uninstall;
    impl Drop for Uninstall {
        fn drop(&mut self) {
            CURRENT_DRIVER.with(|cell| *cell.borrow_mut() = None);
        }
    }
    let _uninstall = Uninstall;

    let fut = action();
    let mut fut = std::pin::pin!(fut);
    let value = block_on(runtime.as_ref(), fut.as_mut());
    Ok(value)
}

/// Polls `fut` to completion, pumping the host whenever it returns
/// `Pending`. Every suspension in this crate resolves either
/// synchronously (a promise/channel waiter fired from the same call
/// stack) or through `Driver::pump` running a due host callback — there
/// is no other source of forward progress, so a `Pending` result with
/// `pump` reporting nothing outstanding is a genuine deadlock.
fn block_on<Fut: Future>(driver: &dyn Driver, mut fut: Pin<&mut Fut>) -> Fut::Output {
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    loop {
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(value) => return value,
            Poll::Pending => {
                if !driver.pump() {
                    panic!(
                        "strand-runtime: deadlocked — a future is pending with no \
                         outstanding timers to drive it forward"
                    );
                }
            }
        }
    }
}
