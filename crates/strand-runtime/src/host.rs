//! The host bridge: the only external collaborator this crate requires.
//!
//! `spec.md` §6 specifies this as an interface, not a primitive: "the
//! host event loop (`set_timeout`/`clear_timeout`) ... are out of
//! scope: external collaborators, interfaces only." [`HostBridge`] is
//! that interface. This module also ships two small implementations —
//! [`TestLoop`], a deterministic single-threaded reference loop used by
//! this crate's own tests (and suitable for embedding into a host that
//! already has an event loop), and [`ThreadedClock`], a background-
//! thread loop for hosts that have none.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Opaque handle to a pending timer, returned by
/// [`HostBridge::set_timeout`] and accepted by
/// [`HostBridge::clear_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerId(u64);

/// A thunk the host invokes at most once when its timer fires.
pub type TimerCallback = Box<dyn FnOnce()>;

/// The host bridge contract (`spec.md` §6).
///
/// Implementations must invoke `cb` **at most once** for a given
/// [`TimerId`] unless it is canceled first; `ms == 0` means "next
/// tick", not "synchronously now" — a suspended `await` must still
/// return control to the caller before `cb` runs.
pub trait HostBridge {
    /// Schedule `cb` to run no sooner than `ms` milliseconds from now.
    fn set_timeout(&self, cb: TimerCallback, ms: u32) -> TimerId;

    /// Cancel a pending timer. Idempotent; a no-op if already fired or
    /// already canceled.
    fn clear_timeout(&self, id: TimerId);

    /// Make forward progress: run (or wait for, then run) whatever is
    /// next due. Returns `false` if nothing is scheduled at all — the
    /// caller (`driver::block_on`) treats that as a deadlock, since
    /// nothing remains that could ever wake the pending future.
    fn pump(&self) -> bool;
}

struct Due {
    deadline: Instant,
    seq: u64,
    id: TimerId,
}

impl PartialEq for Due {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for Due {}
impl Ord for Due {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; we want the earliest deadline on top.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for Due {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A deterministic, single-threaded reference host.
///
/// `TestLoop` has no background thread: callbacks only fire when the
/// caller asks it to, via [`TestLoop::advance`] (jump the virtual clock
/// forward and run everything now due) or [`TestLoop::run_until_idle`]
/// (keep advancing to the next deadline until no timers remain). This
/// makes `spec.md` §8's scenarios reproducible without real sleeps.
#[derive(Default)]
pub struct TestLoop {
    inner: std::cell::RefCell<TestLoopInner>,
}

#[derive(Default)]
struct TestLoopInner {
    now: Option<Instant>,
    next_id: u64,
    due: BinaryHeap<Due>,
    callbacks: std::collections::HashMap<u64, TimerCallback>,
    cancelled: std::collections::HashSet<u64>,
}

impl TestLoop {
    pub fn new() -> Self {
        Self::default()
    }

    fn now(inner: &mut TestLoopInner) -> Instant {
        *inner.now.get_or_insert_with(Instant::now)
    }

    /// Run every timer currently due, then every timer that becomes due
    /// as a result (a timer's own callback may schedule a zero-delay
    /// follow-up), until none remain at the current virtual time.
    pub fn run_ready(&self) {
        loop {
            let next = {
                let mut inner = self.inner.borrow_mut();
                let now = Self::now(&mut inner);
                match inner.due.peek() {
                    Some(due) if due.deadline <= now => {
                        let due = inner.due.pop().unwrap();
                        if inner.cancelled.remove(&due.id.0) {
                            continue;
                        }
                        inner.callbacks.remove(&due.id.0).map(|cb| (due.id, cb))
                    }
                    _ => None,
                }
            };
            match next {
                Some((id, cb)) => {
                    tracing::trace!(?id, "timer: fire");
                    cb();
                }
                None => break,
            }
        }
    }

    /// Advance the virtual clock by `d` and run everything that becomes
    /// due, recursively (so a `wait(50ms)` nested inside another timer
    /// still fires within one `advance` call spanning it).
    pub fn advance(&self, d: Duration) {
        {
            let mut inner = self.inner.borrow_mut();
            let now = Self::now(&mut inner) + d;
            inner.now = Some(now);
        }
        self.run_ready();
    }

    /// Keep jumping to the next scheduled deadline and firing it until
    /// no timers remain. Useful when a test doesn't want to reason
    /// about exact durations, only relative ordering.
    pub fn run_until_idle(&self) {
        loop {
            let next_deadline = self.inner.borrow().due.peek().map(|d| d.deadline);
            match next_deadline {
                Some(deadline) => {
                    let mut inner = self.inner.borrow_mut();
                    inner.now = Some(deadline);
                    drop(inner);
                    self.run_ready();
                }
                None => break,
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.borrow().callbacks.len()
    }
}

impl HostBridge for TestLoop {
    fn set_timeout(&self, cb: TimerCallback, ms: u32) -> TimerId {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        let seq = id;
        let now = Self::now(&mut inner);
        let deadline = now + Duration::from_millis(ms as u64);
        inner.callbacks.insert(id, cb);
        inner.due.push(Due {
            deadline,
            seq,
            id: TimerId(id),
        });
        tracing::trace!(id, ms, "timer: arm");
        TimerId(id)
    }

    fn clear_timeout(&self, id: TimerId) {
        tracing::trace!(?id, "timer: clear");
        let mut inner = self.inner.borrow_mut();
        inner.callbacks.remove(&id.0);
        inner.cancelled.insert(id.0);
    }

    fn pump(&self) -> bool {
        let next_deadline = self.inner.borrow().due.peek().map(|d| d.deadline);
        match next_deadline {
            Some(deadline) => {
                self.inner.borrow_mut().now = Some(deadline);
                self.run_ready();
                true
            }
            None => false,
        }
    }
}

/// A host for programs with no event loop of their own: a single
/// background thread sleeps until the next deadline and ships the due
/// callback back across an `mpsc` channel, where [`ThreadedClock::pump`]
/// (called from the same thread that drives [`crate::driver::Runtime`])
/// picks it up and runs it. The callback itself always runs on the
/// caller's thread, preserving the single-threaded execution model of
/// `spec.md` §5 — the background thread only ever measures time.
pub struct ThreadedClock {
    next_id: AtomicU64,
    tx: mpsc::Sender<ClockMsg>,
    rx: std::cell::RefCell<mpsc::Receiver<ClockMsg>>,
    pending: std::cell::RefCell<std::collections::HashMap<u64, TimerCallback>>,
    cancelled: Arc<CancelSet>,
}

enum ClockMsg {
    Due(u64),
}

#[derive(Default)]
struct CancelSet {
    ids: std::sync::Mutex<std::collections::HashSet<u64>>,
}

impl CancelSet {
    fn cancel(&self, id: u64) {
        self.ids.lock().unwrap().insert(id);
    }
    fn is_cancelled(&self, id: u64) -> bool {
        self.ids.lock().unwrap().contains(&id)
    }
}

impl Default for ThreadedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadedClock {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            next_id: AtomicU64::new(0),
            tx,
            rx: std::cell::RefCell::new(rx),
            pending: std::cell::RefCell::new(std::collections::HashMap::new()),
            cancelled: Arc::new(CancelSet::default()),
        }
    }

    /// Block the calling thread until at least one due callback has
    /// arrived, then run every callback that has arrived so far.
    /// [`crate::driver::Runtime::block_on`] calls this whenever it has
    /// nothing else ready to poll.
    pub fn pump_blocking(&self) {
        let first = self.rx.borrow().recv();
        if let Ok(msg) = first {
            self.handle(msg);
        }
        while let Ok(msg) = self.rx.borrow().try_recv() {
            self.handle(msg);
        }
    }

    fn handle(&self, msg: ClockMsg) {
        let ClockMsg::Due(id) = msg;
        if self.cancelled.is_cancelled(id) {
            return;
        }
        if let Some(cb) = self.pending.borrow_mut().remove(&id) {
            tracing::trace!(id, "timer: fire");
            cb();
        }
    }
}

impl HostBridge for ThreadedClock {
    fn set_timeout(&self, cb: TimerCallback, ms: u32) -> TimerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(id, ms, "timer: arm");
        self.pending.borrow_mut().insert(id, cb);
        let tx = self.tx.clone();
        let fired = Arc::new(AtomicBool::new(false));
        let cancelled = Arc::clone(&self.cancelled);
        let fired_clone = Arc::clone(&fired);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(ms as u64));
            if cancelled.is_cancelled(id) {
                return;
            }
            fired_clone.store(true, Ordering::SeqCst);
            let _ = tx.send(ClockMsg::Due(id));
        });
        TimerId(id)
    }

    fn clear_timeout(&self, id: TimerId) {
        tracing::trace!(id = id.0, "timer: clear");
        self.cancelled.cancel(id.0);
        self.pending.borrow_mut().remove(&id.0);
    }

    fn pump(&self) -> bool {
        if self.pending.borrow().is_empty() {
            return false;
        }
        self.pump_blocking();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_loop_fires_in_deadline_order() {
        let loop_ = TestLoop::new();
        let order = Rc::new(std::cell::RefCell::new(Vec::new()));

        let o1 = order.clone();
        loop_.set_timeout(Box::new(move || o1.borrow_mut().push("late")), 50);
        let o2 = order.clone();
        loop_.set_timeout(Box::new(move || o2.borrow_mut().push("early")), 10);

        loop_.run_until_idle();
        assert_eq!(*order.borrow(), vec!["early", "late"]);
    }

    #[test]
    fn clear_timeout_prevents_firing() {
        let loop_ = TestLoop::new();
        let fired = Rc::new(Cell::new(false));
        let fired2 = fired.clone();
        let id = loop_.set_timeout(Box::new(move || fired2.set(true)), 10);
        loop_.clear_timeout(id);
        loop_.run_until_idle();
        assert!(!fired.get());
    }

    #[test]
    fn advance_only_fires_whats_due() {
        let loop_ = TestLoop::new();
        let count = Rc::new(Cell::new(0));
        let c1 = count.clone();
        loop_.set_timeout(Box::new(move || c1.set(c1.get() + 1)), 100);

        loop_.advance(Duration::from_millis(50));
        assert_eq!(count.get(), 0);

        loop_.advance(Duration::from_millis(50));
        assert_eq!(count.get(), 1);
    }
}
