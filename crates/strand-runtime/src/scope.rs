//! Hierarchical scopes and the callback registry they tag.
//!
//! A [`Scope`] is an immutable path of frame ids, root first. It names
//! every outstanding callback the runtime is tracking so that
//! `cancel(scope)` can find exactly the callbacks it owns — itself and
//! every descendant — without touching siblings.
//!
//! # Design (spec.md §3, §4.2)
//!
//! - `child_of(s, id)` appends a frame: used by `await`/`no_await` to
//!   tag each freshly-registered callback.
//! - `parent_of(id, s)` prepends a frame: used by `cancelable` to
//!   "extend" every scope an inner operation registers under, so that
//!   cancelling the `cancelable` block's own frame sweeps everything
//!   registered underneath it, no matter how deep.
//! - `is_in_scope_of(child, parent)` is a prefix test.
//!
//! Unlike the teacher's `Scope`, which is a live OS-thread group
//! (`Scope::spawn`, `Scope::join_all`), this `Scope` is a plain value —
//! structured concurrency here is expressed by the *registry*
//! (`Registry`), not by a struct that owns threads.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

/// An immutable, structurally-equal path of frame ids. The empty scope
/// is the global scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Scope(Vec<u64>);

impl Scope {
    /// The empty (global) scope.
    pub fn root() -> Self {
        Scope(Vec::new())
    }

    /// `child_of(s, id) = s ++ [id]`.
    pub fn child(&self, id: u64) -> Scope {
        let mut path = self.0.clone();
        path.push(id);
        Scope(path)
    }

    /// `parent_of(id, s) = [id] ++ s`. Used by `cancelable` to prepend
    /// its own frame into scopes flowing through delegated operations.
    pub fn prepend(&self, id: u64) -> Scope {
        let mut path = Vec::with_capacity(self.0.len() + 1);
        path.push(id);
        path.extend_from_slice(&self.0);
        Scope(path)
    }

    /// `is_in_scope_of(self, parent)`: `true` iff `parent` is a prefix
    /// of `self` (every descendant, including `self == parent`).
    pub fn is_in_scope_of(&self, parent: &Scope) -> bool {
        self.0.len() >= parent.0.len() && self.0[..parent.0.len()] == parent.0[..]
    }

    /// The path's frame ids, root first.
    pub fn frames(&self) -> &[u64] {
        &self.0
    }
}

/// A cleanup armed when a callback was registered; invoked at most
/// once, either by the await engine on a canceled/erroring completion
/// or by `cancel` tearing down a still-live entry.
pub type Cleanup = Box<dyn FnOnce()>;

/// One entry in the callback registry: the scope tagging the callback,
/// and the cleanup to run if it is torn down before firing.
struct Entry {
    scope: Scope,
    cleanup: RefCell<Option<Cleanup>>,
}

/// A unique token identifying a live registry entry, returned by
/// [`Registry::register`] and required to remove or replace it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryId(u64);

/// The process-wide (here: per-[`Runtime`](crate::driver::Runtime))
/// ordered sequence of outstanding callbacks (`spec.md` §3 "Callback
/// entry"). Traversed in insertion order for cancellation.
#[derive(Default)]
pub struct Registry {
    entries: Vec<(EntryId, Entry)>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_id(&self) -> EntryId {
        EntryId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Insert `(scope, cleanup)`; returns the token used to look the
    /// entry back up.
    pub fn register(&mut self, scope: Scope, cleanup: Cleanup) -> EntryId {
        let id = self.fresh_id();
        tracing::trace!(?id, frames = ?scope.frames(), "registry: register");
        self.entries.push((
            id,
            Entry {
                scope,
                cleanup: RefCell::new(Some(cleanup)),
            },
        ));
        id
    }

    /// Replace a still-live entry's cleanup (used when `setup` returns
    /// `Some(cleanup)` after the default no-op cleanup was registered).
    pub fn set_cleanup(&mut self, id: EntryId, cleanup: Cleanup) {
        if let Some((_, entry)) = self.entries.iter().find(|(eid, _)| *eid == id) {
            *entry.cleanup.borrow_mut() = Some(cleanup);
        }
    }

    /// `true` if `id` is still registered (hasn't fired with `done` or
    /// been swept by `cancel`).
    pub fn contains(&self, id: EntryId) -> bool {
        self.entries.iter().any(|(eid, _)| *eid == id)
    }

    /// Remove and return `true` if `id` was present. Does not run the
    /// cleanup — callers that remove because the operation finished
    /// normally don't want the cleanup to run.
    pub fn remove(&mut self, id: EntryId) -> bool {
        if let Some(pos) = self.entries.iter().position(|(eid, _)| *eid == id) {
            self.entries.remove(pos);
            true
        } else {
            false
        }
    }

    /// Remove `id` and hand back its cleanup, leaving the caller to
    /// decide whether to run it. Used by the await engine: a completion
    /// that resolves to `Exn` still runs the cleanup (best-effort) even
    /// though it wasn't canceled, so whatever the `setup` armed on the
    /// host side gets torn down either way.
    pub fn take(&mut self, id: EntryId) -> Option<Cleanup> {
        let pos = self.entries.iter().position(|(eid, _)| *eid == id)?;
        let (_, entry) = self.entries.remove(pos);
        entry.cleanup.into_inner()
    }

    /// Remove every entry whose scope is a descendant of (or equal to)
    /// `scope` and return their cleanups, in registration order, ready
    /// to be invoked by the caller. `cancel()` uses this and then fires
    /// each cleanup itself so that a cleanup which re-enters the
    /// registry (e.g. to register a replacement) sees a consistent
    /// view.
    pub fn sweep(&mut self, scope: &Scope) -> Vec<Cleanup> {
        let mut swept = Vec::new();
        let mut remaining = Vec::with_capacity(self.entries.len());
        for (id, entry) in self.entries.drain(..) {
            if entry.scope.is_in_scope_of(scope) {
                tracing::debug!(?id, frames = ?entry.scope.frames(), "registry: sweep");
                if let Some(cleanup) = entry.cleanup.borrow_mut().take() {
                    swept.push(cleanup);
                }
            } else {
                remaining.push((id, entry));
            }
        }
        self.entries = remaining;
        swept
    }

    /// Number of live entries (diagnostic only).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_appends_and_prepend_prepends() {
        let root = Scope::root();
        let a = root.child(1);
        let ab = a.child(2);
        assert_eq!(ab.frames(), &[1, 2]);

        let prefixed = ab.prepend(9);
        assert_eq!(prefixed.frames(), &[9, 1, 2]);
    }

    #[test]
    fn is_in_scope_of_is_a_prefix_test() {
        let root = Scope::root();
        let a = root.child(1);
        let ab = a.child(2);
        let sibling = root.child(7);

        assert!(ab.is_in_scope_of(&a));
        assert!(ab.is_in_scope_of(&root));
        assert!(a.is_in_scope_of(&a));
        assert!(!sibling.is_in_scope_of(&a));
        assert!(!a.is_in_scope_of(&ab));
    }

    #[test]
    fn register_and_sweep_runs_cleanup_once() {
        let mut reg = Registry::new();
        let ran = std::rc::Rc::new(RefCell::new(0));
        let ran2 = ran.clone();

        let scope = Scope::root().child(1);
        let id = reg.register(scope.clone(), Box::new(move || *ran2.borrow_mut() += 1));
        assert!(reg.contains(id));

        let cleanups = reg.sweep(&scope);
        for cleanup in cleanups {
            cleanup();
        }
        assert_eq!(*ran.borrow(), 1);
        assert!(!reg.contains(id));
    }

    #[test]
    fn sweep_only_touches_descendants() {
        let mut reg = Registry::new();
        let a = Scope::root().child(1);
        let b = Scope::root().child(2);

        let id_a = reg.register(a.clone(), Box::new(|| {}));
        let id_b = reg.register(b.clone(), Box::new(|| {}));

        let cleanups = reg.sweep(&a);
        assert_eq!(cleanups.len(), 1);
        assert!(!reg.contains(id_a));
        assert!(reg.contains(id_b));
    }

    #[test]
    fn remove_does_not_invoke_cleanup() {
        let mut reg = Registry::new();
        let ran = std::rc::Rc::new(RefCell::new(false));
        let ran2 = ran.clone();
        let scope = Scope::root().child(1);
        let id = reg.register(scope, Box::new(move || *ran2.borrow_mut() = true));

        assert!(reg.remove(id));
        assert!(!*ran.borrow());
        assert!(!reg.remove(id));
    }
}
