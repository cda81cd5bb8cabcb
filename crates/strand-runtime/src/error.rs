//! Outcome and error types for the strand runtime.
//!
//! Every suspended operation resolves to a `Try<T>` — either a value or
//! an `Exn`. `Exn` is not a hierarchy of error types; it is one type
//! carrying a *classifier* (`ExnKind`) so that `cancelable` and
//! `interleaved` can ask "is this a cancellation?" / "is this a
//! finalize?" without downcasting.

use std::fmt;

use thiserror::Error;

/// The outcome of any suspended operation: `Ok(T)` or `Exn`.
pub type Try<T> = Result<T, Exn>;

/// Classifies an exception for the purposes of cancellation and
/// exception-dominance ordering (`spec.md` §4.6, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExnKind {
    /// An ordinary error raised by user code or a host operation.
    Error,
    /// Produced by leaving a `cancelable` block with pending operations.
    Cancel,
    /// Produced by an outer unwinder (e.g. a `finally` in user code).
    /// Dominates `Cancel` in `ordered_throw`.
    Finalize,
}

/// A tagged exception: `is_cancel()`/`is_finalize()` classify it,
/// `message()` carries the human-readable payload.
#[derive(Debug, Clone)]
pub struct Exn {
    kind: ExnKind,
    message: String,
}

impl Exn {
    /// Construct an ordinary error exception.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ExnKind::Error,
            message: message.into(),
        }
    }

    /// Construct a cancellation exception (what a cleanup delivers to a
    /// suspended `cb` when its scope is canceled).
    pub fn cancel() -> Self {
        Self {
            kind: ExnKind::Cancel,
            message: "cancelled".to_string(),
        }
    }

    /// Construct a finalize exception (unwinding, not a normal error).
    pub fn finalize(message: impl Into<String>) -> Self {
        Self {
            kind: ExnKind::Finalize,
            message: message.into(),
        }
    }

    /// The exception's classifier.
    pub fn kind(&self) -> ExnKind {
        self.kind
    }

    /// `true` if this outcome is a cancellation produced by leaving a
    /// `cancelable` block.
    pub fn is_cancel(&self) -> bool {
        self.kind == ExnKind::Cancel
    }

    /// `true` if this outcome represents finalization (unwinding)
    /// rather than a normal error.
    pub fn is_finalize(&self) -> bool {
        self.kind == ExnKind::Finalize
    }

    /// The human-readable payload.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Exn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ExnKind::Error => write!(f, "{}", self.message),
            ExnKind::Cancel => write!(f, "cancelled: {}", self.message),
            ExnKind::Finalize => write!(f, "finalizing: {}", self.message),
        }
    }
}

impl std::error::Error for Exn {}

/// Ranks two outcomes per `spec.md` §4.6's exception-dominance rule and
/// returns the more significant one. Keeps `current` unless `next` is
/// `finalize?` and `current` is not, or `current` is `cancel?` and
/// `next` is not.
pub fn dominant<'a, T>(current: &'a Try<T>, next: &'a Try<T>) -> &'a Try<T> {
    let (Err(c), Err(n)) = (current, next) else {
        return match (current, next) {
            (Ok(_), Err(_)) => next,
            _ => current,
        };
    };

    if n.is_finalize() && !c.is_finalize() {
        next
    } else if c.is_cancel() && !n.is_cancel() {
        next
    } else {
        current
    }
}

/// Errors surfaced directly by the runtime's own bookkeeping (as
/// opposed to `Exn`, which flows through user-facing `Try<T>` values).
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// `Promise::resolve` was called on a promise that was already
    /// resolved.
    #[error("promise already resolved")]
    PromiseAlreadyResolved,

    /// `async_io_noexn` (or `async_iox`) asserted no throw, but the
    /// wrapped operation threw anyway.
    #[error("operation asserted not to throw did throw: {0}")]
    UnexpectedThrow(String),

    /// `async_handle` was invoked while already running (reentrant use
    /// is out of scope per `spec.md` §9).
    #[error("async_handle is already running on this thread")]
    ReentrantHandle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_and_finalize_classifiers() {
        assert!(Exn::cancel().is_cancel());
        assert!(!Exn::cancel().is_finalize());
        assert!(Exn::finalize("unwind").is_finalize());
        assert!(!Exn::error("boom").is_cancel());
        assert!(!Exn::error("boom").is_finalize());
    }

    #[test]
    fn dominant_prefers_finalize_over_cancel() {
        let cancel: Try<()> = Err(Exn::cancel());
        let finalize: Try<()> = Err(Exn::finalize("unwind"));
        assert!(dominant(&cancel, &finalize).as_ref().unwrap_err().is_finalize());
        assert!(dominant(&finalize, &cancel).as_ref().unwrap_err().is_finalize());
    }

    #[test]
    fn dominant_prefers_non_cancel_over_cancel() {
        let cancel: Try<()> = Err(Exn::cancel());
        let err: Try<()> = Err(Exn::error("e"));
        assert!(!dominant(&cancel, &err).as_ref().unwrap_err().is_cancel());
        assert!(!dominant(&err, &cancel).as_ref().unwrap_err().is_cancel());
    }

    #[test]
    fn dominant_keeps_current_when_same_class() {
        let a: Try<()> = Err(Exn::error("a"));
        let b: Try<()> = Err(Exn::error("b"));
        assert_eq!(dominant(&a, &b).as_ref().unwrap_err().message(), "a");
    }

    #[test]
    fn dominant_prefers_exn_over_ok() {
        let ok: Try<i32> = Ok(1);
        let err: Try<i32> = Err(Exn::error("e"));
        assert!(dominant(&ok, &err).is_err());
        assert!(dominant(&err, &ok).is_err());
    }
}
