//! The crate's own error type, used at boundaries that need to represent
//! cancellation as a value alongside the user's typed failure `E`.
//!
//! This does not replace the `E` channel the effect algebra carries (that
//! stays exactly the user's own error type throughout `Effect<E, A>`); it is
//! the type used where spec.md says cancellation is "surfaced... through
//! bracket's exit case or `onCancelRaiseError`" as an ordinary value, e.g.
//! the default error handed to `onCancelRaiseError` and the boundary crossed
//! by `unsafe_run_timed`. Modelled directly on the teacher's own
//! `uringy::Error<E>` in `src/lib.rs`.

/// Either the user's own typed failure, or a marker that the computation was
/// canceled.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error<E> {
    #[error(transparent)]
    Original(#[from] E),

    #[error("canceled")]
    Canceled,
}

impl<E> Error<E> {
    /// Transforms the wrapped original error, leaving `Canceled` untouched.
    #[inline]
    pub fn map<F: FnOnce(E) -> U, U>(self, f: F) -> Error<U> {
        match self {
            Error::Original(e) => Error::Original(f(e)),
            Error::Canceled => Error::Canceled,
        }
    }

    /// Chains into another `Error`, leaving `Canceled` untouched.
    #[inline]
    pub fn and_then<F: FnOnce(E) -> Error<U>, U>(self, f: F) -> Error<U> {
        match self {
            Error::Original(e) => f(e),
            Error::Canceled => Error::Canceled,
        }
    }

    /// `true` for `Canceled`, `false` for a genuine original failure.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }
}
