//! Per-run cancellation token.
//!
//! A [`Connection`] is either uncancelable (a permanent no-op) or a LIFO
//! stack of cancel hooks guarding one run. Async builders push a hook when
//! they register external work and pop it once that work settles without
//! needing cancellation anymore.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A boxed cancel hook: invoked at most once, when the owning connection is
/// cancelled.
pub type CancelHook = Box<dyn FnOnce()>;

enum Kind {
    /// No-op: cancellation is permanently disabled for this connection.
    Uncancelable,
    /// A live stack of hooks guarding one run.
    Cancelable(RefCell<Vec<CancelHook>>),
}

/// The cancellation token scoped to one run (or one region of a run, under
/// [`crate::cancel::uncancelable`]).
///
/// Cloning a `Connection` shares the same underlying state; all clones
/// observe the same `is_canceled` flag and the same hook stack.
#[derive(Clone)]
pub struct Connection {
    kind: Rc<Kind>,
    canceled: Rc<AtomicBool>,
}

impl Connection {
    /// A fresh, live connection with an empty hook stack.
    pub fn cancelable() -> Self {
        Connection {
            kind: Rc::new(Kind::Cancelable(RefCell::new(Vec::new()))),
            canceled: Rc::new(AtomicBool::new(false)),
        }
    }

    /// The permanently-uncancelable connection. Push/pop are no-ops;
    /// `is_canceled` is permanently `false`.
    pub fn uncancelable() -> Self {
        Connection {
            kind: Rc::new(Kind::Uncancelable),
            canceled: Rc::new(AtomicBool::new(false)),
        }
    }

    /// Appends a hook to the top of the stack. If this connection is already
    /// canceled, the hook fires immediately instead of being enqueued (a
    /// late registration must still observe the cancellation it arrived
    /// after).
    pub fn push(&self, hook: CancelHook) {
        match &*self.kind {
            Kind::Uncancelable => {}
            Kind::Cancelable(stack) => {
                if self.is_canceled() {
                    hook();
                } else {
                    stack.borrow_mut().push(hook);
                }
            }
        }
    }

    /// Removes the most recently pushed hook without invoking it. Used once
    /// an async operation settles and no longer needs its cancel hook.
    pub fn pop(&self) {
        if let Kind::Cancelable(stack) = &*self.kind {
            stack.borrow_mut().pop();
        }
    }

    /// Atomically marks this connection canceled and invokes every pushed
    /// hook, most-recently-pushed first, exactly once. A second call is a
    /// no-op (idempotent).
    pub fn cancel(&self) {
        match &*self.kind {
            Kind::Uncancelable => {}
            Kind::Cancelable(stack) => {
                if self.canceled.swap(true, Ordering::SeqCst) {
                    return;
                }
                let hooks: Vec<CancelHook> = std::mem::take(&mut *stack.borrow_mut());
                for hook in hooks.into_iter().rev() {
                    hook();
                }
            }
        }
    }

    /// Whether [`Connection::cancel`] has been called. Monotonic: once
    /// `true`, stays `true`. Permanently `false` for an uncancelable
    /// connection.
    pub fn is_canceled(&self) -> bool {
        matches!(&*self.kind, Kind::Cancelable(_)) && self.canceled.load(Ordering::SeqCst)
    }

    /// Whether this connection can ever be canceled at all (distinguishes a
    /// live-but-not-yet-canceled connection from the permanent
    /// [`Connection::uncancelable`] singleton).
    pub fn is_cancelable(&self) -> bool {
        matches!(&*self.kind, Kind::Cancelable(_))
    }
}
