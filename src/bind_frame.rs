//! Continuation objects pushed onto the run loop's bind stack.
//!
//! A frame is either a plain continuation (fed a value, produces the next
//! node) or an error handler (fed a value *or* consulted for recovery on
//! `RaiseError`). Both the value and the error channel are type-erased here
//! ([`Indirect`]); [`crate::effect::Effect<E, A>`] is the only place `E`/`A`
//! exist as concrete types, recovered via `downcast` at the two edges (a
//! combinator boxing a value in, the run loop unboxing the final result out).
//! This mirrors how the teacher's `runtime::task::raw::TaskPointer` erases a
//! generic `Future` behind one non-generic pointer so a single loop can walk
//! a heterogeneous collection of tasks; here the collection being walked is
//! one effect's heterogeneous chain of binds.

use std::rc::Rc;

use crate::effect::{Indirect, Node};

pub(crate) enum BindFrame {
    Plain(Rc<dyn Fn(Indirect) -> Node>),
    ErrorHandler {
        success: Rc<dyn Fn(Indirect) -> Node>,
        recover: Rc<dyn Fn(Indirect) -> Node>,
    },
}

impl Clone for BindFrame {
    fn clone(&self) -> Self {
        match self {
            BindFrame::Plain(f) => BindFrame::Plain(f.clone()),
            BindFrame::ErrorHandler { success, recover } => BindFrame::ErrorHandler {
                success: success.clone(),
                recover: recover.clone(),
            },
        }
    }
}

impl BindFrame {
    /// Applies the frame's success branch to a delivered value. Both frame
    /// shapes have one: for a plain frame it's the whole frame; for an
    /// error-handler frame it's usually identity (`handle_error_with`) but
    /// may transform the value (`attempt`).
    pub(crate) fn apply_value(&self, value: Indirect) -> Node {
        match self {
            BindFrame::Plain(f) => f(value),
            BindFrame::ErrorHandler { success, .. } => success(value),
        }
    }

    /// Consults the frame's recovery branch. A plain frame is transparent to
    /// errors: it hands `error` straight back so the search can continue
    /// down the bind stack without losing it.
    pub(crate) fn recover(&self, error: Indirect) -> Result<Node, Indirect> {
        match self {
            BindFrame::Plain(_) => Err(error),
            BindFrame::ErrorHandler { recover, .. } => Ok(recover(error)),
        }
    }
}
