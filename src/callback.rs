//! The idempotent callback adapter.
//!
//! Every callback the run loop hands out to external code — to an `Async`
//! registration, to a fiber's completion slot, to a race's per-child
//! completion hook — is wrapped by [`idempotent`] before being exposed. This
//! gives spec.md §4.8's three guarantees: at most one delivery, trampolined
//! re-entry so recursion through callbacks cannot grow the host stack, and a
//! second-or-later call is reported to the [`crate::logger::SinkLogger`]
//! rather than silently dropped or (worse) delivered twice.

use std::cell::RefCell;
use std::rc::Rc;

use crate::logger::{Failure, SharedSink};
use crate::trampoline;

/// Wraps a one-shot callback so that only the first invocation reaches it;
/// later invocations are reported to `sink` under `site` and otherwise
/// discarded. The returned handle can be cloned and called from as many
/// places as needed — exactly one of those calls will win.
pub(crate) fn idempotent<T: 'static>(
    inner: Box<dyn FnOnce(T)>,
    sink: SharedSink,
    site: &'static str,
) -> Rc<dyn Fn(T)> {
    let slot: Rc<RefCell<Option<Box<dyn FnOnce(T)>>>> = Rc::new(RefCell::new(Some(inner)));

    Rc::new(move |value: T| {
        let taken = slot.borrow_mut().take();
        match taken {
            Some(f) => trampoline::run(Box::new(move || f(value))),
            None => sink.report_failure(Failure {
                message: &"callback invoked after it already delivered a result",
                site,
            }),
        }
    })
}
