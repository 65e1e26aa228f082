//! The immediate executor: runs tiny continuations inline rather than
//! queuing them, while guaranteeing that repeated re-entry through callbacks
//! never grows the host stack.
//!
//! spec.md §6 calls this "an immediate executor (a trampoline) used to run
//! tiny continuations inline; used by the callback adapter and by
//! future-interop." The teacher's equivalent discipline lives in its
//! `runtime::context_switch` module (never grow the host stack across a
//! suspend/resume boundary); here the same guarantee is achieved without
//! stack switching, by converting re-entrant calls into a loop.

use std::cell::RefCell;

thread_local! {
    static QUEUE: RefCell<Vec<Box<dyn FnOnce()>>> = RefCell::new(Vec::new());
    static RUNNING: RefCell<bool> = RefCell::new(false);
}

/// Resets `RUNNING` to `false` when dropped, including when dropped during an
/// unwind. Without this, a panic inside `task()` (or a drained queue entry) —
/// e.g. a continuation fault from `runtime::advance` propagating through
/// `callback::idempotent` — would skip the plain assignment at the end of
/// `run` and leave `RUNNING` stuck at `true` forever, silently queuing every
/// later callback on this thread without anything left to drain it.
struct RunningGuard;

impl Drop for RunningGuard {
    fn drop(&mut self) {
        RUNNING.with(|flag| *flag.borrow_mut() = false);
    }
}

/// Runs `task` immediately if no trampolined task is currently executing on
/// this thread; otherwise enqueues it to run once the current task (and any
/// tasks it enqueues) finish.
///
/// This is what keeps a chain of synchronous callback-to-callback
/// re-entrancy (e.g. an `Async` node whose registration completes
/// synchronously, whose callback resumes the run loop, which suspends on
/// another already-complete `Async` node, ...) from recursing on the host
/// stack: each nested `run` call just appends to the queue and returns, and
/// the outermost call drains it in a loop.
pub(crate) fn run(task: Box<dyn FnOnce()>) {
    let already_running = RUNNING.with(|flag| *flag.borrow());

    if already_running {
        QUEUE.with(|queue| queue.borrow_mut().push(task));
        return;
    }

    RUNNING.with(|flag| *flag.borrow_mut() = true);
    let _guard = RunningGuard;

    task();

    loop {
        let next = QUEUE.with(|queue| queue.borrow_mut().pop());
        match next {
            Some(task) => task(),
            None => break,
        }
    }
}
