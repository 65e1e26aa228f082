//! The trampolined run loop: the single interpreter for every [`Effect`].
//!
//! Walking an effect tree never recurses on the host stack. `Bind` and `Map`
//! push a continuation onto an explicit stack (`b_first` plus a lazily
//! allocated `b_rest`, matching the `bFirst`/`bRest` naming of the bind-frame
//! design this loop implements) and loop; only `Async` suspends, by
//! returning from the driving function entirely and resuming later from a
//! freshly reentered call when its callback fires. This is the same
//! discipline the teacher's `runtime::context_switch` module enforces for
//! its own stackful fibers — never grow the host stack across a
//! suspend/resume boundary — achieved here without stack switching, purely
//! by making the continuation stack explicit data instead of the host call
//! stack.

use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::bind_frame::BindFrame;
use crate::callback;
use crate::connection::Connection;
use crate::effect::{Effect, Indirect, Node};
use crate::logger::{shared, Failure, LogSink, SharedSink};

/// A handle returned by [`unsafe_run_cancelable`]: calling it cancels the
/// run it was returned from.
pub struct CancelToken {
    conn: Connection,
}

impl CancelToken {
    /// Signals the run's connection. Idempotent: a second call is a no-op.
    pub fn cancel(&self) {
        self.conn.cancel();
    }
}

/// Starts an uncancelable run of `effect`, delivering its outcome to `cb`
/// exactly once.
pub fn start<E, A, F>(effect: Effect<E, A>, cb: F)
where
    E: 'static,
    A: 'static,
    F: FnOnce(Result<A, E>) + 'static,
{
    start_with_sink(effect, Connection::uncancelable(), cb, shared(LogSink))
}

/// Starts a run of `effect` under the given connection, delivering its
/// outcome to `cb` exactly once. Cancelling `conn` before completion
/// surfaces as whatever `effect`'s own cancellation wiring decides (by
/// default: `cb` is never called — see `crate::cancel`).
pub fn start_cancelable<E, A, F>(effect: Effect<E, A>, conn: Connection, cb: F)
where
    E: 'static,
    A: 'static,
    F: FnOnce(Result<A, E>) + 'static,
{
    start_with_sink(effect, conn, cb, shared(LogSink))
}

/// Like [`start_cancelable`], but with an explicit sink for failures that
/// have nowhere else to go (late callbacks, losing races, failed releases).
pub fn start_with_sink<E, A, F>(effect: Effect<E, A>, conn: Connection, cb: F, sink: SharedSink)
where
    E: 'static,
    A: 'static,
    F: FnOnce(Result<A, E>) + 'static,
{
    let deliver = callback::idempotent(
        Box::new(move |result: Result<Indirect, Indirect>| {
            let typed = result
                .map(|a| *a.downcast::<A>().expect("effectum: run loop delivered wrong value type"))
                .map_err(|e| *e.downcast::<E>().expect("effectum: run loop delivered wrong error type"));
            cb(typed);
        }),
        sink.clone(),
        "runtime::deliver",
    );

    drive(effect.into_node(), conn, sink, None, Vec::new(), deliver);
}

/// The outcome of a synchronous-only [`step`].
pub enum Step<A, E> {
    Done(Result<A, E>),
    /// The synchronous prefix ended on an `Async` node, matching spec.md
    /// §4.1: "returns either a `Pure`, `RaiseError`, or the first `Async`
    /// node encountered." The node's own registration hasn't run yet — call
    /// [`Suspended::register`] to actually register interest on it.
    Suspended(Suspended<E, A>),
}

/// The first `Async` node a [`step`] call encountered, not yet registered.
/// Carries exactly what `Effect::async_effect`'s own `register` closure would
/// have received, so a caller can drive it the same way [`drive`] does
/// internally instead of only learning that a suspension happened.
pub struct Suspended<E, A> {
    #[allow(clippy::type_complexity)]
    register: Box<dyn FnOnce(&Connection, Rc<dyn Fn(Result<Indirect, Indirect>)>)>,
    _marker: PhantomData<fn() -> (E, A)>,
}

impl<E: 'static, A: 'static> Suspended<E, A> {
    /// Invokes the captured node's registration under `conn`, delivering its
    /// eventual result to `cb`. As with any `Async` registration, `cb` must
    /// be invoked at most once; later invocations are the caller's own
    /// responsibility to guard (e.g. with [`crate::callback::idempotent`]
    /// internally, the same way [`drive`] wraps its own restart callback).
    pub fn register<F>(self, conn: &Connection, cb: F)
    where
        F: Fn(Result<A, E>) + 'static,
    {
        let typed: Rc<dyn Fn(Result<Indirect, Indirect>)> = Rc::new(move |result: Result<Indirect, Indirect>| {
            let typed_result = result
                .map(|a| *a.downcast::<A>().expect("effectum: step registration delivered wrong value type"))
                .map_err(|e| *e.downcast::<E>().expect("effectum: step registration delivered wrong error type"));
            cb(typed_result);
        });
        (self.register)(conn, typed);
    }
}

/// Runs `effect`'s synchronous prefix only: `Pure`/`RaiseError`/`Delay`/
/// `Suspend`/`Bind`/`Map` nodes are interpreted exactly as in the full run
/// loop, but an `Async` node is never registered automatically — it is
/// handed back as a [`Suspended`] instead, carrying the node's own
/// registration (not the rest of the bind stack, which this function
/// discards) so the caller can register it itself. Used to probe whether an
/// effect resolves without ever touching the outside world.
pub fn step<E, A>(effect: Effect<E, A>) -> Step<A, E>
where
    E: 'static,
    A: 'static,
{
    let sink = shared(LogSink);
    let mut current = effect.into_node();
    let mut b_first: Option<BindFrame> = None;
    let mut b_rest: Vec<BindFrame> = Vec::new();

    loop {
        match advance(current, &mut b_first, &mut b_rest, &sink) {
            Advance::Continue(next) => current = next,
            Advance::Delivered(Ok(v)) => {
                return Step::Done(Ok(*v.downcast::<A>().expect("effectum: step value type mismatch")))
            }
            Advance::Delivered(Err(e)) => {
                return Step::Done(Err(*e.downcast::<E>().expect("effectum: step error type mismatch")))
            }
            Advance::Suspended(register) => {
                return Step::Suspended(Suspended {
                    register,
                    _marker: PhantomData,
                })
            }
        }
    }
}

/// Runs `effect` to completion and returns its value, assuming it never
/// needs to suspend on an `Async` node that can't be resolved within its own
/// `register` call (i.e. the whole tree resolves through registrations that
/// call their callback before returning, directly or transitively).
///
/// `effectum` owns no executor and no blocking primitive; an `Async` node
/// that defers delivery to an external pump this call can't drive is
/// exactly the "environment without blocking" case this function fails
/// loudly on, rather than hang or return a wrong answer.
///
/// # Panics
/// Panics if `effect` suspends on an `Async` node whose registration does
/// not deliver synchronously.
pub fn unsafe_run_sync<E, A>(effect: Effect<E, A>) -> Result<A, E>
where
    E: 'static,
    A: 'static,
{
    use std::cell::RefCell;

    let slot: Rc<RefCell<Option<Result<A, E>>>> = Rc::new(RefCell::new(None));
    let slot2 = slot.clone();

    start(effect, move |result| {
        *slot2.borrow_mut() = Some(result);
    });

    Rc::try_unwrap(slot)
        .unwrap_or_else(|_| panic!("effectum: unsafe_run_sync: outcome slot still shared"))
        .into_inner()
        .unwrap_or_else(|| {
            panic!(
                "effectum: unsafe_run_sync: effect suspended on an asynchronous operation \
                 that did not complete synchronously; this runtime owns no executor to wait \
                 on it. Use unsafe_run_async (or unsafe_run_cancelable) with a callback-driven \
                 completion instead."
            )
        })
}

/// Like [`unsafe_run_sync`], but bounded against a `limit` raced against a
/// `timer.sleep(limit)` via [`crate::race::race`]. Returns `Ok(None)` if the
/// timer wins, `Ok(Some(value))` if `effect` wins, `Err(e)` if `effect`
/// fails before the timer does.
///
/// A documented simplification of racing each individual suspension inside
/// `effect` against its own fresh deadline: here the *whole* effect is
/// raced against one `timer.sleep(limit)`, so a chain of several short
/// asynchronous waits shares a single overall budget rather than each
/// getting `limit` of its own. Callers wanting a per-wait bound should wrap
/// the waits inside `effect` individually instead of relying on this
/// function.
pub fn unsafe_run_timed<E, A>(
    effect: Effect<E, A>,
    timer: &dyn crate::time::Timer,
    limit: std::time::Duration,
) -> Result<Option<A>, E>
where
    E: 'static,
    A: 'static,
{
    use crate::race::{race, Either};

    let timeout: Effect<E, ()> = {
        let never: Effect<std::convert::Infallible, ()> = timer.sleep(limit);
        never.left_map(|absurd| match absurd {})
    };

    match unsafe_run_sync(race(effect, timeout)) {
        Ok(Either::Left(a)) => Ok(Some(a)),
        Ok(Either::Right(())) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Starts a run of `effect` under a fresh cancelable connection, delivering
/// its outcome to `cb`. Returns a [`CancelToken`] the caller can use to
/// cancel the run.
pub fn unsafe_run_cancelable<E, A, F>(effect: Effect<E, A>, cb: F) -> CancelToken
where
    E: 'static,
    A: 'static,
    F: FnOnce(Result<A, E>) + 'static,
{
    let conn = Connection::cancelable();
    start_cancelable(effect, conn.clone(), cb);
    CancelToken { conn }
}

/// Uncancelable run with the default `log`-backed sink, discarding the
/// outcome; a convenience for call sites that only care about side effects.
pub fn unsafe_run_async<E, A, F>(effect: Effect<E, A>, cb: F)
where
    E: 'static,
    A: 'static,
    F: FnOnce(Result<A, E>) + 'static,
{
    start(effect, cb)
}

/// What one call to [`advance`] decided to do next.
enum Advance {
    Continue(Node),
    Delivered(Result<Indirect, Indirect>),
    Suspended(Box<dyn FnOnce(&Connection, Rc<dyn Fn(Result<Indirect, Indirect>)>)>),
}

/// One dispatch of the run loop over a node that is known to make
/// synchronous progress (every shape except `Async`, which the caller
/// handles itself since what happens next — register and suspend, or report
/// "suspended" and stop — differs between [`drive`] and [`step`]).
fn advance(current: Node, b_first: &mut Option<BindFrame>, b_rest: &mut Vec<BindFrame>, sink: &SharedSink) -> Advance {
    match current {
        Node::Pure(value) => match pop_frame(b_first, b_rest) {
            Some(frame) => Advance::Continue(apply_value_reporting(&frame, value, sink)),
            None => Advance::Delivered(Ok(value)),
        },
        Node::RaiseError(error) => match search_handler(b_first, b_rest, error, sink) {
            Ok(recovered) => Advance::Continue(recovered),
            Err(undelivered) => Advance::Delivered(Err(undelivered)),
        },
        Node::Delay { thunk, err_map } => match panic::catch_unwind(AssertUnwindSafe(thunk)) {
            Ok(Ok(value)) => Advance::Continue(Node::Pure(value)),
            Ok(Err(fault)) => Advance::Continue(Node::RaiseError(err_map(fault))),
            Err(panic_payload) => Advance::Continue(Node::RaiseError(err_map(panic_payload))),
        },
        Node::Suspend { thunk, err_map } => match panic::catch_unwind(AssertUnwindSafe(thunk)) {
            Ok(Ok(next)) => Advance::Continue(next),
            Ok(Err(fault)) => Advance::Continue(Node::RaiseError(err_map(fault))),
            Err(panic_payload) => Advance::Continue(Node::RaiseError(err_map(panic_payload))),
        },
        Node::Bind { source, bind } => {
            push_frame(b_first, b_rest, bind);
            Advance::Continue(*source)
        }
        Node::Map { source, map, .. } => {
            push_frame(b_first, b_rest, BindFrame::Plain(Rc::new(move |v| Node::Pure(map(v)))));
            Advance::Continue(*source)
        }
        Node::Async(register) => Advance::Suspended(register),
    }
}

/// The full loop: [`advance`] until either delivery or suspension; on
/// suspension, register the async node with a restart callback that resumes
/// this same loop from the snapshot it captured.
fn drive(
    mut current: Node,
    conn: Connection,
    sink: SharedSink,
    mut b_first: Option<BindFrame>,
    mut b_rest: Vec<BindFrame>,
    deliver: Rc<dyn Fn(Result<Indirect, Indirect>)>,
) {
    loop {
        match advance(current, &mut b_first, &mut b_rest, &sink) {
            Advance::Continue(next) => current = next,
            Advance::Delivered(result) => {
                deliver(result);
                return;
            }
            Advance::Suspended(register) => {
                let conn_for_resume = conn.clone();
                let sink_for_resume = sink.clone();
                let deliver_for_resume = deliver.clone();
                let mut b_first = b_first;
                let mut b_rest = b_rest;

                let restart = move |result: Result<Indirect, Indirect>| {
                    let resumed = match result {
                        Ok(v) => Node::Pure(v),
                        Err(e) => Node::RaiseError(e),
                    };
                    drive(
                        resumed,
                        conn_for_resume.clone(),
                        sink_for_resume.clone(),
                        b_first.take(),
                        std::mem::take(&mut b_rest),
                        deliver_for_resume.clone(),
                    );
                };

                let restart_cb = callback::idempotent(Box::new(restart), sink.clone(), "async::restart");
                register(&conn, restart_cb);
                return;
            }
        }
    }
}

/// Pops the single most-recent frame off `b_first`/`b_rest`, refilling
/// `b_first` from `b_rest` if it was the last one. Both frame shapes apply
/// here: a plain frame always transforms the value, an error-handler
/// frame's success branch is usually identity (`handle_error_with`) but may
/// transform it too (`attempt`).
fn pop_frame(b_first: &mut Option<BindFrame>, b_rest: &mut Vec<BindFrame>) -> Option<BindFrame> {
    let frame = b_first.take()?;
    *b_first = b_rest.pop();
    Some(frame)
}

fn push_frame(b_first: &mut Option<BindFrame>, b_rest: &mut Vec<BindFrame>, frame: BindFrame) {
    if let Some(previous) = b_first.take() {
        b_rest.push(previous);
    }
    *b_first = Some(frame);
}

/// Searches for the first error-handler frame, discarding plain frames along
/// the way (they are transparent to an error in flight — [`BindFrame::recover`]
/// hands the error straight back on that path). `Ok` carries the recovered
/// node to resume with; `Err` carries the error back out because the stack
/// was exhausted without finding a handler.
fn search_handler(
    b_first: &mut Option<BindFrame>,
    b_rest: &mut Vec<BindFrame>,
    error: Indirect,
    sink: &SharedSink,
) -> Result<Node, Indirect> {
    let mut error = error;
    loop {
        match pop_frame(b_first, b_rest) {
            None => return Err(error),
            Some(frame) => match recover_reporting(&frame, error, sink) {
                Ok(recovered) => return Ok(recovered),
                Err(handed_back) => error = handed_back,
            },
        }
    }
}

/// Invokes `frame`'s success branch (the continuation a `Bind`/`Map`/
/// `handle_error_with`/`attempt` installed), reporting and re-raising a host
/// fault instead of letting it unwind unannounced. Per spec.md §7 taxonomy
/// item 3, a continuation fault is a programming bug, not a typed failure:
/// it must be reported to the sink logger and still escape the run loop,
/// exactly like `Effect::cancelable`'s `register` panic at `src/effect.rs`.
fn apply_value_reporting(frame: &BindFrame, value: Indirect, sink: &SharedSink) -> Node {
    match panic::catch_unwind(AssertUnwindSafe(|| frame.apply_value(value))) {
        Ok(node) => node,
        Err(panic_payload) => {
            sink.report_failure(Failure {
                message: &"a bind continuation panicked",
                site: "runtime::continuation",
            });
            panic::resume_unwind(panic_payload)
        }
    }
}

/// Invokes `frame`'s recovery branch, with the same report-then-reraise
/// treatment as [`apply_value_reporting`] for a host fault inside it.
fn recover_reporting(frame: &BindFrame, error: Indirect, sink: &SharedSink) -> Result<Node, Indirect> {
    match panic::catch_unwind(AssertUnwindSafe(|| frame.recover(error))) {
        Ok(result) => result,
        Err(panic_payload) => {
            sink.report_failure(Failure {
                message: &"a bind error handler panicked",
                site: "runtime::continuation",
            });
            panic::resume_unwind(panic_payload)
        }
    }
}
