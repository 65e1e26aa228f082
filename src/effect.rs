//! The effect algebra: a closed set of node shapes describing synchronous and
//! asynchronous computations.
//!
//! An [`Effect`] is an immutable value. Building one does nothing; only handing
//! it to the run loop (see [`crate::runtime`]) interprets it. The same value can
//! be run any number of times, and each run is independent.
//!
//! Internally every [`Effect<E, A>`] is a thin, phantom-typed handle around an
//! untyped [`Node`] tree: both the value and error channels are erased to
//! [`Indirect`] inside `Node`, the same way the teacher's
//! `runtime::task::raw::TaskPointer` erases a generic `Future` behind one
//! non-generic pointer so a single loop can walk a heterogeneous collection.
//! `E`/`A` only exist as concrete types at the edges: a combinator boxes a
//! concrete value in, and the top-level run loop downcasts the final value
//! back out before handing it to the caller's typed callback.

use std::any::Any;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::bind_frame::BindFrame;
use crate::connection::Connection;

/// Maximum number of consecutive [`Effect::map`] calls fused by function
/// composition before a fresh `Map` node is emitted.
///
/// Bounds the depth of host-function composition that would otherwise grow
/// unboundedly on a long chain of `.map()` calls.
pub const FUSION_MAX_STACK_DEPTH: u32 = 127;

/// A type-erased host-level fault, e.g. a caught `panic` payload or an
/// arbitrary boxed error. Only `Delay`/`Suspend` thunks produce these; they
/// are immediately converted to `E` via the constructor's `err_map` and never
/// otherwise observed by user code.
pub type AnyFault = Box<dyn Any + Send>;

/// A type-erased value, used wherever the run loop needs to hold "whatever
/// the previous node produced" (on either the value or the error channel)
/// without knowing its concrete type.
pub(crate) type Indirect = Box<dyn Any>;

/// The callback an `Async` registration uses to deliver its result.
///
/// This is an `Rc<dyn Fn>`, not an `FnOnce`: nothing in the type system stops
/// a misbehaving (or merely racy) registration from invoking it more than
/// once, which is exactly the scenario [`crate::callback::idempotent`] wraps
/// every registration's callback to guard against before `register` ever
/// sees it. Only the first invocation is ever delivered.
pub type AsyncCallback<E, A> = Rc<dyn Fn(Result<A, E>)>;

/// The placeholder a pushed cancel hook consults while
/// [`Effect::cancelable`]'s `register` call is still on the stack.
enum ForwardCancel {
    /// `register` hasn't returned yet; no cancel effect to run.
    Unset,
    /// A cancel signal arrived before `register` returned one.
    CanceledBeforeSet,
    /// `register` returned; this runs the cancel effect exactly once.
    Set(Box<dyn FnOnce()>),
    /// The cancel hook already fired (or `register` panicked).
    Invoked,
}

/// The closed variant of computation shapes the run loop interprets.
///
/// Matches spec.md §3 exactly: `Pure`, `RaiseError`, `Delay`, `Suspend`,
/// `Bind`, `Map`, `Async`. Operates entirely in the erased ([`Indirect`])
/// domain; [`Effect<E, A>`] is the typed façade built on top, and
/// `crate::runtime` is the only other module that pattern-matches on this
/// directly.
pub(crate) enum Node {
    Pure(Indirect),
    RaiseError(Indirect),
    Delay {
        thunk: Box<dyn FnOnce() -> Result<Indirect, AnyFault>>,
        err_map: Rc<dyn Fn(AnyFault) -> Indirect>,
    },
    Suspend {
        thunk: Box<dyn FnOnce() -> Result<Node, AnyFault>>,
        err_map: Rc<dyn Fn(AnyFault) -> Indirect>,
    },
    Bind {
        source: Box<Node>,
        bind: BindFrame,
    },
    Map {
        source: Box<Node>,
        map: Rc<dyn Fn(Indirect) -> Indirect>,
        depth: u32,
    },
    #[allow(clippy::type_complexity)]
    Async(Box<dyn FnOnce(&Connection, Rc<dyn Fn(Result<Indirect, Indirect>)>)>),
}

/// A description of a computation that either fails with `E` or succeeds
/// with `A`. Effects are immutable values: building one runs nothing, and
/// the same value can be interpreted any number of times independently.
pub struct Effect<E, A> {
    pub(crate) node: Node,
    _marker: PhantomData<fn() -> (E, A)>,
}

impl<E, A> Effect<E, A> {
    pub(crate) fn from_node(node: Node) -> Self {
        Effect {
            node,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_node(self) -> Node {
        self.node
    }
}

impl<E, A: 'static> Effect<E, A> {
    /// Immediate success, carried without running anything.
    pub fn pure(a: A) -> Self {
        Effect::from_node(Node::Pure(Box::new(a)))
    }
}

impl<E> Effect<E, ()> {
    /// Immediate success carrying `()`. A convenience alias for
    /// `Effect::pure(())`, for call sites that discard a value anyway.
    pub fn unit() -> Self {
        Effect::from_node(Node::Pure(Box::new(())))
    }
}

impl<E: 'static, A> Effect<E, A> {
    /// Immediate failure, carried without running anything.
    pub fn raise_error(e: E) -> Self {
        Effect::from_node(Node::RaiseError(Box::new(e)))
    }
}

impl<E: 'static, A: 'static> Effect<E, A> {
    /// An effect that never completes. A run cancelled while evaluating
    /// `never()` simply never invokes its callback; see the cancellation
    /// semantics in `crate::connection`.
    pub fn never() -> Effect<E, A> {
        Effect::async_effect(|_conn, _cb| {
            // No registration, no delivery: the run loop suspends here forever.
        })
    }

    /// Captures a synchronous computation. If `thunk` panics, `err_map`
    /// converts the caught payload into an `E`. Use
    /// [`Effect::delay_result`] if the thunk reports its own fault through a
    /// `Result` rather than by unwinding.
    pub fn delay<F, M>(thunk: F, err_map: M) -> Self
    where
        F: FnOnce() -> A + 'static,
        M: Fn(AnyFault) -> E + 'static,
    {
        Effect::from_node(Node::Delay {
            thunk: Box::new(move || Ok(Box::new(thunk()) as Indirect)),
            err_map: Rc::new(move |fault| Box::new(err_map(fault)) as Indirect),
        })
    }

    /// Captures a synchronous computation with no failure mode of its own
    /// (e.g. allocating a connection, spawning a fiber). If `thunk` panics
    /// anyway, that panic propagates out of the run loop unchanged rather
    /// than being converted to an `E` — there is no `err_map` to convert it
    /// with.
    pub fn delay_infallible<F>(thunk: F) -> Self
    where
        F: FnOnce() -> A + 'static,
    {
        Effect::delay(thunk, |fault| panic::resume_unwind(fault))
    }

    /// Captures a synchronous computation that reports its own fault through
    /// a `Result` rather than by unwinding.
    pub fn delay_result<F, M>(thunk: F, err_map: M) -> Self
    where
        F: FnOnce() -> Result<A, AnyFault> + 'static,
        M: Fn(AnyFault) -> E + 'static,
    {
        Effect::from_node(Node::Delay {
            thunk: Box::new(move || thunk().map(|a| Box::new(a) as Indirect)),
            err_map: Rc::new(move |fault| Box::new(err_map(fault)) as Indirect),
        })
    }

    /// Captures a synchronous computation that produces another effect,
    /// trampolining what would otherwise be host-stack recursion: a
    /// function that would recurse on the host stack instead returns
    /// `Effect::suspend(move || next_call(), err_map)`.
    pub fn suspend<F, M>(thunk: F, err_map: M) -> Self
    where
        F: FnOnce() -> Effect<E, A> + 'static,
        M: Fn(AnyFault) -> E + 'static,
    {
        Effect::from_node(Node::Suspend {
            thunk: Box::new(move || Ok(thunk().into_node())),
            err_map: Rc::new(move |fault| Box::new(err_map(fault)) as Indirect),
        })
    }

    /// An externally driven effect: `register(connection, callback)` is
    /// invoked when this node is interpreted; `callback` must be invoked at
    /// most once (see [`crate::callback`]) to deliver the result, possibly
    /// much later and possibly from a different call stack.
    pub fn async_effect<F>(register: F) -> Self
    where
        F: FnOnce(&Connection, AsyncCallback<E, A>) + 'static,
    {
        Effect::from_node(Node::Async(Box::new(move |conn, cb: Rc<dyn Fn(Result<Indirect, Indirect>)>| {
            let typed: AsyncCallback<E, A> = Rc::new(move |result: Result<A, E>| {
                cb(result
                    .map(|a| Box::new(a) as Indirect)
                    .map_err(|e| Box::new(e) as Indirect))
            });
            register(conn, typed)
        })))
    }

    /// Identical to [`Effect::async_effect`], except `register` itself
    /// returns the effect to run if this node is cancelled while still in
    /// flight, matching spec.md's "cancelable async builder" (§4.3).
    ///
    /// The returned cancel effect is held in a forward-cancelable
    /// placeholder: a hook is pushed onto `conn` before `register` runs, so
    /// a cancel signal arriving while `register` is still on the stack is
    /// recorded rather than lost, and the cancel effect runs the moment it
    /// is finally set. If `register` panics before returning one, the panic
    /// is reported to the default sink and cancelling this node becomes a
    /// no-op — spec.md: "If register throws, the failure is reported to the
    /// sink logger and the cancel effect is set to a no-op."
    pub fn cancelable<F>(register: F) -> Self
    where
        F: FnOnce(AsyncCallback<E, A>) -> Effect<std::convert::Infallible, ()> + 'static,
    {
        Effect::async_effect(move |conn, cb| {
            let forward: Rc<RefCell<ForwardCancel>> = Rc::new(RefCell::new(ForwardCancel::Unset));

            {
                let forward = forward.clone();
                conn.push(Box::new(move || {
                    let prior = std::mem::replace(&mut *forward.borrow_mut(), ForwardCancel::Invoked);
                    match prior {
                        ForwardCancel::Set(run) => run(),
                        ForwardCancel::Unset => *forward.borrow_mut() = ForwardCancel::CanceledBeforeSet,
                        ForwardCancel::CanceledBeforeSet | ForwardCancel::Invoked => {}
                    }
                }));
            }

            match panic::catch_unwind(AssertUnwindSafe(|| register(cb))) {
                Ok(cancel_effect) => {
                    let run: Box<dyn FnOnce()> = Box::new(move || {
                        crate::runtime::start(cancel_effect, |_: Result<(), std::convert::Infallible>| {});
                    });
                    let mut guard = forward.borrow_mut();
                    if matches!(&*guard, ForwardCancel::CanceledBeforeSet) {
                        *guard = ForwardCancel::Invoked;
                        drop(guard);
                        run();
                    } else {
                        *guard = ForwardCancel::Set(run);
                    }
                }
                Err(_panic_payload) => {
                    *forward.borrow_mut() = ForwardCancel::Invoked;
                    crate::logger::shared(crate::logger::LogSink).report_failure(crate::logger::Failure {
                        message: &"cancelable's register panicked before returning a cancel effect",
                        site: "effect::cancelable",
                    });
                }
            }
        })
    }

    /// Sequential composition: run `self`, feed its value to `f`, run the
    /// resulting effect.
    pub fn flat_map<B, F>(self, f: F) -> Effect<E, B>
    where
        B: 'static,
        F: Fn(A) -> Effect<E, B> + 'static,
    {
        let source = self.into_node();
        Effect::from_node(Node::Bind {
            source: Box::new(source),
            bind: BindFrame::Plain(Rc::new(move |indirect: Indirect| {
                let a = *indirect.downcast::<A>().expect("effectum: bind frame type mismatch");
                f(a).into_node()
            })),
        })
    }

    /// Optimised transform for pure functions; fuses with a preceding `Map`
    /// node up to [`FUSION_MAX_STACK_DEPTH`] times before resetting.
    pub fn map<B, F>(self, f: F) -> Effect<E, B>
    where
        B: 'static,
        F: Fn(A) -> B + 'static,
    {
        match self.node {
            Node::Map { source, map, depth } if depth < FUSION_MAX_STACK_DEPTH => {
                let composed = move |indirect: Indirect| -> Indirect {
                    let a = *map(indirect).downcast::<A>().expect("effectum: map fusion type mismatch");
                    Box::new(f(a)) as Indirect
                };
                Effect::from_node(Node::Map {
                    source,
                    map: Rc::new(composed),
                    depth: depth + 1,
                })
            }
            other => Effect::from_node(Node::Map {
                source: Box::new(other),
                map: Rc::new(move |indirect: Indirect| {
                    let a = *indirect.downcast::<A>().expect("effectum: map frame type mismatch");
                    Box::new(f(a)) as Indirect
                }),
                depth: 1,
            }),
        }
    }

    /// Materialises failure into a value: `Ok(a)` on success, `Err(e)` on
    /// failure. Never propagates the error further.
    pub fn attempt(self) -> Effect<E, Result<A, E>> {
        let source = self.into_node();
        Effect::from_node(Node::Bind {
            source: Box::new(source),
            bind: BindFrame::ErrorHandler {
                success: Rc::new(move |indirect: Indirect| {
                    let a = *indirect.downcast::<A>().expect("effectum: attempt type mismatch");
                    Node::Pure(Box::new(Ok::<A, E>(a)) as Indirect)
                }),
                recover: Rc::new(move |indirect: Indirect| {
                    let e = *indirect.downcast::<E>().expect("effectum: attempt recover type mismatch");
                    Node::Pure(Box::new(Err::<A, E>(e)) as Indirect)
                }),
            },
        })
    }

    /// Recovers from failure by running `recover(e)` in place of a fatal
    /// error; a successful value passes through unchanged.
    pub fn handle_error_with<F>(self, recover: F) -> Effect<E, A>
    where
        F: Fn(E) -> Effect<E, A> + 'static,
    {
        let source = self.into_node();
        Effect::from_node(Node::Bind {
            source: Box::new(source),
            bind: BindFrame::ErrorHandler {
                success: Rc::new(Node::Pure),
                recover: Rc::new(move |indirect: Indirect| {
                    let e = *indirect.downcast::<E>().expect("effectum: handle_error_with type mismatch");
                    recover(e).into_node()
                }),
            },
        })
    }

    /// Maps the failure channel, leaving the value channel untouched.
    ///
    /// Implemented as a single outer catch-all frame rather than by
    /// rewriting every error site inside `self`: any error that `self`
    /// already recovers from internally never reaches this frame, so there
    /// is nothing to reindex in place. Only the error that ultimately
    /// escapes `self` is translated through `f`.
    pub fn left_map<E2, F>(self, f: F) -> Effect<E2, A>
    where
        E2: 'static,
        F: Fn(E) -> E2 + 'static,
    {
        let source = self.into_node();
        Effect::from_node(Node::Bind {
            source: Box::new(source),
            bind: BindFrame::ErrorHandler {
                success: Rc::new(Node::Pure),
                recover: Rc::new(move |indirect: Indirect| {
                    let e = *indirect.downcast::<E>().expect("effectum: left_map type mismatch");
                    Node::RaiseError(Box::new(f(e)) as Indirect)
                }),
            },
        })
    }

    /// Maps both channels.
    pub fn bimap<E2, B, FE, FA>(self, fe: FE, fa: FA) -> Effect<E2, B>
    where
        E2: 'static,
        B: 'static,
        FE: Fn(E) -> E2 + 'static,
        FA: Fn(A) -> B + 'static,
    {
        self.left_map(fe).map(fa)
    }
}
