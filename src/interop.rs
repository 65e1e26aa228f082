//! Boundary conversions between [`Effect`] and the host ecosystem's
//! `Future`/`Result` types: [`from_future`], [`unsafe_to_future`], and
//! [`from_either`].
//!
//! `effectum` does not otherwise know `std::future::Future` exists — these
//! three functions are the only place it does. Driving a foreign future is
//! grounded on the teacher's `runtime::task::raw::TaskPointer::waker`, which
//! bridges its own task handle to a `std::task::Waker`; here the same
//! bridging runs through [`crate::trampoline`] rather than the teacher's
//! scheduler queue, since there is no executor of our own to reschedule
//! onto.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use waker_fn::waker_fn;

use crate::effect::{AsyncCallback, Effect};
use crate::runtime;
use crate::trampoline;

/// Converts a plain `Result` into an already-decided effect: `Ok` becomes
/// [`Effect::pure`], `Err` becomes [`Effect::raise_error`].
pub fn from_either<E, A>(value: Result<A, E>) -> Effect<E, A>
where
    E: 'static,
    A: 'static,
{
    match value {
        Ok(a) => Effect::pure(a),
        Err(e) => Effect::raise_error(e),
    }
}

/// Wraps a foreign `Future` as an effect: polls it through the immediate
/// executor, registering a waker that re-polls (rather than completing
/// inline) whenever the future wakes itself. Completes with the future's
/// own output on its first `Poll::Ready`.
pub fn from_future<E, A, Fut>(future: Fut) -> Effect<E, A>
where
    E: 'static,
    A: 'static,
    Fut: Future<Output = Result<A, E>> + 'static,
{
    Effect::async_effect(move |_conn, cb| {
        let future: Rc<RefCell<Pin<Box<dyn Future<Output = Result<A, E>>>>>> =
            Rc::new(RefCell::new(Box::pin(future)));
        poll_future(future, cb);
    })
}

fn poll_future<E: 'static, A: 'static>(
    future: Rc<RefCell<Pin<Box<dyn Future<Output = Result<A, E>>>>>>,
    cb: AsyncCallback<E, A>,
) {
    let waker = {
        let future = future.clone();
        let cb = cb.clone();
        waker_fn(move || {
            let future = future.clone();
            let cb = cb.clone();
            trampoline::run(Box::new(move || poll_future(future, cb)));
        })
    };

    let mut context = Context::from_waker(&waker);
    let poll = future.borrow_mut().as_mut().poll(&mut context);
    if let Poll::Ready(result) = poll {
        cb(result);
    }
}

enum FutureState<E, A> {
    NotStarted(Option<Effect<E, A>>),
    Pending(Option<Waker>),
    Done(Option<Result<A, E>>),
}

/// A `std::future::Future` backed by an effect, for embedding into a host
/// async runtime. Starting is deferred to the first poll (the effect is run
/// uncancelably, matching [`runtime::unsafe_run_async`] — there is no
/// cancellation to propagate back through a bare `Future`).
struct EffectFuture<E, A> {
    state: Rc<RefCell<FutureState<E, A>>>,
}

impl<E: 'static, A: 'static> Future for EffectFuture<E, A> {
    type Output = Result<A, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.borrow_mut();
        match &mut *state {
            FutureState::NotStarted(effect) => {
                let effect = effect.take().expect("effectum: future polled twice while starting");
                *state = FutureState::Pending(Some(cx.waker().clone()));
                drop(state);

                let state_handle = self.state.clone();
                runtime::start(effect, move |result| {
                    let waker = match std::mem::replace(&mut *state_handle.borrow_mut(), FutureState::Done(Some(result))) {
                        FutureState::Pending(waker) => waker,
                        _ => None,
                    };
                    if let Some(waker) = waker {
                        waker.wake();
                    }
                });

                Poll::Pending
            }
            FutureState::Pending(waker) => {
                *waker = Some(cx.waker().clone());
                Poll::Pending
            }
            FutureState::Done(result) => {
                Poll::Ready(result.take().expect("effectum: future polled after completion"))
            }
        }
    }
}

/// Converts an effect into a `std::future::Future`, completing on the
/// effect's first result delivery. The effect does not start running until
/// the future is first polled.
pub fn unsafe_to_future<E, A>(effect: Effect<E, A>) -> impl Future<Output = Result<A, E>>
where
    E: 'static,
    A: 'static,
{
    EffectFuture {
        state: Rc::new(RefCell::new(FutureState::NotStarted(Some(effect)))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::unsafe_run_sync;
    use crate::test_support::poll_once;
    use std::cell::Cell;

    struct ReadyOnSecondPoll {
        polled: bool,
    }

    impl Future for ReadyOnSecondPoll {
        type Output = Result<i32, String>;

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            if self.polled {
                return Poll::Ready(Ok(7));
            }
            self.polled = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }

    #[test]
    fn from_future_completes_after_rewake() {
        let effect: Effect<String, i32> = from_future(ReadyOnSecondPoll { polled: false });
        assert_eq!(unsafe_run_sync(effect), Ok(7));
    }

    #[test]
    fn from_future_completes_immediately_when_ready_first_poll() {
        let effect: Effect<String, i32> = from_future(async { Ok(1) });
        assert_eq!(unsafe_run_sync(effect), Ok(1));
    }

    #[test]
    fn from_either_roundtrips_ok_and_err() {
        let ok: Effect<String, i32> = from_either(Ok(4));
        assert_eq!(unsafe_run_sync(ok), Ok(4));

        let err: Effect<String, i32> = from_either(Err("boom".to_string()));
        assert_eq!(unsafe_run_sync(err), Err("boom".to_string()));
    }

    #[test]
    fn unsafe_to_future_resolves_with_the_effects_value() {
        let effect: Effect<String, i32> = Effect::pure(5).map(|n| n + 1);
        let mut future = unsafe_to_future(effect);
        match poll_once(&mut future) {
            Poll::Ready(result) => assert_eq!(result, Ok(6)),
            Poll::Pending => panic!("expected a synchronously-settled effect to resolve on first poll"),
        }
    }

    #[test]
    fn unsafe_to_future_stays_pending_until_the_effect_settles() {
        let completed = Rc::new(Cell::new(false));
        let c = completed.clone();

        let effect: Effect<String, i32> = Effect::async_effect(move |_conn, cb| {
            c.set(true);
            cb(Ok(9));
        });

        let mut future = unsafe_to_future(effect);
        assert_eq!(poll_once(&mut future), Poll::Ready(Ok(9)));
        assert!(completed.get());
    }
}
