//! Two-way concurrent composition: [`race`] and [`race_pair`].
//!
//! Both run two children under their own connections and arbitrate the
//! winner with a single atomic swap, so only one of possibly-simultaneous
//! completions is ever treated as "first" — the compare-and-swap is what
//! makes winner selection well-defined even though nothing here is
//! literally running on more than one OS thread (`effectum` is single-
//! threaded per run; what runs "concurrently" is however many `Async`
//! registrations are in flight with an external executor at once).

use std::convert::Infallible;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::connection::Connection;
use crate::effect::Effect;
use crate::fiber::Fiber;
use crate::logger::{shared, Failure, LogSink, SharedSink};
use crate::runtime;

/// The outcome of [`race`]: whichever side finished first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Either<L, R> {
    Left(L),
    Right(R),
}

/// Runs `l` and `r` concurrently. Whichever completes first decides the
/// outcome; the loser is cancelled. If the winner fails, that failure
/// propagates (and the loser is still cancelled). A losing child's own
/// failure, discovered after the winner already delivered, is reported to
/// the default sink rather than silently dropped.
pub fn race<E, L, R>(l: Effect<E, L>, r: Effect<E, R>) -> Effect<E, Either<L, R>>
where
    E: 'static,
    L: 'static,
    R: 'static,
{
    Effect::async_effect(move |conn, cb| {
        let active = Rc::new(AtomicBool::new(true));
        let conn_l = Connection::cancelable();
        let conn_r = Connection::cancelable();
        let sink = shared(LogSink);

        {
            let conn_l = conn_l.clone();
            let conn_r = conn_r.clone();
            conn.push(Box::new(move || {
                conn_l.cancel();
                conn_r.cancel();
            }));
        }

        {
            let active = active.clone();
            let conn_r = conn_r.clone();
            let cb = cb.clone();
            let sink = sink.clone();
            runtime::start_cancelable(l, conn_l.clone(), move |result: Result<L, E>| {
                if active.swap(false, Ordering::SeqCst) {
                    conn_r.cancel();
                    cb(result.map(Either::Left));
                } else {
                    report_late_failure(&sink, &result, "race::left");
                }
            });
        }

        {
            let active = active.clone();
            let conn_l = conn_l.clone();
            let cb = cb.clone();
            let sink = sink.clone();
            runtime::start_cancelable(r, conn_r.clone(), move |result: Result<R, E>| {
                if active.swap(false, Ordering::SeqCst) {
                    conn_l.cancel();
                    cb(result.map(Either::Right));
                } else {
                    report_late_failure(&sink, &result, "race::right");
                }
            });
        }
    })
}

fn report_late_failure<T, E>(sink: &SharedSink, result: &Result<T, E>, site: &'static str) {
    if result.is_err() {
        sink.report_failure(Failure {
            message: &"losing race child failed after the winner already delivered",
            site,
        });
    }
}

/// The outcome of [`race_pair`]: the winning side's own result (not
/// auto-propagated — a winner's failure is handed back as data, exactly
/// like a loser's) paired with a [`Fiber`] for the side still running.
pub enum RacePairOutcome<E, L, R> {
    Left(Result<L, E>, Fiber<E, R>),
    Right(Fiber<E, L>, Result<R, E>),
}

/// Runs `l` and `r` concurrently without cancelling the loser. The first to
/// complete is paired with a [`Fiber`] wrapping the other child's
/// (connection, eventual outcome); the loser keeps running and its own
/// outcome becomes available through that fiber's [`Fiber::join`].
///
/// Never fails on its own account: a winner's failure is delivered as data
/// inside [`RacePairOutcome`], not propagated as this effect's own error.
pub fn race_pair<E, L, R>(l: Effect<E, L>, r: Effect<E, R>) -> Effect<Infallible, RacePairOutcome<E, L, R>>
where
    E: 'static,
    L: 'static,
    R: 'static,
{
    Effect::async_effect(move |conn, cb| {
        let active = Rc::new(AtomicBool::new(true));
        let conn_l = Connection::cancelable();
        let conn_r = Connection::cancelable();

        {
            let conn_l = conn_l.clone();
            let conn_r = conn_r.clone();
            conn.push(Box::new(move || {
                conn_l.cancel();
                conn_r.cancel();
            }));
        }

        let slot_l = Fiber::<E, L>::pending_slot();
        let slot_r = Fiber::<E, R>::pending_slot();

        {
            let active = active.clone();
            let cb = cb.clone();
            let conn_r_for_fiber = conn_r.clone();
            let slot_r_for_fiber = slot_r.clone();
            let slot_l_for_fill = slot_l.clone();
            runtime::start_cancelable(l, conn_l.clone(), move |result: Result<L, E>| {
                if active.swap(false, Ordering::SeqCst) {
                    let fiber_r = Fiber::from_parts(conn_r_for_fiber.clone(), slot_r_for_fiber.clone());
                    cb(Ok(RacePairOutcome::Left(result, fiber_r)));
                } else {
                    Fiber::fulfill(&slot_l_for_fill, result);
                }
            });
        }

        {
            let active = active.clone();
            let cb = cb.clone();
            let conn_l_for_fiber = conn_l.clone();
            let slot_l_for_fiber = slot_l.clone();
            let slot_r_for_fill = slot_r.clone();
            runtime::start_cancelable(r, conn_r.clone(), move |result: Result<R, E>| {
                if active.swap(false, Ordering::SeqCst) {
                    let fiber_l = Fiber::from_parts(conn_l_for_fiber.clone(), slot_l_for_fiber.clone());
                    cb(Ok(RacePairOutcome::Right(fiber_l, result)));
                } else {
                    Fiber::fulfill(&slot_r_for_fill, result);
                }
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::unsafe_run_sync;

    #[test]
    fn race_left_wins_when_it_completes_synchronously() {
        let l = Effect::<String, i32>::pure(1);
        let r = Effect::<String, i32>::async_effect(|_conn, _cb| {});
        assert_eq!(unsafe_run_sync(race(l, r)), Ok(Either::Left(1)));
    }

    #[test]
    fn race_right_wins_when_left_never_completes() {
        let l = Effect::<String, i32>::async_effect(|_conn, _cb| {});
        let r = Effect::<String, i32>::pure(2);
        assert_eq!(unsafe_run_sync(race(l, r)), Ok(Either::Right(2)));
    }

    #[test]
    fn race_cancels_the_loser() {
        use std::cell::Cell;
        let canceled = Rc::new(Cell::new(false));
        let c = canceled.clone();
        let l = Effect::<String, i32>::pure(1);
        let r = Effect::<String, i32>::async_effect(move |conn, _cb| {
            let c2 = c.clone();
            conn.push(Box::new(move || c2.set(true)));
        });
        assert_eq!(unsafe_run_sync(race(l, r)), Ok(Either::Left(1)));
        assert!(canceled.get());
    }

    #[test]
    fn race_propagates_winner_failure() {
        let l = Effect::<String, i32>::raise_error("boom".to_string());
        let r = Effect::<String, i32>::async_effect(|_conn, _cb| {});
        assert_eq!(unsafe_run_sync(race(l, r)), Err("boom".to_string()));
    }

    #[test]
    fn race_pair_left_wins_and_fiber_joins_the_loser() {
        let l = Effect::<String, i32>::pure(1);
        let r = Effect::<String, i32>::async_effect(|_conn, cb| cb(Ok(2)));

        let outcome = unsafe_run_sync(race_pair(l, r)).unwrap();
        match outcome {
            RacePairOutcome::Left(result, fiber) => {
                assert_eq!(result, Ok(1));
                assert_eq!(unsafe_run_sync(fiber.join()), Ok(2));
            }
            RacePairOutcome::Right(..) => panic!("expected left to win"),
        }
    }

    #[test]
    fn race_pair_does_not_cancel_the_loser() {
        use std::cell::Cell;
        let canceled = Rc::new(Cell::new(false));
        let c = canceled.clone();
        let l = Effect::<String, i32>::pure(1);
        let r = Effect::<String, i32>::async_effect(move |conn, _cb| {
            let c2 = c.clone();
            conn.push(Box::new(move || c2.set(true)));
        });
        let _ = unsafe_run_sync(race_pair(l, r)).unwrap();
        assert!(!canceled.get());
    }
}
