//! Resource-safe acquire/use/release: [`bracket`] and [`bracket_case`].
//!
//! A cancel signal observed during the use phase must still run release
//! exactly once, with the true exit case — it cannot simply propagate as an
//! ordinary non-termination the way an unguarded `Async` does. Internally
//! this is reified as an error on a private, crate-only error channel
//! ([`Signal`]) via [`crate::cancel::on_cancel_raise_error`], materialised
//! with [`crate::effect::Effect::attempt`], and converted back to the
//! user's own `E` and to non-termination (on cancel) once release has run.
//! This mirrors how the teacher's `process` module guarantees a spawned
//! child is always reaped exactly once regardless of which path a caller's
//! future takes to get there.

use std::rc::Rc;

use crate::cancel::on_cancel_raise_error;
use crate::connection::Connection;
use crate::effect::Effect;
use crate::logger::{shared, Failure, LogSink};
use crate::runtime;

/// The true reason `use` stopped running: delivered to `release` so cleanup
/// can distinguish a clean finish, a genuine failure, or a cancellation.
pub enum ExitCase<E> {
    Completed,
    Error(E),
    Canceled,
}

/// Runs `acquire`; on success, runs `use_(resource)`; `release(resource)`
/// always runs exactly once afterward, regardless of how the use phase
/// ended, discarding the distinction [`bracket_case`] exposes through
/// [`ExitCase`].
pub fn bracket<E, R, A, U, Rel>(acquire: Effect<E, R>, use_: U, release: Rel) -> Effect<E, A>
where
    E: Clone + 'static,
    R: 'static,
    A: 'static,
    U: FnOnce(Rc<R>) -> Effect<E, A> + 'static,
    Rel: Fn(Rc<R>) -> Effect<E, ()> + 'static,
{
    bracket_case(acquire, use_, move |resource, _exit| release(resource))
}

/// Runs `acquire`; if it fails, the failure propagates and `release` is
/// never called (the resource never existed). Otherwise runs
/// `use_(resource)`; `release(resource, exit)` always runs exactly once
/// afterward with the true [`ExitCase`]:
///
/// - the use phase completed: `Completed`, then the value is delivered.
/// - the use phase failed with `e`: `Error(e)`, then `e` is re-raised.
/// - the ambient connection was cancelled mid-use: `Canceled`, then this
///   effect becomes non-terminating, mirroring an unguarded cancel.
///
/// If `release` itself fails, that failure is reported to the default sink
/// rather than overriding the original outcome.
pub fn bracket_case<E, R, A, U, Rel>(acquire: Effect<E, R>, use_: U, release: Rel) -> Effect<E, A>
where
    E: Clone + 'static,
    R: 'static,
    A: 'static,
    U: FnOnce(Rc<R>) -> Effect<E, A> + 'static,
    Rel: Fn(Rc<R>, ExitCase<E>) -> Effect<E, ()> + 'static,
{
    Effect::async_effect(move |conn, cb| {
        let conn_for_use = conn.clone();
        let sink = shared(LogSink);

        runtime::start_cancelable(acquire, Connection::uncancelable(), move |acquired: Result<R, E>| {
            let resource = match acquired {
                Err(e) => {
                    cb(Err(e));
                    return;
                }
                Ok(resource) => Rc::new(resource),
            };

            let guarded: Effect<Signal<E>, A> =
                on_cancel_raise_error(use_(resource.clone()).left_map(Signal::Original), Signal::Canceled);

            let sink = sink.clone();
            let cb = cb.clone();
            let resource_for_release = resource.clone();

            runtime::start_cancelable(guarded.attempt(), conn_for_use.clone(), move |outcome| {
                let outcome = outcome.expect("effectum: attempt() must never itself fail");

                match outcome {
                    Ok(value) => run_release(
                        release(resource_for_release.clone(), ExitCase::Completed),
                        move |release_outcome| {
                            report_release_failure(&sink, release_outcome);
                            cb(Ok(value));
                        },
                    ),
                    Err(Signal::Canceled) => run_release(
                        release(resource_for_release.clone(), ExitCase::Canceled),
                        move |release_outcome| {
                            report_release_failure(&sink, release_outcome);
                            // The use phase was cancelled: mirror an
                            // unguarded cancel by never delivering.
                        },
                    ),
                    Err(Signal::Original(e)) => run_release(
                        release(resource_for_release.clone(), ExitCase::Error(e.clone())),
                        move |release_outcome| {
                            report_release_failure(&sink, release_outcome);
                            cb(Err(e));
                        },
                    ),
                }
            });
        });
    })
}

/// The private error channel the use phase runs under: `E` widened with a
/// cancellation marker so a cancel signal travels through the ordinary
/// error path instead of silently dropping the continuation.
enum Signal<E> {
    Original(E),
    Canceled,
}

fn run_release<E, F>(release_effect: Effect<E, ()>, after: F)
where
    E: 'static,
    F: FnOnce(Result<(), E>) + 'static,
{
    runtime::start_cancelable(release_effect, Connection::uncancelable(), after);
}

fn report_release_failure<E>(sink: &crate::logger::SharedSink, result: Result<(), E>) {
    if result.is_err() {
        sink.report_failure(Failure {
            message: &"bracket release failed; the original outcome is preserved",
            site: "bracket::release",
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{unsafe_run_cancelable, unsafe_run_sync};
    use std::cell::RefCell;

    #[test]
    fn release_runs_on_success() {
        let released = Rc::new(RefCell::new(None));
        let r = released.clone();

        let effect = bracket(
            Effect::<String, i32>::pure(1),
            |resource| Effect::pure(*resource + 1),
            move |resource| {
                *r.borrow_mut() = Some(*resource);
                Effect::pure(())
            },
        );

        assert_eq!(unsafe_run_sync(effect), Ok(2));
        assert_eq!(*released.borrow(), Some(1));
    }

    #[test]
    fn release_is_skipped_when_acquire_fails() {
        let released = Rc::new(RefCell::new(false));
        let r = released.clone();

        let effect: Effect<String, i32> = bracket(
            Effect::raise_error("acquire failed".to_string()),
            |resource: Rc<i32>| Effect::pure(*resource),
            move |_resource| {
                *r.borrow_mut() = true;
                Effect::pure(())
            },
        );

        assert_eq!(unsafe_run_sync(effect), Err("acquire failed".to_string()));
        assert!(!*released.borrow());
    }

    #[test]
    fn release_observes_the_error_exit_case_and_reraises() {
        let exit_seen = Rc::new(RefCell::new(None));
        let seen = exit_seen.clone();

        let effect: Effect<String, i32> = bracket_case(
            Effect::pure(1),
            |_resource: Rc<i32>| Effect::raise_error("boom".to_string()),
            move |_resource, exit| {
                let label = match exit {
                    ExitCase::Completed => "completed",
                    ExitCase::Error(_) => "error",
                    ExitCase::Canceled => "canceled",
                };
                *seen.borrow_mut() = Some(label);
                Effect::pure(())
            },
        );

        assert_eq!(unsafe_run_sync(effect), Err("boom".to_string()));
        assert_eq!(*exit_seen.borrow(), Some("error"));
    }

    #[test]
    fn release_observes_the_canceled_exit_case_and_becomes_non_terminating() {
        let exit_seen = Rc::new(RefCell::new(None));
        let seen = exit_seen.clone();

        let effect: Effect<String, i32> = bracket_case(
            Effect::pure(1),
            |_resource: Rc<i32>| Effect::async_effect(|_conn, _cb| {}),
            move |_resource, exit| {
                let label = match exit {
                    ExitCase::Completed => "completed",
                    ExitCase::Error(_) => "error",
                    ExitCase::Canceled => "canceled",
                };
                *seen.borrow_mut() = Some(label);
                Effect::pure(())
            },
        );

        let delivered = Rc::new(RefCell::new(None));
        let d = delivered.clone();
        let token = unsafe_run_cancelable(effect, move |result| *d.borrow_mut() = Some(result));
        token.cancel();

        assert_eq!(*exit_seen.borrow(), Some("canceled"));
        assert_eq!(*delivered.borrow(), None);
    }
}
