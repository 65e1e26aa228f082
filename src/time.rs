//! The timer boundary.
//!
//! `effectum`'s core stays executor-agnostic: it consumes time-based effects
//! but never implements them. The teacher's own `time::sleep` *does*
//! implement sleeping, by issuing an `io_uring` timeout opcode against its
//! own event loop; here that coupling is exactly what the non-goal of
//! owning a general task scheduler rules out, so only the trait boundary is
//! specified. An embedder wires a concrete [`Timer`] to whatever event loop
//! or platform clock it already runs (an `io_uring` ring, a `tokio`
//! reactor, a bare OS timer thread) the same way the teacher's
//! `runtime::start` is the one place a concrete executor gets chosen.

use crate::effect::Effect;
use std::convert::Infallible;
use std::time::Duration;

/// A source of time-based asynchronous effects.
///
/// Every method returns an effect that never fails on its own account
/// (`Infallible`); callers combine it with fallible work via
/// [`crate::effect::Effect::left_map`] where a shared error type is needed,
/// as [`crate::runtime::unsafe_run_timed`] does internally.
pub trait Timer {
    /// An effect that completes after `duration` has elapsed.
    fn sleep(&self, duration: Duration) -> Effect<Infallible, ()>;

    /// Yields control back to the surrounding scheduler without otherwise
    /// waiting, giving other pending work a chance to run before this fiber
    /// continues. Implementations that have no real scheduler to yield to
    /// may treat this as an effect that completes immediately.
    fn shift(&self) -> Effect<Infallible, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::unsafe_run_sync;

    /// A `Timer` that resolves every wait synchronously; exercises the
    /// trait boundary without depending on any real clock or event loop.
    struct ImmediateTimer;

    impl Timer for ImmediateTimer {
        fn sleep(&self, _duration: Duration) -> Effect<Infallible, ()> {
            Effect::async_effect(|_conn, cb| cb(Ok(())))
        }

        fn shift(&self) -> Effect<Infallible, ()> {
            Effect::async_effect(|_conn, cb| cb(Ok(())))
        }
    }

    #[test]
    fn sleep_completes_through_the_trait_object() {
        let timer: &dyn Timer = &ImmediateTimer;
        let effect = timer.sleep(Duration::from_secs(1));
        assert_eq!(unsafe_run_sync(effect), Ok(()));
    }

    #[test]
    fn shift_completes_through_the_trait_object() {
        let timer: &dyn Timer = &ImmediateTimer;
        assert_eq!(unsafe_run_sync(timer.shift()), Ok(()));
    }
}
