//! Cancellation operators: [`uncancelable`], [`on_cancel_raise_error`], and
//! [`cancel_boundary`].
//!
//! Each is built directly on [`crate::runtime::start_cancelable`] rather
//! than on a dedicated `Node` shape: an `Effect::async_effect` registration
//! that starts a *nested* run under a connection of its own choosing is
//! already enough to substitute the ambient connection for a subtree — the
//! same trick [`crate::race::race`] uses for its two children.

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::connection::Connection;
use crate::effect::Effect;
use crate::runtime;

/// Runs `fa` with cancellation of the surrounding connection ignored for its
/// duration. A cancel signal observed by the *outer* connection while `fa`
/// is in flight has no effect on it; `fa` is free to install and observe its
/// own cancellation internally (e.g. another `uncancelable`, or a nested
/// `race`), since the substitution is a fresh, independent connection.
pub fn uncancelable<E, A>(fa: Effect<E, A>) -> Effect<E, A>
where
    E: 'static,
    A: 'static,
{
    Effect::async_effect(move |_conn, cb| {
        runtime::start_cancelable(fa, Connection::uncancelable(), move |result| cb(result));
    })
}

/// Runs `fa`; if the ambient connection is cancelled while `fa` is still in
/// flight, `fa` is terminated with `e` instead of becoming non-terminating.
/// If `fa` settles first, the pending cancellation hook becomes a no-op.
pub fn on_cancel_raise_error<E, A>(fa: Effect<E, A>, e: E) -> Effect<E, A>
where
    E: 'static,
    A: 'static,
{
    Effect::async_effect(move |conn, cb| {
        let active = Rc::new(AtomicBool::new(true));
        let conn_fa = Connection::cancelable();

        {
            let active = active.clone();
            let cb = cb.clone();
            let conn_fa_for_hook = conn_fa.clone();
            conn.push(Box::new(move || {
                if active.swap(false, Ordering::SeqCst) {
                    conn_fa_for_hook.cancel();
                    cb(Err(e));
                }
            }));
        }

        let conn_for_pop = conn.clone();
        runtime::start_cancelable(fa, conn_fa, move |result| {
            if active.swap(false, Ordering::SeqCst) {
                conn_for_pop.pop();
                cb(result);
            }
        });
    })
}

/// An effect that completes with `()` iff the ambient connection has not
/// been cancelled by the time it runs; otherwise it does not complete,
/// blocking the bind chain so the connection's cancellation semantics take
/// over instead of the chain continuing as if nothing happened.
pub fn cancel_boundary<E>() -> Effect<E, ()>
where
    E: 'static,
{
    Effect::async_effect(|conn, cb| {
        if !conn.is_canceled() {
            cb(Ok(()));
        }
    })
}
