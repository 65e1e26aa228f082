//! A handle to a detached, concurrently-running effect.
//!
//! Grounded on the teacher's `sync::oneshot_channel`: a single outcome slot
//! shared between the running computation (which fills it exactly once) and
//! the eventual [`Fiber::join`] caller. As with the teacher's channel, a
//! fiber's outcome has exactly one reader: `A`/`E` are not required to be
//! `Clone`, so once an outcome has been handed to a join callback it is
//! gone. Calling [`Fiber::join`] a second time on the same fiber is a
//! programmer error, not a runtime condition to recover from.

use std::cell::RefCell;
use std::rc::Rc;

use crate::connection::Connection;
use crate::effect::Effect;
use crate::runtime;

enum Slot<E, A> {
    Pending(Option<Box<dyn FnOnce(Result<A, E>)>>),
    Done(Result<A, E>),
    Joined,
}

/// A running background computation, with a connection to cancel it and a
/// one-shot slot to join its eventual outcome.
pub struct Fiber<E, A> {
    conn: Connection,
    slot: Rc<RefCell<Slot<E, A>>>,
}

impl<E, A> Clone for Fiber<E, A> {
    fn clone(&self) -> Self {
        Fiber {
            conn: self.conn.clone(),
            slot: self.slot.clone(),
        }
    }
}

impl<E: 'static, A: 'static> Fiber<E, A> {
    /// Starts `effect` under a fresh cancelable connection, running it to
    /// completion independently of the caller. Returns immediately with a
    /// handle to observe or cancel it.
    pub fn start(effect: Effect<E, A>) -> Fiber<E, A> {
        let conn = Connection::cancelable();
        let slot: Rc<RefCell<Slot<E, A>>> = Rc::new(RefCell::new(Slot::Pending(None)));

        let slot_for_run = slot.clone();
        runtime::start_cancelable(effect, conn.clone(), move |result| {
            Fiber::fulfill(&slot_for_run, result);
        });

        Fiber { conn, slot }
    }

    /// A fresh, unsettled outcome slot, for callers (namely
    /// [`crate::race::race_pair`]) that drive the underlying computation
    /// themselves rather than through [`Fiber::start`].
    pub(crate) fn pending_slot() -> SharedSlot<E, A> {
        Rc::new(RefCell::new(Slot::Pending(None)))
    }

    /// Fills a slot previously returned by [`Fiber::pending_slot`], waking
    /// its joiner (if any) exactly once.
    pub(crate) fn fulfill(slot: &SharedSlot<E, A>, result: Result<A, E>) {
        let previous = {
            let mut state = slot.borrow_mut();
            std::mem::replace(&mut *state, Slot::Pending(None))
        };
        match previous {
            Slot::Pending(Some(waiter)) => {
                *slot.borrow_mut() = Slot::Joined;
                waiter(result);
            }
            Slot::Pending(None) => {
                *slot.borrow_mut() = Slot::Done(result);
            }
            Slot::Done(_) | Slot::Joined => unreachable!("fiber outcome slot filled twice"),
        }
    }

    /// Wraps an already-settled outcome as a fiber with no connection of its
    /// own to cancel (cancelling it is a no-op). Used by
    /// [`crate::race::race_pair`] when the loser had already finished by the
    /// time winner arbitration ran.
    pub(crate) fn already_done(result: Result<A, E>) -> Fiber<E, A> {
        Fiber {
            conn: Connection::uncancelable(),
            slot: Rc::new(RefCell::new(Slot::Done(result))),
        }
    }

    /// Wraps a live connection plus an as-yet-unsettled slot; used by
    /// [`crate::race::race_pair`] to hand the winner a fiber for a loser
    /// that is still running.
    pub(crate) fn from_parts(conn: Connection, slot: SharedSlot<E, A>) -> Fiber<E, A> {
        Fiber { conn, slot }
    }

    /// An effect that completes with this fiber's outcome once it settles;
    /// completes immediately if it already has.
    ///
    /// # Panics
    /// Panics (once the returned effect is run) if this fiber has already
    /// been joined.
    pub fn join(&self) -> Effect<E, A> {
        let slot = self.slot.clone();
        Effect::async_effect(move |_conn, cb| {
            let taken = std::mem::replace(&mut *slot.borrow_mut(), Slot::Joined);
            match taken {
                Slot::Done(result) => cb(result),
                Slot::Pending(_) => {
                    *slot.borrow_mut() = Slot::Pending(Some(Box::new(move |result| cb(result))));
                }
                Slot::Joined => panic!("effectum: fiber joined more than once"),
            }
        })
    }

    /// Cancels the running computation. A no-op if it has already settled or
    /// if this fiber wraps an already-done outcome.
    pub fn cancel(&self) {
        self.conn.cancel();
    }
}

pub(crate) type SharedSlot<E, A> = Rc<RefCell<Slot<E, A>>>;

/// An effect that, when interpreted, begins a detached run of `fa` under a
/// fresh cancelable connection and yields a [`Fiber`] to observe or cancel
/// it. `start` itself introduces no asynchronous boundary — the detached
/// run is kicked off synchronously, inline, wherever this effect is
/// sequenced; callers wanting one should sequence a `shift` beforehand.
pub fn start<E, A>(fa: Effect<E, A>) -> Effect<E, Fiber<E, A>>
where
    E: 'static,
    A: 'static,
{
    Effect::delay_infallible(move || Fiber::start(fa))
}
