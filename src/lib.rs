//! `effectum`: a single-threaded effect runtime.
//!
//! Programs are written as [`effect::Effect`] values — pure, first-class
//! descriptions of synchronous and asynchronous computations — and
//! interpreted by a trampolined [`runtime`] that gives stack-safe
//! sequencing, cooperative cancellation, resource safety ([`bracket`]) and
//! concurrent racing ([`race`]). The core owns no thread pool: parallelism
//! only appears where an `Async` node hands work to an executor the
//! embedder supplies.
//!
//! Start with [`effect::Effect::pure`]/[`effect::Effect::delay`] to build a
//! value, [`runtime::unsafe_run_sync`] or [`runtime::unsafe_run_async`] to
//! interpret it, and [`bracket::bracket`]/[`race::race`] for the resource-
//! safety and concurrency operators this crate is built around.

#[cfg(feature = "macros")]
pub use effectum_macros::main;

mod bind_frame;
mod callback;

pub mod bracket;
pub mod cancel;
pub mod connection;
pub mod effect;
pub mod error;
pub mod fiber;
pub mod interop;
pub mod logger;
pub mod race;
pub mod runtime;
pub mod time;
pub mod trampoline;

#[cfg(test)]
pub(crate) mod test_support;

pub use effect::Effect;
pub use error::Error;
