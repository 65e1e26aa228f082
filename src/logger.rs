//! The sink logger: the "must not be silent" reporting channel for errors
//! that have nowhere else to go — a losing race's failure, a release action
//! that itself failed, a callback invoked a second time.
//!
//! spec.md §6/§9 requires this boundary to be infallible from the core's
//! point of view: "Never throw from `report_failure`. The core treats it as
//! infallible; an implementation may buffer and rate-limit, but must not
//! block." The teacher repo has no logging dependency in its core (its
//! scratch debugging uses `dbg!`), so this is enriched from the wider
//! example pack: `log` is the facade every other example repo depending on
//! structured logging reaches for (`JonasKruckenberg-k23`,
//! `bytecodealliance-wasmtime`, `denoland-deno`), so `effectum` takes the
//! same dependency for its default sink.

use std::fmt;
use std::rc::Rc;

/// Anything [`SinkLogger::report_failure`] can be handed: a `Display`able
/// description plus an optional source, enough to log without requiring
/// every error type in the crate to share a common trait.
pub struct Failure<'a> {
    /// A human-readable description of what went wrong.
    pub message: &'a dyn fmt::Display,
    /// Which subsystem produced it (`"bracket::release"`, `"race::loser"`,
    /// `"callback::late"`, ...), useful for filtering.
    pub site: &'static str,
}

/// A destination for failures that must not be silently dropped but also
/// cannot be allowed to propagate through the run loop (they didn't happen
/// on the path that owns the primary outcome).
///
/// Implementations must not panic and must not block; the run loop invokes
/// this synchronously, inline, on whatever thread discovered the failure.
pub trait SinkLogger {
    fn report_failure(&self, failure: Failure<'_>);
}

/// Reports every failure through the `log` crate at `error` level.
///
/// This is the default sink installed by [`crate::runtime::start`] and
/// friends when the caller doesn't supply their own.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl SinkLogger for LogSink {
    fn report_failure(&self, failure: Failure<'_>) {
        log::error!(target: "effectum", "[{}] {}", failure.site, failure.message);
    }
}

/// Discards every failure. Useful in tests that assert on the reported
/// count themselves via a custom [`SinkLogger`], or in embedders that
/// genuinely have nowhere to route diagnostics.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl SinkLogger for NoopSink {
    fn report_failure(&self, _failure: Failure<'_>) {}
}

/// A shared handle to a [`SinkLogger`], cheap to clone and pass into every
/// closure the run loop builds.
pub type SharedSink = Rc<dyn SinkLogger>;

/// Wraps a [`SinkLogger`] for sharing across the closures a single run
/// allocates.
pub fn shared<S: SinkLogger + 'static>(sink: S) -> SharedSink {
    Rc::new(sink)
}
