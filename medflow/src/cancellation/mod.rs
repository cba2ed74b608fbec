//! Cooperative cancellation for pipeline runs.
//!
//! A [`CancellationToken`] is shared between the caller and a run; the
//! sequencer races each stage against it and records a `Cancelled` fault
//! once it fires.

mod token;

pub use token::CancellationToken;
