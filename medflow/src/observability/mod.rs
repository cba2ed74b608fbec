//! Observability utilities.
//!
//! - [`init_tracing`] installs a `tracing-subscriber` stack for binaries and tests
//! - span constructors carrying run and stage fields
//! - [`SpanTimer`] for stage wall time

mod subscriber;
mod tracing;

pub use self::subscriber::{init_tracing, try_init_tracing, LogFormat};
pub use self::tracing::{run_span, stage_span, SpanTimer};
