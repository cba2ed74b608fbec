//! Lifecycle event sinks.
//!
//! The orchestrator reports run and stage lifecycle to an injected
//! [`EventSink`]. There is no process-wide sink; each orchestrator owns one.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names emitted by the orchestrator.
pub mod names {
    /// A run was accepted and is starting.
    pub const PIPELINE_STARTED: &str = "pipeline.started";
    /// A stage is about to execute.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage produced its output.
    pub const STAGE_COMPLETED: &str = "stage.completed";
    /// A stage was not executed.
    pub const STAGE_SKIPPED: &str = "stage.skipped";
    /// A stage raised a fatal fault.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// The validation gate diverted the run.
    pub const PIPELINE_GATED: &str = "pipeline.gated";
    /// A run terminated.
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    /// A batch finished.
    pub const BATCH_COMPLETED: &str = "batch.completed";
}
