//! Per-run state shared between the sequencer and stages.
//!
//! - [`PipelineEnvelope`]: write-once slots for every stage output
//! - [`StageOutput`]: the typed value a stage returns
//! - [`StageContext`]: read-only execution context

mod envelope;
mod stage;

pub use envelope::{PipelineEnvelope, StageOutput};
pub use stage::StageContext;
