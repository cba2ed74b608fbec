//! Pipeline execution.
//!
//! This module provides:
//! - The fixed-order sequencer and its steppable run
//! - The validation gate
//! - The streaming adapter
//! - Bounded-parallel batch processing
//! - Retry with backoff for transient collaborator faults

mod batch;
mod gating;
pub mod retry;
mod sequencer;
mod streaming;


pub use batch::{BatchCoordinator, BatchReport, BatchStatistics};
pub(crate) use batch::failed_without_run;
pub use gating::GateDecision;
pub use retry::{with_retry, BackoffStrategy, JitterStrategy, RetryConfig, RetryOutcome, RetryState};
pub use sequencer::{PipelineRun, Sequencer};
pub use streaming::ProgressStream;
