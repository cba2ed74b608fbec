//! Core enums and event types.
//!
//! - Stage identity and fixed order
//! - Stage and run status
//! - Progress events for streaming callers

mod event;
mod status;

pub use event::{ProgressEvent, StageProgress};
pub use status::{ProcessingStatus, StageKind, StageStatus};
