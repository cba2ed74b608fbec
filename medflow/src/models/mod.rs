//! Data model shared by stages, collaborators, and callers.

mod image;
mod input;
mod mask;
mod report;
mod result;
mod validation;

pub use image::{StandardizedImage, StorageReceipt};
pub use input::{ImageSource, MedicalImageInput, Modality};
pub use mask::{MaskData, MaskMetrics, SegmentationMask};
pub use report::{ClinicalReport, Finding};
pub use result::{ProcessingResult, StageErrorRecord, StageTrace};
pub use validation::{Concern, Disposition, ValidationResult};
