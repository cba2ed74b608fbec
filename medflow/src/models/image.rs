//! Normalized image handle and storage receipt.

use super::input::Modality;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An image decoded and resampled by the normalizer.
///
/// The core never touches pixels; it only carries this handle between
/// collaborators and reads its dimensions for measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardizedImage {
    /// Opaque handle understood by the inference service.
    pub reference: String,
    /// Modality the image was normalized for.
    pub modality: Modality,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// In-plane pixel spacing, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_spacing_mm: Option<f64>,
    /// Slice thickness, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice_thickness_mm: Option<f64>,
}

impl StandardizedImage {
    /// Creates a handle with no physical spacing.
    #[must_use]
    pub fn new(reference: impl Into<String>, modality: Modality, width: u32, height: u32) -> Self {
        Self {
            reference: reference.into(),
            modality,
            width,
            height,
            pixel_spacing_mm: None,
            slice_thickness_mm: None,
        }
    }

    /// Sets the in-plane pixel spacing.
    #[must_use]
    pub const fn with_pixel_spacing(mut self, mm: f64) -> Self {
        self.pixel_spacing_mm = Some(mm);
        self
    }

    /// Sets the slice thickness.
    #[must_use]
    pub const fn with_slice_thickness(mut self, mm: f64) -> Self {
        self.slice_thickness_mm = Some(mm);
        self
    }
}

/// Acknowledgement returned by clinical storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageReceipt {
    /// Identifier assigned by the storage system.
    pub receipt_id: String,
    /// Where the artifact was archived.
    pub location: String,
    /// When the write was acknowledged.
    pub stored_at: DateTime<Utc>,
}

impl StorageReceipt {
    /// Creates a receipt stamped now.
    #[must_use]
    pub fn new(receipt_id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            receipt_id: receipt_id.into(),
            location: location.into(),
            stored_at: Utc::now(),
        }
    }
}
