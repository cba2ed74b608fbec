//! Testing utilities for medflow pipelines.
//!
//! This module provides:
//! - Stateful collaborator doubles
//! - Input and mask fixtures plus a wired-up test harness
//! - Assertions over processing results

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_equivalent_results, assert_stage_order, assert_stage_status, assert_status,
};
pub use fixtures::{fast_config, raster_mask, sample_input, two_confident_masks, TestHarness};
pub use mocks::{MockNormalizer, MockSegmentation, MockStorage, SegmentationBehavior};
