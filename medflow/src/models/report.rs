//! Clinical report produced from refined masks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One observation in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// The observation in prose.
    pub statement: String,
    /// Indices into the result's mask list.
    #[serde(default)]
    pub mask_refs: Vec<usize>,
}

impl Finding {
    /// Creates a finding.
    #[must_use]
    pub fn new(statement: impl Into<String>, mask_refs: Vec<usize>) -> Self {
        Self {
            statement: statement.into(),
            mask_refs,
        }
    }
}

/// Structured report. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalReport {
    /// Findings in mask order.
    pub findings: Vec<Finding>,
    /// Named quantitative values, e.g. `lung.area_mm2`.
    pub quantitative: BTreeMap<String, f64>,
    /// Summary impression.
    pub impression: String,
    /// Follow-up recommendations.
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
}

impl ClinicalReport {
    /// Returns the quantitative value for `name`.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<f64> {
        self.quantitative.get(name).copied()
    }
}
