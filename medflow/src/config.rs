//! Orchestrator configuration.
//!
//! All knobs live in one immutable [`OrchestratorConfig`] passed to the
//! orchestrator at construction. It can be built in code, parsed from JSON,
//! or read from `MEDFLOW_*` environment variables.

use crate::core::StageKind;
use crate::errors::ConfigError;
use crate::pipeline::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What the sequencer does after an `AcceptWithReview` disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewPolicy {
    /// Run the remaining stages; the result is `Partial`.
    #[default]
    Continue,
    /// Skip post-processing and reporting, as for a rejection.
    HoldForReview,
}

/// Thresholds used by the validation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Masks below this confidence raise a low-confidence concern.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Aggregate confidence below this rejects the run.
    #[serde(default = "default_reject_below")]
    pub reject_below: f64,
    /// Coverage above this fraction is implausible.
    #[serde(default = "default_max_coverage")]
    pub max_coverage: f64,
    /// Label substrings that mark a mask as an artifact.
    #[serde(default = "default_artifact_markers")]
    pub artifact_markers: Vec<String>,
    /// Require one mask per prompt target.
    #[serde(default)]
    pub require_all_targets: bool,
    /// Send every accepted run to review.
    #[serde(default)]
    pub require_review: bool,
}

const fn default_min_confidence() -> f64 {
    0.7
}

const fn default_reject_below() -> f64 {
    0.4
}

const fn default_max_coverage() -> f64 {
    0.95
}

fn default_artifact_markers() -> Vec<String> {
    vec!["artifact".to_string()]
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            reject_below: default_reject_below(),
            max_coverage: default_max_coverage(),
            artifact_markers: default_artifact_markers(),
            require_all_targets: false,
            require_review: false,
        }
    }
}

/// Per-stage time bounds in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTimeouts {
    /// Preprocess bound.
    #[serde(default = "default_local_secs")]
    pub preprocess: f64,
    /// Prompt construction bound.
    #[serde(default = "default_local_secs")]
    pub generate_prompt: f64,
    /// Inference bound, including retries.
    #[serde(default = "default_inference_secs")]
    pub infer_segmentation: f64,
    /// Validation bound.
    #[serde(default = "default_local_secs")]
    pub validate: f64,
    /// Refinement bound.
    #[serde(default = "default_local_secs")]
    pub post_process: f64,
    /// Report bound.
    #[serde(default = "default_remote_secs")]
    pub generate_report: f64,
    /// Storage bound, including retries.
    #[serde(default = "default_remote_secs")]
    pub integrate: f64,
}

const fn default_local_secs() -> f64 {
    30.0
}

const fn default_inference_secs() -> f64 {
    300.0
}

const fn default_remote_secs() -> f64 {
    60.0
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            preprocess: default_local_secs(),
            generate_prompt: default_local_secs(),
            infer_segmentation: default_inference_secs(),
            validate: default_local_secs(),
            post_process: default_local_secs(),
            generate_report: default_remote_secs(),
            integrate: default_remote_secs(),
        }
    }
}

impl StageTimeouts {
    /// Applies the same bound to every stage.
    #[must_use]
    pub const fn uniform(secs: f64) -> Self {
        Self {
            preprocess: secs,
            generate_prompt: secs,
            infer_segmentation: secs,
            validate: secs,
            post_process: secs,
            generate_report: secs,
            integrate: secs,
        }
    }

    /// Returns the configured seconds for `stage`.
    #[must_use]
    pub const fn seconds(&self, stage: StageKind) -> f64 {
        match stage {
            StageKind::Preprocess => self.preprocess,
            StageKind::GeneratePrompt => self.generate_prompt,
            StageKind::InferSegmentation => self.infer_segmentation,
            StageKind::Validate => self.validate,
            StageKind::PostProcess => self.post_process,
            StageKind::GenerateReport => self.generate_report,
            StageKind::Integrate => self.integrate,
        }
    }

    /// Returns the bound for `stage` as a [`Duration`].
    ///
    /// Values too large for a `Duration` saturate to [`Duration::MAX`];
    /// [`OrchestratorConfig::validate`] rejects them up front.
    #[must_use]
    pub fn for_stage(&self, stage: StageKind) -> Duration {
        Duration::try_from_secs_f64(self.seconds(stage)).unwrap_or(Duration::MAX)
    }

    /// Sets the bound for one stage.
    #[must_use]
    pub fn with_stage(mut self, stage: StageKind, secs: f64) -> Self {
        let slot = match stage {
            StageKind::Preprocess => &mut self.preprocess,
            StageKind::GeneratePrompt => &mut self.generate_prompt,
            StageKind::InferSegmentation => &mut self.infer_segmentation,
            StageKind::Validate => &mut self.validate,
            StageKind::PostProcess => &mut self.post_process,
            StageKind::GenerateReport => &mut self.generate_report,
            StageKind::Integrate => &mut self.integrate,
        };
        *slot = secs;
        self
    }
}

/// Batch execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum inputs processed at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

const fn default_max_concurrency() -> usize {
    4
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Collaborator session pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum sessions checked out at once.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

const fn default_max_sessions() -> usize {
    8
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
        }
    }
}

/// Complete orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Name used in logs and events.
    #[serde(default = "default_pipeline_name")]
    pub pipeline_name: String,
    /// Validation thresholds.
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Behavior after an accept-with-review disposition.
    #[serde(default)]
    pub review_policy: ReviewPolicy,
    /// Per-stage time bounds.
    #[serde(default)]
    pub timeouts: StageTimeouts,
    /// Retry policy for remote collaborator calls.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Batch settings.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Session pool settings.
    #[serde(default)]
    pub sessions: SessionConfig,
    /// Edge length, in pixels, the normalizer should target.
    #[serde(default = "default_target_image_size")]
    pub target_image_size: u32,
}

fn default_pipeline_name() -> String {
    "medflow".to_string()
}

const fn default_target_image_size() -> u32 {
    1024
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            pipeline_name: default_pipeline_name(),
            validation: ValidationConfig::default(),
            review_policy: ReviewPolicy::default(),
            timeouts: StageTimeouts::default(),
            retry: RetryConfig::default(),
            batch: BatchConfig::default(),
            sessions: SessionConfig::default(),
            target_image_size: default_target_image_size(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the validation thresholds.
    #[must_use]
    pub fn with_validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    /// Sets the review policy.
    #[must_use]
    pub const fn with_review_policy(mut self, policy: ReviewPolicy) -> Self {
        self.review_policy = policy;
        self
    }

    /// Sets the stage timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the batch concurrency.
    #[must_use]
    pub const fn with_max_concurrency(mut self, n: usize) -> Self {
        self.batch.max_concurrency = n;
        self
    }

    /// Sets the session pool size.
    #[must_use]
    pub const fn with_max_sessions(mut self, n: usize) -> Self {
        self.sessions.max_sessions = n;
        self
    }

    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`OrchestratorConfig::from_json_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Builds a configuration from `MEDFLOW_*` environment variables on top
    /// of the defaults.
    ///
    /// `MEDFLOW_MAX_RETRIES` counts retries after the first attempt.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] for unparsable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`OrchestratorConfig::from_env`] with a custom variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] for unparsable values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup("MEDFLOW_PIPELINE_NAME") {
            config.pipeline_name = name;
        }
        if let Some(v) = parse_var(&lookup, "MEDFLOW_MIN_CONFIDENCE")? {
            config.validation.min_confidence = v;
        }
        if let Some(v) = parse_var(&lookup, "MEDFLOW_REJECT_BELOW")? {
            config.validation.reject_below = v;
        }
        if let Some(v) = parse_var(&lookup, "MEDFLOW_MAX_COVERAGE")? {
            config.validation.max_coverage = v;
        }
        if let Some(v) = parse_var(&lookup, "MEDFLOW_REQUIRE_REVIEW")? {
            config.validation.require_review = v;
        }
        if let Some(raw) = lookup("MEDFLOW_REVIEW_POLICY") {
            config.review_policy = match raw.trim().to_ascii_lowercase().as_str() {
                "continue" => ReviewPolicy::Continue,
                "hold_for_review" | "hold" => ReviewPolicy::HoldForReview,
                other => {
                    return Err(ConfigError::Env {
                        var: "MEDFLOW_REVIEW_POLICY".to_string(),
                        message: format!("unknown policy '{other}'"),
                    })
                }
            };
        }
        if let Some(v) = parse_var(&lookup, "MEDFLOW_AGENT_TIMEOUT_SECS")? {
            config.timeouts.infer_segmentation = v;
        }
        if let Some(retries) = parse_var::<_, u32>(&lookup, "MEDFLOW_MAX_RETRIES")? {
            config.retry.max_attempts = retries.saturating_add(1);
        }
        if let Some(v) = parse_var(&lookup, "MEDFLOW_RETRY_DELAY_MS")? {
            config.retry.base_delay_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "MEDFLOW_MAX_CONCURRENCY")? {
            config.batch.max_concurrency = v;
        }
        if let Some(v) = parse_var(&lookup, "MEDFLOW_MAX_SESSIONS")? {
            config.sessions.max_sessions = v;
        }
        if let Some(v) = parse_var(&lookup, "MEDFLOW_TARGET_IMAGE_SIZE")? {
            config.target_image_size = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline_name.trim().is_empty() {
            return Err(ConfigError::invalid("pipeline_name", "must not be empty"));
        }

        let v = &self.validation;
        check_fraction("validation.min_confidence", v.min_confidence)?;
        check_fraction("validation.reject_below", v.reject_below)?;
        check_fraction("validation.max_coverage", v.max_coverage)?;
        if v.max_coverage == 0.0 {
            return Err(ConfigError::invalid("validation.max_coverage", "must be > 0"));
        }
        if v.reject_below > v.min_confidence {
            return Err(ConfigError::invalid(
                "validation.reject_below",
                "must not exceed validation.min_confidence",
            ));
        }

        for stage in StageKind::ORDER {
            let secs = self.timeouts.seconds(stage);
            let field = || format!("timeouts.{}", stage.as_str().replace('-', "_"));
            if !secs.is_finite() || secs <= 0.0 {
                return Err(ConfigError::invalid(
                    field(),
                    "must be a positive number of seconds",
                ));
            }
            if Duration::try_from_secs_f64(secs).is_err() {
                return Err(ConfigError::invalid(field(), "is too large for a time bound"));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be >= 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::invalid(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }
        if self.batch.max_concurrency == 0 {
            return Err(ConfigError::invalid("batch.max_concurrency", "must be >= 1"));
        }
        if self.sessions.max_sessions == 0 {
            return Err(ConfigError::invalid("sessions.max_sessions", "must be >= 1"));
        }
        if self.target_image_size == 0 {
            return Err(ConfigError::invalid("target_image_size", "must be > 0"));
        }

        Ok(())
    }
}

fn check_fraction(field: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, "must be within [0, 1]"))
    }
}

fn parse_var<F, T>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(var)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::Env {
                var: var.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();

        assert_eq!(config.validation.min_confidence, 0.7);
        assert_eq!(config.review_policy, ReviewPolicy::Continue);
        assert_eq!(config.batch.max_concurrency, 4);
        assert_eq!(config.sessions.max_sessions, 8);
        assert_eq!(config.target_image_size, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial_document() {
        let config = OrchestratorConfig::from_json_str(
            r#"{
                "review_policy": "hold_for_review",
                "validation": { "min_confidence": 0.8 },
                "timeouts": { "integrate": 5 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.review_policy, ReviewPolicy::HoldForReview);
        assert_eq!(config.validation.min_confidence, 0.8);
        assert_eq!(config.validation.reject_below, 0.4);
        assert_eq!(config.timeouts.for_stage(StageKind::Integrate), Duration::from_secs(5));
        assert_eq!(config.timeouts.infer_segmentation, 300.0);
    }

    #[test]
    fn test_from_json_rejects_bad_threshold() {
        let err = OrchestratorConfig::from_json_str(r#"{"validation": {"min_confidence": 1.5}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "validation.min_confidence"));
    }

    #[test]
    fn test_from_json_rejects_malformed() {
        let err = OrchestratorConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"pipeline_name": "chest-xray", "batch": {{"max_concurrency": 2}}}}"#).unwrap();

        let config = OrchestratorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.pipeline_name, "chest-xray");
        assert_eq!(config.batch.max_concurrency, 2);
    }

    #[test]
    fn test_from_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = OrchestratorConfig::from_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("MEDFLOW_MIN_CONFIDENCE", "0.85"),
            ("MEDFLOW_REVIEW_POLICY", "hold"),
            ("MEDFLOW_MAX_RETRIES", "5"),
            ("MEDFLOW_AGENT_TIMEOUT_SECS", "12.5"),
        ]
        .into_iter()
        .collect();

        let config =
            OrchestratorConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string())).unwrap();

        assert_eq!(config.validation.min_confidence, 0.85);
        assert_eq!(config.review_policy, ReviewPolicy::HoldForReview);
        assert_eq!(config.retry.max_attempts, 6);
        assert_eq!(config.timeouts.infer_segmentation, 12.5);
    }

    #[test]
    fn test_from_lookup_bad_number() {
        let err = OrchestratorConfig::from_lookup(|k| {
            (k == "MEDFLOW_MAX_SESSIONS").then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref var, .. } if var == "MEDFLOW_MAX_SESSIONS"));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let config = OrchestratorConfig::default()
            .with_timeouts(StageTimeouts::default().with_stage(StageKind::Validate, 0.0));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("timeouts.validate"));
    }

    #[test]
    fn test_zero_retries_means_one_attempt() {
        let config = OrchestratorConfig::from_lookup(|k| {
            (k == "MEDFLOW_MAX_RETRIES").then(|| "0".to_string())
        })
        .unwrap();
        assert_eq!(config.retry.max_attempts, 1);
    }

    #[test]
    fn test_validate_oversized_timeout() {
        let config = OrchestratorConfig::default().with_timeouts(StageTimeouts::uniform(1e30));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("too large"));

        let err = OrchestratorConfig::from_lookup(|k| {
            (k == "MEDFLOW_AGENT_TIMEOUT_SECS").then(|| "1e30".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("timeouts.infer_segmentation"));
    }

    #[test]
    fn test_for_stage_saturates() {
        let timeouts = StageTimeouts::uniform(2.0).with_stage(StageKind::Integrate, 1e30);
        assert_eq!(timeouts.for_stage(StageKind::Integrate), Duration::MAX);
        assert_eq!(timeouts.for_stage(StageKind::Validate), Duration::from_secs(2));
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let config = OrchestratorConfig::default().with_max_concurrency(0);
        assert!(config.validate().is_err());
    }
}
