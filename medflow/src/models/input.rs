//! The immutable description of one image to process.

use crate::errors::InputValidationError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

/// Imaging modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Computed tomography.
    Ct,
    /// Magnetic resonance imaging.
    Mri,
    /// Projection radiography.
    XRay,
    /// Ultrasound.
    Ultrasound,
    /// Positron emission tomography.
    Pet,
    /// Digital pathology slide.
    Pathology,
    /// Anything else; prompts need clinical context.
    Other,
}

impl Modality {
    /// Returns the DICOM modality code.
    #[must_use]
    pub const fn dicom_code(&self) -> &'static str {
        match self {
            Self::Ct => "CT",
            Self::Mri => "MR",
            Self::XRay => "DX",
            Self::Ultrasound => "US",
            Self::Pet => "PT",
            Self::Pathology => "SM",
            Self::Other => "OT",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ct => write!(f, "CT"),
            Self::Mri => write!(f, "MRI"),
            Self::XRay => write!(f, "X-Ray"),
            Self::Ultrasound => write!(f, "Ultrasound"),
            Self::Pet => write!(f, "PET"),
            Self::Pathology => write!(f, "Pathology"),
            Self::Other => write!(f, "Other"),
        }
    }
}

impl FromStr for Modality {
    type Err = InputValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_uppercase();

        match normalized.as_str() {
            "CT" => Ok(Self::Ct),
            "MR" | "MRI" => Ok(Self::Mri),
            "DX" | "CR" | "XR" | "XRAY" => Ok(Self::XRay),
            "US" | "ULTRASOUND" => Ok(Self::Ultrasound),
            "PT" | "PET" => Ok(Self::Pet),
            "SM" | "PATHOLOGY" => Ok(Self::Pathology),
            "OT" | "OTHER" => Ok(Self::Other),
            _ => Err(InputValidationError::new(
                "modality",
                format!("unrecognized modality '{s}'"),
            )),
        }
    }
}

/// Where the raw image comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    /// A local file.
    Path {
        /// File path.
        path: PathBuf,
    },
    /// A remote or archive location.
    Uri {
        /// Location string.
        uri: String,
    },
    /// Bytes held in memory.
    Inline {
        /// Encoded image bytes.
        #[serde(with = "crate::utils::base64_bytes")]
        bytes: Vec<u8>,
    },
}

impl ImageSource {
    /// Creates a file source.
    #[must_use]
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path { path: path.into() }
    }

    /// Creates a URI source.
    #[must_use]
    pub fn uri(uri: impl Into<String>) -> Self {
        Self::Uri { uri: uri.into() }
    }

    /// Creates an inline source.
    #[must_use]
    pub fn inline(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Inline {
            bytes: bytes.into(),
        }
    }

    /// Returns true if the source carries no reference or payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Path { path } => path.as_os_str().is_empty(),
            Self::Uri { uri } => uri.trim().is_empty(),
            Self::Inline { bytes } => bytes.is_empty(),
        }
    }

    /// A short, stable description used in logs and audit keys.
    ///
    /// Inline payloads are described by length, never by content.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Path { path } => format!("path:{}", path.display()),
            Self::Uri { uri } => format!("uri:{uri}"),
            Self::Inline { bytes } => format!("inline:{}", bytes.len()),
        }
    }
}

#[allow(clippy::expect_used)]
static STUDY_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\-]*$").expect("study id pattern compiles")
});

/// One image submitted for processing.
///
/// Fields are private; build with [`MedicalImageInput::new`] and the
/// `with_*` methods, then call [`MedicalImageInput::validate`] (the
/// orchestrator does this before starting a run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalImageInput {
    study_id: String,
    patient_id: String,
    modality: Modality,
    source: ImageSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    clinical_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body_part: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, serde_json::Value>,
}

impl MedicalImageInput {
    /// Creates a new input.
    #[must_use]
    pub fn new(
        study_id: impl Into<String>,
        patient_id: impl Into<String>,
        modality: Modality,
        source: ImageSource,
    ) -> Self {
        Self {
            study_id: study_id.into(),
            patient_id: patient_id.into(),
            modality,
            source,
            clinical_context: None,
            body_part: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Sets the free-text clinical context.
    #[must_use]
    pub fn with_clinical_context(mut self, context: impl Into<String>) -> Self {
        self.clinical_context = Some(context.into());
        self
    }

    /// Sets the body part examined.
    #[must_use]
    pub fn with_body_part(mut self, body_part: impl Into<String>) -> Self {
        self.body_part = Some(body_part.into());
        self
    }

    /// Adds a metadata entry (e.g. `pixel_spacing_mm`).
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Study identifier.
    #[must_use]
    pub fn study_id(&self) -> &str {
        &self.study_id
    }

    /// Opaque patient identifier.
    #[must_use]
    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    /// Imaging modality.
    #[must_use]
    pub const fn modality(&self) -> Modality {
        self.modality
    }

    /// Image source.
    #[must_use]
    pub const fn source(&self) -> &ImageSource {
        &self.source
    }

    /// Clinical context, if any.
    #[must_use]
    pub fn clinical_context(&self) -> Option<&str> {
        self.clinical_context.as_deref()
    }

    /// Body part, if any.
    #[must_use]
    pub fn body_part(&self) -> Option<&str> {
        self.body_part.as_deref()
    }

    /// Free-form metadata.
    #[must_use]
    pub const fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }

    /// Reads a positive numeric metadata value.
    #[must_use]
    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata
            .get(key)
            .and_then(serde_json::Value::as_f64)
            .filter(|v| v.is_finite() && *v > 0.0)
    }

    /// Checks identifiers and source before a run is started.
    ///
    /// # Errors
    ///
    /// Returns the first failing field.
    pub fn validate(&self) -> Result<(), InputValidationError> {
        if self.study_id.is_empty() {
            return Err(InputValidationError::new("study_id", "must not be empty"));
        }
        if !STUDY_ID.is_match(&self.study_id) {
            return Err(InputValidationError::new(
                "study_id",
                "must start with an alphanumeric and contain only letters, digits, '.', '_' or '-'",
            ));
        }
        if self.patient_id.trim().is_empty() {
            return Err(InputValidationError::new("patient_id", "must not be empty"));
        }
        if self.source.is_empty() {
            return Err(InputValidationError::new("source", "must reference an image"));
        }
        Ok(())
    }
}
