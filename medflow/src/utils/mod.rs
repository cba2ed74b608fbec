//! Small helpers: audit keys, byte encoding, duration conversion.

use crate::models::MedicalImageInput;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Derives a stable audit key for an input.
///
/// The same study, patient, modality, and image reference always give the
/// same key, so storage can deduplicate retried writes. The patient id is
/// hashed, never stored in the key.
#[must_use]
pub fn audit_key(input: &MedicalImageInput) -> String {
    let combined = [
        input.study_id(),
        input.patient_id(),
        input.modality().dicom_code(),
        &input.source().describe(),
    ]
    .join(":");

    let mut hasher = Sha256::new();
    hasher.update(combined.as_bytes());
    let digest = hasher.finalize();
    format!("audit:{}", hex::encode(&digest[..16]))
}

/// Milliseconds in `duration`, saturating.
#[must_use]
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Serde adapter storing bytes as standard base64 strings.
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImageSource, Modality};

    fn input(patient: &str) -> MedicalImageInput {
        MedicalImageInput::new("S-1", patient, Modality::Ct, ImageSource::uri("pacs://1"))
    }

    #[test]
    fn test_audit_key_stable() {
        assert_eq!(audit_key(&input("P1")), audit_key(&input("P1")));
    }

    #[test]
    fn test_audit_key_differs_by_patient() {
        assert_ne!(audit_key(&input("P1")), audit_key(&input("P2")));
    }

    #[test]
    fn test_audit_key_format_hides_identifiers() {
        let key = audit_key(&input("P1"));
        assert!(key.starts_with("audit:"));
        assert_eq!(key.len(), "audit:".len() + 32);
        assert!(!key.contains("P1"));
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(42)), 42);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
