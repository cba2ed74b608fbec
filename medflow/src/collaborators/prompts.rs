//! Template-driven prompt construction.

use super::PromptBuilder;
use crate::errors::CollaboratorError;
use crate::models::Modality;
use async_trait::async_trait;
use std::collections::HashMap;

/// Splits a prompt into its targets.
#[must_use]
pub fn split_targets(prompt: &str) -> Vec<String> {
    prompt
        .split('&')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Builds prompts from per-modality target lists.
///
/// Lookup order: `(modality, body part)` template, then the modality default.
/// `Modality::Other` has no default; its targets come from the clinical
/// context (comma, semicolon, or `&` separated).
#[derive(Debug, Clone)]
pub struct TemplatePromptBuilder {
    defaults: HashMap<Modality, String>,
    by_body_part: HashMap<(Modality, String), String>,
}

impl Default for TemplatePromptBuilder {
    fn default() -> Self {
        let defaults = [
            (Modality::XRay, "lung & heart & mediastinum & pleural effusion"),
            (Modality::Mri, "tumor core & enhancing tumor & non-enhancing tumor & edema"),
            (Modality::Ct, "liver & hepatic tumor & vessel & bile duct"),
            (Modality::Pathology, "neoplastic cells & inflammatory cells & necrosis"),
            (Modality::Ultrasound, "organ & lesion & vessel & fluid collection"),
            (Modality::Pet, "hypermetabolic lesion & lymph nodes & organ"),
        ]
        .into_iter()
        .map(|(m, p)| (m, p.to_string()))
        .collect();

        let by_body_part = [
            (Modality::Ct, "chest", "lung & heart & mediastinum & pleural effusion & lymph nodes"),
            (Modality::Ct, "abdomen", "liver & kidney & spleen & pancreas & tumor & vessel"),
            (Modality::Ct, "brain", "brain tissue & tumor & edema & hemorrhage & ventricles"),
            (Modality::Ct, "pelvis", "bladder & prostate & uterus & ovary & rectum & lymph nodes"),
            (Modality::Mri, "brain", "tumor core & enhancing tumor & non-enhancing tumor & edema & necrosis"),
            (Modality::Mri, "spine", "spinal cord & vertebrae & disc & nerve root & tumor"),
            (Modality::Mri, "cardiac", "myocardium & left ventricle & right ventricle & atrium & vessel"),
            (Modality::XRay, "chest", "lung & heart & clavicle & rib & pleural effusion & pneumonia"),
            (Modality::XRay, "abdomen", "bowel & liver edge & kidney & bone & soft tissue"),
        ]
        .into_iter()
        .map(|(m, part, p)| ((m, part.to_string()), p.to_string()))
        .collect();

        Self {
            defaults,
            by_body_part,
        }
    }
}

impl TemplatePromptBuilder {
    /// Creates a builder with the built-in templates.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the default targets for a modality.
    #[must_use]
    pub fn with_template(mut self, modality: Modality, targets: &[&str]) -> Self {
        self.defaults.insert(modality, targets.join(" & "));
        self
    }

    /// Adds targets for a modality and body part.
    #[must_use]
    pub fn with_body_part_template(
        mut self,
        modality: Modality,
        body_part: &str,
        targets: &[&str],
    ) -> Self {
        self.by_body_part
            .insert((modality, body_part.to_ascii_lowercase()), targets.join(" & "));
        self
    }

    /// Resolves a prompt synchronously.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError::InvalidModality`] if neither a template
    /// nor usable clinical context exists.
    pub fn resolve(
        &self,
        modality: Modality,
        body_part: Option<&str>,
        clinical_context: Option<&str>,
    ) -> Result<String, CollaboratorError> {
        if let Some(part) = body_part {
            let key = (modality, part.trim().to_ascii_lowercase());
            if let Some(prompt) = self.by_body_part.get(&key) {
                return Ok(prompt.clone());
            }
        }
        if let Some(prompt) = self.defaults.get(&modality) {
            return Ok(prompt.clone());
        }

        let targets: Vec<&str> = clinical_context
            .unwrap_or_default()
            .split([',', ';', '&'])
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();
        if targets.is_empty() {
            return Err(CollaboratorError::InvalidModality(format!(
                "no template for {modality} and no clinical context to derive targets"
            )));
        }
        Ok(targets.join(" & "))
    }
}

#[async_trait]
impl PromptBuilder for TemplatePromptBuilder {
    async fn build_prompt(
        &self,
        modality: Modality,
        body_part: Option<&str>,
        clinical_context: Option<&str>,
    ) -> Result<String, CollaboratorError> {
        self.resolve(modality, body_part, clinical_context)
    }
}
