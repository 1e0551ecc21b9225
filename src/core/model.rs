//! Gemara document model: Layer 3 policies, Layer 2 controls and the
//! resolved requirement set handed between pipeline stages.
//!
//! Field names follow the Gemara YAML/JSON vocabulary (kebab-case).

use crate::core::urls;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// --- Layer 3 -----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PolicyMetadata {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A Layer 3 policy. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Policy {
    pub metadata: PolicyMetadata,
    #[serde(default)]
    pub control_references: Vec<ControlReference>,
}

impl Policy {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }
}

/// Reference from a policy to one source catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ControlReference {
    /// Catalog identifier (e.g. `FINOS-CCC`).
    pub reference_id: String,
    /// Controls taken into scope without modification.
    #[serde(default)]
    pub control_ids: Vec<String>,
    #[serde(default)]
    pub control_modifications: Vec<ControlModification>,
    #[serde(default)]
    pub assessment_requirement_modifications: Vec<AssessmentRequirementModification>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ControlModification {
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modification_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AssessmentRequirementModification {
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modification_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applicability: Option<Vec<String>>,
    /// Display name for the materialized record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

// --- Layer 2 -----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AssessmentRequirement {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub applicability: Vec<String>,
}

/// A Layer 2 control owned by its source catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Control {
    pub id: String,
    #[serde(default)]
    pub catalog_id: String,
    pub title: String,
    #[serde(default)]
    pub objective: String,
    #[serde(default)]
    pub assessment_requirements: Vec<AssessmentRequirement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CatalogMetadata {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// On-disk catalog document read by the file-backed source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Catalog {
    pub metadata: CatalogMetadata,
    #[serde(default)]
    pub controls: Vec<Control>,
}

// --- Resolution output ---------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layer {
    #[serde(rename = "Layer 2")]
    Layer2,
    #[serde(rename = "Layer 3")]
    Layer3,
}

impl Layer {
    pub fn as_str(self) -> &'static str {
        match self {
            Layer::Layer2 => "Layer 2",
            Layer::Layer3 => "Layer 3",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which resolution path produced a requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Catalog,
    Policy,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Catalog => "catalog",
            SourceKind::Policy => "policy",
        }
    }

    /// Layer declared for records produced by this path.
    pub fn layer(self) -> Layer {
        match self {
            SourceKind::Catalog => Layer::Layer2,
            SourceKind::Policy => Layer::Layer3,
        }
    }
}

/// Per-requirement outcome of applying modifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAssessment {
    pub id: String,
    pub text: String,
    pub applicability: Vec<String>,
    pub modified: bool,
    pub name: Option<String>,
}

/// A control after control-level and requirement-level overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedControl {
    pub id: String,
    pub catalog_id: String,
    pub title: String,
    pub objective: String,
    pub requirements: Vec<ResolvedAssessment>,
}

/// One fully resolved assessment requirement. Never one per control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResolvedRequirement {
    pub requirement_id: String,
    pub control_id: String,
    pub catalog_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    pub control_title: String,
    #[serde(default)]
    pub control_objective: String,
    pub text: String,
    #[serde(default)]
    pub applicability: Vec<String>,
    #[serde(default)]
    pub modified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Identity URL: policy-scoped on the policy path, base-scoped otherwise.
    pub gemara_url: String,
    pub base_requirement_url: String,
}

impl ResolvedRequirement {
    pub fn from_control(
        policy_id: Option<&str>,
        control: &ResolvedControl,
        assessment: &ResolvedAssessment,
    ) -> Self {
        let base_requirement_url =
            urls::base_requirement_url(&control.catalog_id, &control.id, &assessment.id);
        let gemara_url = match policy_id {
            Some(policy) => urls::policy_requirement_url(policy, &control.id, &assessment.id),
            None => base_requirement_url.clone(),
        };
        ResolvedRequirement {
            requirement_id: assessment.id.clone(),
            control_id: control.id.clone(),
            catalog_id: control.catalog_id.clone(),
            policy_id: policy_id.map(|p| p.to_string()),
            control_title: control.title.clone(),
            control_objective: control.objective.clone(),
            text: assessment.text.clone(),
            applicability: assessment.applicability.clone(),
            modified: assessment.modified,
            name: assessment.name.clone(),
            gemara_url,
            base_requirement_url,
        }
    }
}

/// Output of the `resolve` stage and input of every generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResolvedSet {
    pub source: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<String>,
    pub digest: String,
    pub requirements: Vec<ResolvedRequirement>,
}

impl ResolvedSet {
    pub fn new(
        source: SourceKind,
        policy_id: Option<String>,
        catalog_id: Option<String>,
        requirements: Vec<ResolvedRequirement>,
    ) -> Result<Self, serde_json::Error> {
        let digest = requirements_digest(&requirements)?;
        Ok(ResolvedSet {
            source,
            policy_id,
            catalog_id,
            digest,
            requirements,
        })
    }

    pub fn layer(&self) -> Layer {
        self.source.layer()
    }

    /// True when `digest` still matches the requirement list.
    pub fn verify_digest(&self) -> Result<bool, serde_json::Error> {
        Ok(requirements_digest(&self.requirements)? == self.digest)
    }
}

fn requirements_digest(requirements: &[ResolvedRequirement]) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(requirements)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}
