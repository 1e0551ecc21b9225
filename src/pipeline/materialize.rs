//! Requirement Materializer: one CALM control requirement record per resolved
//! assessment requirement.

use crate::core::config::DEFAULT_SCHEMA_URL;
use crate::core::error::ResolverError;
use crate::core::model::{Layer, ResolvedRequirement, SourceKind};
use crate::core::urls;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RecordSource {
    #[serde(rename = "type")]
    pub kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<String>,
    pub control_id: String,
}

/// Lineage back to the Layer 2 requirement a Layer 3 record derives from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BaseRequirement {
    pub reference_url: String,
    pub catalog_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GemaraMetadata {
    pub layer: Layer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<String>,
    pub control_id: String,
    pub requirement_id: String,
    pub source: RecordSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_requirement: Option<BaseRequirement>,
    pub applicability: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub gemara: GemaraMetadata,
}

/// The storable form of a resolved requirement (`*.requirement.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequirementRecord {
    #[serde(rename = "$schema")]
    pub schema: String,
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "control-id")]
    pub control_id: String,
    pub name: String,
    pub description: String,
    pub metadata: RecordMetadata,
}

impl ControlRequirementRecord {
    pub fn gemara(&self) -> &GemaraMetadata {
        &self.metadata.gemara
    }

    pub fn layer(&self) -> Layer {
        self.metadata.gemara.layer
    }

    pub fn requirement_id(&self) -> &str {
        &self.metadata.gemara.requirement_id
    }

    pub fn file_name(&self) -> String {
        urls::requirement_file_name(self.requirement_id())
    }

    pub fn base_reference_url(&self) -> Option<&str> {
        self.metadata
            .gemara
            .base_requirement
            .as_ref()
            .map(|b| b.reference_url.as_str())
    }

    /// Layer 2 records never carry `policy-id`/`base-requirement`; Layer 3
    /// records always carry both.
    pub fn check_lineage(&self) -> Result<(), ResolverError> {
        let meta = &self.metadata.gemara;
        let incomplete = |reason: &str| ResolverError::IncompleteRecord {
            requirement_id: meta.requirement_id.clone(),
            reason: reason.to_string(),
        };
        match meta.layer {
            Layer::Layer3 => {
                if meta.policy_id.as_deref().is_none_or(str::is_empty) {
                    return Err(incomplete("Layer 3 record has no policy-id"));
                }
                match &meta.base_requirement {
                    Some(base) if !base.reference_url.is_empty() && !base.catalog_id.is_empty() => {}
                    _ => return Err(incomplete("Layer 3 record has no base-requirement lineage")),
                }
            }
            Layer::Layer2 => {
                if meta.policy_id.is_some() || meta.base_requirement.is_some() {
                    return Err(incomplete(
                        "Layer 2 record must not carry policy-id or base-requirement",
                    ));
                }
                if meta.catalog_id.as_deref().is_none_or(str::is_empty) {
                    return Err(incomplete("Layer 2 record has no catalog-id"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializeOptions {
    pub schema_url: String,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        MaterializeOptions {
            schema_url: DEFAULT_SCHEMA_URL.to_string(),
        }
    }
}

fn incomplete(req: &ResolvedRequirement, reason: impl Into<String>) -> ResolverError {
    ResolverError::IncompleteRecord {
        requirement_id: req.requirement_id.clone(),
        reason: reason.into(),
    }
}

/// Build the record for `req` at the layer the caller declares.
///
/// `description` is `req.text` byte for byte.
pub fn materialize(
    layer: Layer,
    req: &ResolvedRequirement,
    options: &MaterializeOptions,
) -> Result<ControlRequirementRecord, ResolverError> {
    if req.requirement_id.is_empty() {
        return Err(incomplete(req, "requirement id is empty"));
    }
    if req.control_id.is_empty() {
        return Err(incomplete(req, "control id is empty"));
    }
    if req.catalog_id.is_empty() {
        return Err(incomplete(req, "catalog id is empty; base lineage cannot be built"));
    }

    let base_url = urls::base_requirement_url(&req.catalog_id, &req.control_id, &req.requirement_id);
    if req.base_requirement_url.is_empty() {
        return Err(incomplete(req, "base-requirement reference-url is missing"));
    }
    if req.base_requirement_url != base_url {
        return Err(incomplete(
            req,
            format!(
                "base-requirement reference-url '{}' does not match lineage '{}'",
                req.base_requirement_url, base_url
            ),
        ));
    }

    let (id, policy_id, catalog_id, source, base_requirement) = match layer {
        Layer::Layer3 => {
            let policy_id = req
                .policy_id
                .clone()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| incomplete(req, "Layer 3 record requires a policy id"))?;
            let id = urls::policy_requirement_url(&policy_id, &req.control_id, &req.requirement_id);
            (
                id,
                Some(policy_id.clone()),
                None,
                RecordSource {
                    kind: SourceKind::Policy,
                    policy_id: Some(policy_id),
                    catalog_id: None,
                    control_id: req.control_id.clone(),
                },
                Some(BaseRequirement {
                    reference_url: base_url,
                    catalog_id: req.catalog_id.clone(),
                }),
            )
        }
        Layer::Layer2 => (
            base_url,
            None,
            Some(req.catalog_id.clone()),
            RecordSource {
                kind: SourceKind::Catalog,
                policy_id: None,
                catalog_id: Some(req.catalog_id.clone()),
                control_id: req.control_id.clone(),
            },
            None,
        ),
    };

    if id != req.gemara_url {
        return Err(ResolverError::ValidationError(format!(
            "requirement '{}' carries url '{}' but its {} lineage gives '{}'",
            req.requirement_id, req.gemara_url, layer, id
        )));
    }

    let record = ControlRequirementRecord {
        schema: options.schema_url.clone(),
        id,
        control_id: req.requirement_id.clone(),
        name: req
            .name
            .clone()
            .unwrap_or_else(|| format!("{} - {}", req.control_title, req.requirement_id)),
        description: req.text.clone(),
        metadata: RecordMetadata {
            gemara: GemaraMetadata {
                layer,
                policy_id,
                catalog_id,
                control_id: req.control_id.clone(),
                requirement_id: req.requirement_id.clone(),
                source,
                base_requirement,
                applicability: req.applicability.clone(),
            },
        },
    };
    record.check_lineage()?;
    Ok(record)
}

/// Materialize a whole set; no two records may share an `$id`.
pub fn materialize_all(
    layer: Layer,
    requirements: &[ResolvedRequirement],
    options: &MaterializeOptions,
) -> Result<Vec<ControlRequirementRecord>, ResolverError> {
    let mut seen: FxHashMap<String, String> = FxHashMap::default();
    let mut records = Vec::with_capacity(requirements.len());
    for req in requirements {
        let record = materialize(layer, req, options)?;
        let origin = format!("{}/{}", req.catalog_id, req.requirement_id);
        if let Some(previous) = seen.insert(record.id.clone(), origin.clone()) {
            return Err(ResolverError::DuplicateUrl {
                url: record.id,
                first: previous,
                second: origin,
            });
        }
        records.push(record);
    }
    Ok(records)
}
