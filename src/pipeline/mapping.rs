//! URL Mapping Builder: `gemara://` URL → relative record location.
//!
//! Built sequentially from fully collected records so collisions are detected
//! deterministically, whatever order fetches completed in.

use crate::core::error::ResolverError;
use crate::core::model::Layer;
use crate::pipeline::materialize::ControlRequirementRecord;
use std::collections::BTreeMap;

/// Sorted so the written file is byte-stable across runs.
pub type UrlMapping = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingLayout {
    /// Directory holding the records being mapped.
    pub controls_dir: String,
    /// Directory holding Layer 2 base records referenced by Layer 3 lineage.
    pub base_requirements_dir: String,
    pub path_prefix: String,
}

impl MappingLayout {
    pub fn location(&self, dir: &str, file_name: &str) -> String {
        let dir = dir.trim_end_matches('/');
        if dir.is_empty() {
            format!("{}{}", self.path_prefix, file_name)
        } else {
            format!("{}{}/{}", self.path_prefix, dir, file_name)
        }
    }
}

#[derive(Debug, Default)]
pub struct MappingBuilder {
    /// url -> (location, source description)
    entries: BTreeMap<String, (String, String)>,
    /// location -> url; one record file carries exactly one `$id`
    claimed: BTreeMap<String, String>,
}

impl MappingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same url and same location is a no-op. A url at a second location is
    /// a `DuplicateUrl`; a location claimed by a second url is a
    /// `FileCollision`. Both name the two sources.
    pub fn insert(&mut self, url: &str, location: String, source: &str) -> Result<(), ResolverError> {
        match self.entries.get(url) {
            Some((existing, _)) if *existing == location => return Ok(()),
            Some((existing, existing_source)) => {
                return Err(ResolverError::DuplicateUrl {
                    url: url.to_string(),
                    first: format!("{} -> {}", existing_source, existing),
                    second: format!("{} -> {}", source, location),
                });
            }
            None => {}
        }
        if let Some(owner) = self.claimed.get(&location) {
            let owner_source = self
                .entries
                .get(owner)
                .map(|(_, s)| s.as_str())
                .unwrap_or_default();
            return Err(ResolverError::FileCollision {
                path: location,
                first: format!("{} ({})", owner_source, owner),
                second: format!("{} ({})", source, url),
            });
        }
        self.claimed.insert(location.clone(), url.to_string());
        self.entries
            .insert(url.to_string(), (location, source.to_string()));
        Ok(())
    }

    pub fn add_record(
        &mut self,
        record: &ControlRequirementRecord,
        layout: &MappingLayout,
    ) -> Result<(), ResolverError> {
        let file_name = record.file_name();
        let source = record.requirement_id();
        self.insert(
            &record.id,
            layout.location(&layout.controls_dir, &file_name),
            source,
        )?;
        if record.layer() == Layer::Layer3 {
            let base_url = record.base_reference_url().ok_or_else(|| {
                ResolverError::IncompleteRecord {
                    requirement_id: source.to_string(),
                    reason: "Layer 3 record has no base-requirement lineage".to_string(),
                }
            })?;
            self.insert(
                base_url,
                layout.location(&layout.base_requirements_dir, &file_name),
                source,
            )?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn build(self) -> UrlMapping {
        self.entries
            .into_iter()
            .map(|(url, (location, _))| (url, location))
            .collect()
    }
}

pub fn build_mapping(
    records: &[ControlRequirementRecord],
    layout: &MappingLayout,
) -> Result<UrlMapping, ResolverError> {
    let mut builder = MappingBuilder::new();
    for record in records {
        builder.add_record(record, layout)?;
    }
    Ok(builder.build())
}
