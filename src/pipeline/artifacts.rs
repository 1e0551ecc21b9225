//! Artifact generators: the resolved set, control requirement records, the
//! URL mapping and the pattern fragment.
//!
//! Generators read a [`ResolvedSet`] and never refetch. Each one either
//! writes all of its output or nothing.

use crate::core::config::OutputConfig;
use crate::core::error::{ResolverError, Stage, StageContext, StageError};
use crate::core::model::ResolvedSet;
use crate::core::staging::{StagedDir, write_json_atomic};
use crate::pipeline::mapping::{MappingLayout, UrlMapping, build_mapping};
use crate::pipeline::materialize::{ControlRequirementRecord, MaterializeOptions, materialize_all};
use crate::pipeline::pattern::{PatternFragment, synthesize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Load a resolved set written by `resolve`, rejecting edited files.
pub fn read_resolved(path: &Path) -> Result<ResolvedSet, ResolverError> {
    let content = fs::read_to_string(path).map_err(|e| {
        ResolverError::ValidationError(format!("cannot read {}: {}", path.display(), e))
    })?;
    let set: ResolvedSet = serde_json::from_str(&content)?;
    if !set.verify_digest()? {
        return Err(ResolverError::ValidationError(format!(
            "digest mismatch in {}: resolved set was modified after resolution",
            path.display()
        )));
    }
    Ok(set)
}

pub fn write_resolved(path: &Path, set: &ResolvedSet) -> Result<(), ResolverError> {
    write_json_atomic(path, set)
}

/// Records at the layer of the set's source path.
pub fn records_for(
    set: &ResolvedSet,
    options: &MaterializeOptions,
) -> Result<Vec<ControlRequirementRecord>, ResolverError> {
    materialize_all(set.layer(), &set.requirements, options)
}

/// Directory name used for a set's records and file prefixes.
pub fn set_slug(set: &ResolvedSet) -> &str {
    set.policy_id
        .as_deref()
        .or(set.catalog_id.as_deref())
        .unwrap_or("catalog")
}

fn stage_records(
    stage: &mut StagedDir,
    dir: &Path,
    records: &[ControlRequirementRecord],
) -> Result<(), ResolverError> {
    for record in records {
        stage.write_json(&dir.join(record.file_name()), record, &record.id)?;
    }
    Ok(())
}

/// `controls-gen`: one `*.requirement.json` per record in `output_dir`.
pub fn write_controls(
    set: &ResolvedSet,
    output_dir: &Path,
    options: &MaterializeOptions,
) -> Result<Vec<ControlRequirementRecord>, StageError> {
    let records = records_for(set, options).stage(Stage::Materialize)?;
    let mut stage = StagedDir::create(output_dir).stage(Stage::Write)?;
    stage_records(&mut stage, Path::new(""), &records).stage(Stage::Write)?;
    stage.commit().stage(Stage::Write)?;
    Ok(records)
}

/// `mapping-gen`: URL → location JSON at `output`.
pub fn write_mapping(
    set: &ResolvedSet,
    layout: &MappingLayout,
    output: &Path,
    options: &MaterializeOptions,
) -> Result<UrlMapping, StageError> {
    let records = records_for(set, options).stage(Stage::Materialize)?;
    let mapping = build_mapping(&records, layout).stage(Stage::Mapping)?;
    write_json_atomic(output, &mapping).stage(Stage::Write)?;
    Ok(mapping)
}

/// `pattern-gen`: closed-world schema fragment at `output`.
pub fn write_pattern(
    set: &ResolvedSet,
    scope: Option<&BTreeSet<String>>,
    output: &Path,
    options: &MaterializeOptions,
) -> Result<PatternFragment, StageError> {
    let records = records_for(set, options).stage(Stage::Materialize)?;
    let fragment = synthesize(&records, scope);
    write_json_atomic(output, &fragment.to_schema()).stage(Stage::Write)?;
    Ok(fragment)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateSummary {
    pub root: PathBuf,
    pub records: usize,
    pub mapping_entries: usize,
    pub pattern_urls: usize,
    /// Paths relative to `root`, sorted.
    pub files: Vec<PathBuf>,
}

/// Every artifact for one set, committed under `output_dir` in one step:
///
/// ```text
/// resolved/{slug}.resolved.json
/// {controls_dir}/{slug}/*.requirement.json
/// mappings/{slug}-url-mapping.json
/// patterns/{slug}-requirements.pattern.json
/// ```
pub fn generate(
    set: &ResolvedSet,
    output_dir: &Path,
    output: &OutputConfig,
    scope: Option<&BTreeSet<String>>,
) -> Result<GenerateSummary, StageError> {
    let options = MaterializeOptions {
        schema_url: output.schema_url.clone(),
    };
    let slug = set_slug(set).to_string();
    let controls_dir = format!("{}/{}", output.controls_dir.trim_end_matches('/'), slug);

    let records = records_for(set, &options).stage(Stage::Materialize)?;
    let layout = MappingLayout {
        controls_dir: controls_dir.clone(),
        base_requirements_dir: output.base_requirements_dir.clone(),
        path_prefix: output.path_prefix.clone(),
    };
    let mapping = build_mapping(&records, &layout).stage(Stage::Mapping)?;
    let fragment = synthesize(&records, scope);

    let mut stage = StagedDir::create(output_dir).stage(Stage::Write)?;
    let write = |stage: &mut StagedDir| -> Result<(), ResolverError> {
        stage.write_json(
            &Path::new("resolved").join(format!("{}.resolved.json", slug)),
            set,
            "resolved",
        )?;
        stage_records(stage, Path::new(&controls_dir), &records)?;
        stage.write_json(
            &Path::new("mappings").join(format!("{}-url-mapping.json", slug)),
            &mapping,
            "mapping",
        )?;
        stage.write_json(
            &Path::new("patterns").join(format!("{}-requirements.pattern.json", slug)),
            &fragment.to_schema(),
            "pattern",
        )?;
        Ok(())
    };
    write(&mut stage).stage(Stage::Write)?;
    let files: Vec<PathBuf> = stage.staged_files().map(Path::to_path_buf).collect();
    let root = stage.commit().stage(Stage::Write)?;

    Ok(GenerateSummary {
        root,
        records: records.len(),
        mapping_entries: mapping.len(),
        pattern_urls: fragment.requirement_urls.len(),
        files,
    })
}
