//! Control file validation: every `gemara://` URL referenced by a CALM
//! architecture must resolve to a conforming `*.requirement.json` record.

use crate::core::error::ResolverError;
use crate::core::urls::GemaraUrl;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

pub const ARCHITECTURE_SUFFIX: &str = ".arch.json";
pub const RECORD_SUFFIX: &str = ".requirement.json";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// url -> record file that satisfied it
    pub found: BTreeMap<String, PathBuf>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Files under `dir` (recursive) whose name ends with `suffix`, sorted.
pub fn collect_files(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>, ResolverError> {
    let mut out = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(suffix))
            {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

fn url_pattern() -> Result<Regex, ResolverError> {
    Regex::new(r#"gemara://[^"\s]+"#).map_err(|e| ResolverError::ValidationError(e.to_string()))
}

/// All distinct `gemara://` URLs mentioned in `*.arch.json` files, sorted.
pub fn extract_gemara_urls(architecture_dir: &Path) -> Result<Vec<String>, ResolverError> {
    let re = url_pattern()?;
    let mut urls = BTreeSet::new();
    for file in collect_files(architecture_dir, ARCHITECTURE_SUFFIX)? {
        let content = fs::read_to_string(&file)?;
        urls.extend(re.find_iter(&content).map(|m| m.as_str().to_string()));
    }
    Ok(urls.into_iter().collect())
}

/// Index record files by `$id`. Unreadable files and duplicate ids are
/// reported as problems rather than aborting the scan.
pub fn index_records(
    controls_dir: &Path,
) -> Result<(BTreeMap<String, (PathBuf, JsonValue)>, Vec<String>), ResolverError> {
    let mut index: BTreeMap<String, (PathBuf, JsonValue)> = BTreeMap::new();
    let mut problems = Vec::new();
    for file in collect_files(controls_dir, RECORD_SUFFIX)? {
        let parsed = fs::read_to_string(&file)
            .map_err(|e| e.to_string())
            .and_then(|c| serde_json::from_str::<JsonValue>(&c).map_err(|e| e.to_string()));
        let value = match parsed {
            Ok(v) => v,
            Err(e) => {
                problems.push(format!("{}: Invalid JSON: {}", file.display(), e));
                continue;
            }
        };
        let Some(id) = value.get("$id").and_then(|v| v.as_str()).map(str::to_string) else {
            problems.push(format!("{}: Missing required field: $id", file.display()));
            continue;
        };
        if let Some((existing, _)) = index.get(&id) {
            problems.push(format!(
                "{}: duplicate $id {} (already declared by {})",
                file.display(),
                id,
                existing.display()
            ));
            continue;
        }
        index.insert(id, (file, value));
    }
    Ok((index, problems))
}

/// Structural checks on a raw record. Returns the first violation.
pub fn check_record_value(value: &JsonValue, expected_url: &str) -> Result<(), String> {
    let id = value.get("$id").and_then(|v| v.as_str()).unwrap_or("");
    if id != expected_url {
        return Err(format!(
            "$id mismatch: expected '{}', found '{}'",
            expected_url, id
        ));
    }
    for field in ["control-id", "name", "description", "metadata"] {
        if value.get(field).is_none() {
            return Err(format!("Missing required field: {}", field));
        }
    }
    let Some(gemara) = value
        .get("metadata")
        .and_then(|m| m.get("gemara"))
        .filter(|g| g.as_object().is_some_and(|o| !o.is_empty()))
    else {
        return Err("Missing required field: metadata.gemara".to_string());
    };
    for field in ["control-id", "requirement-id", "source", "applicability"] {
        if gemara.get(field).is_none() {
            return Err(format!("Missing required field: metadata.gemara.{}", field));
        }
    }
    match gemara.get("layer").and_then(|v| v.as_str()).unwrap_or("") {
        "Layer 3" => {
            for field in ["policy-id", "base-requirement"] {
                if gemara.get(field).is_none() {
                    return Err(format!(
                        "Layer 3 requirement missing required field: metadata.gemara.{}",
                        field
                    ));
                }
            }
            if gemara
                .get("base-requirement")
                .and_then(|b| b.get("reference-url"))
                .and_then(|u| u.as_str())
                .is_none()
            {
                return Err(
                    "Layer 3 requirement missing required field: metadata.gemara.base-requirement.reference-url"
                        .to_string(),
                );
            }
        }
        "Layer 2" => {
            if gemara.get("catalog-id").is_none() {
                return Err(
                    "Layer 2 requirement missing required field: metadata.gemara.catalog-id"
                        .to_string(),
                );
            }
            if gemara.get("policy-id").is_some() || gemara.get("base-requirement").is_some() {
                return Err(
                    "Layer 2 requirement must not carry policy-id or base-requirement".to_string(),
                );
            }
        }
        other => return Err(format!("Unknown metadata.gemara.layer '{}'", other)),
    }
    Ok(())
}

fn policy_mismatch(url: &str, record: &JsonValue) -> Option<String> {
    let GemaraUrl::Policy { policy_id, .. } = GemaraUrl::parse(url)? else {
        return None;
    };
    let gemara = record.get("metadata")?.get("gemara")?;
    if gemara.get("layer").and_then(|v| v.as_str()) != Some("Layer 3") {
        return None;
    }
    let declared = gemara.get("policy-id").and_then(|v| v.as_str()).unwrap_or("");
    (declared != policy_id).then(|| {
        format!(
            "Policy ID mismatch (expected '{}', found '{}')",
            policy_id, declared
        )
    })
}

pub fn validate_control_files(
    architecture_dir: &Path,
    controls_dir: &Path,
) -> Result<ValidationReport, ResolverError> {
    if !architecture_dir.is_dir() {
        return Err(ResolverError::ValidationError(format!(
            "Architecture directory not found: {}",
            architecture_dir.display()
        )));
    }
    if !controls_dir.is_dir() {
        return Err(ResolverError::ValidationError(format!(
            "Controls directory not found: {}",
            controls_dir.display()
        )));
    }

    let urls = extract_gemara_urls(architecture_dir)?;
    let (index, problems) = index_records(controls_dir)?;
    let mut report = ValidationReport {
        warnings: problems,
        ..ValidationReport::default()
    };

    for url in urls {
        let Some((file, value)) = index.get(&url) else {
            report.errors.push(format!("Missing control file for {}", url));
            continue;
        };
        if let Err(msg) = check_record_value(value, &url) {
            report.errors.push(format!("{}: {}", file.display(), msg));
            continue;
        }
        if let Some(msg) = policy_mismatch(&url, value) {
            report.warnings.push(format!("{}: {}", file.display(), msg));
        }
        report.found.insert(url, file.clone());
    }
    Ok(report)
}
