//! Integration tests for control file validation against CALM architectures.

use gemara_calm::core::error::ResolverError;
use gemara_calm::core::model::{
    ResolvedAssessment, ResolvedControl, ResolvedRequirement, ResolvedSet, SourceKind,
};
use gemara_calm::pipeline::artifacts;
use gemara_calm::pipeline::materialize::MaterializeOptions;
use gemara_calm::pipeline::validate::{extract_gemara_urls, validate_control_files};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const TR01: &str =
    "gemara://policies/cloud-policy-001/controls/CCC.Core.CN01/requirements/CCC.Core.CN01.TR01";
const TR02: &str =
    "gemara://policies/cloud-policy-001/controls/CCC.Core.CN01/requirements/CCC.Core.CN01.TR02";

fn policy_set() -> ResolvedSet {
    let control = ResolvedControl {
        id: "CCC.Core.CN01".into(),
        catalog_id: "FINOS-CCC".into(),
        title: "Encrypt Data in Transit".into(),
        objective: String::new(),
        requirements: vec![],
    };
    let requirements = ["CCC.Core.CN01.TR01", "CCC.Core.CN01.TR02"]
        .iter()
        .map(|id| {
            let assessment = ResolvedAssessment {
                id: id.to_string(),
                text: "t".into(),
                applicability: vec!["default".into()],
                modified: false,
                name: None,
            };
            ResolvedRequirement::from_control(Some("cloud-policy-001"), &control, &assessment)
        })
        .collect();
    ResolvedSet::new(
        SourceKind::Policy,
        Some("cloud-policy-001".into()),
        None,
        requirements,
    )
    .unwrap()
}

fn write_architecture(dir: &Path, urls: &[&str]) {
    fs::create_dir_all(dir).unwrap();
    let requirements: Vec<serde_json::Value> = urls
        .iter()
        .map(|u| serde_json::json!({ "requirement-url": u }))
        .collect();
    let arch = serde_json::json!({
        "nodes": [{
            "unique-id": "api-gateway",
            "controls": { "security": { "requirements": requirements } }
        }]
    });
    fs::write(
        dir.join("payments.arch.json"),
        serde_json::to_string_pretty(&arch).unwrap(),
    )
    .unwrap();
}

#[test]
fn urls_are_extracted_sorted_and_unique() {
    let tmp = tempdir().unwrap();
    write_architecture(tmp.path(), &[TR02, TR01, TR02]);
    fs::write(tmp.path().join("notes.json"), format!("\"{}\"", TR01)).unwrap();
    assert_eq!(
        extract_gemara_urls(tmp.path()).unwrap(),
        vec![TR01.to_string(), TR02.to_string()]
    );
}

#[test]
fn generated_records_satisfy_architecture() {
    let tmp = tempdir().unwrap();
    let arch = tmp.path().join("architecture");
    let controls = tmp.path().join("controls");
    write_architecture(&arch, &[TR01, TR02]);
    artifacts::write_controls(
        &policy_set(),
        &controls.join("cloud-policy-001"),
        &MaterializeOptions::default(),
    )
    .unwrap();

    let report = validate_control_files(&arch, &controls).unwrap();
    assert!(report.is_ok(), "{:?}", report.errors);
    assert_eq!(report.found.len(), 2);
    assert!(report.warnings.is_empty());
}

#[test]
fn missing_record_is_an_error() {
    let tmp = tempdir().unwrap();
    let arch = tmp.path().join("architecture");
    let controls = tmp.path().join("controls");
    write_architecture(
        &arch,
        &[TR01, "gemara://policies/cloud-policy-001/controls/X/requirements/X.TR01"],
    );
    artifacts::write_controls(&policy_set(), &controls, &MaterializeOptions::default()).unwrap();

    let report = validate_control_files(&arch, &controls).unwrap();
    assert!(!report.is_ok());
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("Missing control file for"));
}

#[test]
fn stripped_lineage_and_bad_json_are_reported() {
    let tmp = tempdir().unwrap();
    let arch = tmp.path().join("architecture");
    let controls = tmp.path().join("controls");
    write_architecture(&arch, &[TR01]);
    artifacts::write_controls(&policy_set(), &controls, &MaterializeOptions::default()).unwrap();

    let path = controls.join("ccc-core-cn01-tr01.requirement.json");
    let mut value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    value["metadata"]["gemara"]
        .as_object_mut()
        .unwrap()
        .remove("base-requirement");
    fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();
    fs::write(controls.join("broken.requirement.json"), "{").unwrap();

    let report = validate_control_files(&arch, &controls).unwrap();
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("base-requirement"));
    assert!(report.warnings.iter().any(|w| w.contains("Invalid JSON")));
}

#[test]
fn missing_directories_are_validation_errors() {
    let tmp = tempdir().unwrap();
    let err = validate_control_files(&tmp.path().join("nope"), tmp.path()).unwrap_err();
    assert!(matches!(err, ResolverError::ValidationError(_)));
}
