//! Integration tests for artifact generation: records, mapping, pattern and
//! the combined atomic `generate` run.

use gemara_calm::core::cancel::FetchContext;
use gemara_calm::core::config::OutputConfig;
use gemara_calm::core::error::{ResolverError, Stage};
use gemara_calm::core::model::{
    ResolvedAssessment, ResolvedControl, ResolvedRequirement, ResolvedSet, SourceKind,
};
use gemara_calm::pipeline::artifacts;
use gemara_calm::pipeline::fetch::FileSource;
use gemara_calm::pipeline::mapping::MappingLayout;
use gemara_calm::pipeline::materialize::MaterializeOptions;
use gemara_calm::pipeline::{RunOptions, resolve_policy_run};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn cloud_policy() -> ResolvedSet {
    let source =
        FileSource::new(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/gemara"));
    resolve_policy_run(
        &source,
        "cloud-policy-001",
        &RunOptions {
            apply_modifications: true,
            concurrency: 2,
        },
        &FetchContext::new(),
    )
    .unwrap()
}

/// Relative path -> bytes for every file under `root`.
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut out = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                let rel = path.strip_prefix(root).unwrap().to_path_buf();
                out.insert(rel, fs::read(&path).unwrap());
            }
        }
    }
    out
}

fn names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn generate_is_byte_identical_across_runs() {
    let tmp = tempdir().unwrap();
    let first = tmp.path().join("first");
    let second = tmp.path().join("second");
    let config = OutputConfig::default();

    artifacts::generate(&cloud_policy(), &first, &config, None).unwrap();
    artifacts::generate(&cloud_policy(), &second, &config, None).unwrap();

    let a = snapshot(&first);
    let b = snapshot(&second);
    assert_eq!(a.len(), 6);
    assert_eq!(a, b);
    assert!(a.values().all(|bytes| bytes.ends_with(b"\n")));
}

#[test]
fn every_base_reference_url_is_mapped() {
    let tmp = tempdir().unwrap();
    let set = cloud_policy();
    let options = MaterializeOptions::default();
    let layout = MappingLayout {
        controls_dir: "controls/cloud-policy-001".into(),
        base_requirements_dir: "controls/base".into(),
        path_prefix: "../".into(),
    };
    let output = tmp.path().join("mappings/url-mapping.json");
    let mapping = artifacts::write_mapping(&set, &layout, &output, &options).unwrap();

    let records = artifacts::records_for(&set, &options).unwrap();
    for record in &records {
        let base = record.base_reference_url().unwrap();
        assert_eq!(
            mapping.get(base),
            Some(&format!("../controls/base/{}", record.file_name()))
        );
        assert_eq!(
            mapping.get(&record.id),
            Some(&format!("../controls/cloud-policy-001/{}", record.file_name()))
        );
    }

    let on_disk: BTreeMap<String, String> =
        serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(on_disk, mapping);
}

#[test]
fn scope_filter_keeps_only_matching_requirements() {
    let tmp = tempdir().unwrap();
    let set = cloud_policy();
    let scope: BTreeSet<String> = ["payment-processing".to_string()].into();
    let output = tmp.path().join("pattern.json");
    let fragment =
        artifacts::write_pattern(&set, Some(&scope), &output, &MaterializeOptions::default())
            .unwrap();

    assert_eq!(
        fragment.requirement_urls,
        vec![
            "gemara://policies/cloud-policy-001/controls/CCC.Core.CN01/requirements/CCC.Core.CN01.TR01"
                .to_string()
        ]
    );
    let schema: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(
        schema["$defs"]["requirement-url"]["enum"],
        serde_json::json!(fragment.requirement_urls)
    );
    assert_eq!(schema["x-gemara-scope"], serde_json::json!(["payment-processing"]));
}

#[test]
fn controls_gen_writes_one_record_per_requirement() {
    let tmp = tempdir().unwrap();
    let out = tmp.path().join("controls");
    let set = cloud_policy();
    let records =
        artifacts::write_controls(&set, &out, &MaterializeOptions::default()).unwrap();
    assert_eq!(records.len(), set.requirements.len());
    assert_eq!(
        names(&out),
        vec![
            "ccc-core-cn01-tr01.requirement.json",
            "ccc-core-cn01-tr02.requirement.json",
            "ccc-core-cn02-tr01.requirement.json",
        ]
    );
    let raw = fs::read_to_string(out.join("ccc-core-cn01-tr01.requirement.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["metadata"]["gemara"]["layer"], "Layer 3");
    assert_eq!(value["metadata"]["gemara"]["policy-id"], "cloud-policy-001");
}

fn colliding_set() -> ResolvedSet {
    let upper = ResolvedControl {
        id: "C1".into(),
        catalog_id: "CAT".into(),
        title: "Upper".into(),
        objective: String::new(),
        requirements: vec![],
    };
    let lower = ResolvedControl {
        id: "c1".into(),
        ..upper.clone()
    };
    let assessment = |id: &str| ResolvedAssessment {
        id: id.into(),
        text: "t".into(),
        applicability: vec![],
        modified: false,
        name: None,
    };
    let requirements = vec![
        ResolvedRequirement::from_control(Some("p"), &upper, &assessment("C1.TR01")),
        ResolvedRequirement::from_control(Some("p"), &lower, &assessment("c1.tr01")),
    ];
    ResolvedSet::new(SourceKind::Policy, Some("p".into()), None, requirements).unwrap()
}

#[test]
fn failed_generate_leaves_no_partial_output() {
    let tmp = tempdir().unwrap();
    let out = tmp.path().join("out");
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join("keep.txt"), "existing").unwrap();

    let err =
        artifacts::generate(&colliding_set(), &out, &OutputConfig::default(), None).unwrap_err();
    assert_eq!(err.stage, Stage::Mapping);
    assert!(matches!(err.source, ResolverError::FileCollision { .. }));

    assert_eq!(names(&out), vec!["keep.txt"]);
    assert_eq!(names(tmp.path()), vec!["out"]);
}

#[test]
fn blocked_commit_into_existing_dir_changes_nothing() {
    let tmp = tempdir().unwrap();
    let out = tmp.path().join("out");
    let record = out.join("controls/cloud-policy-001/ccc-core-cn01-tr01.requirement.json");
    fs::create_dir_all(record.parent().unwrap()).unwrap();
    fs::write(&record, "previous run").unwrap();
    // A directory squatting on the mapping file's path.
    let squatter = out.join("mappings/cloud-policy-001-url-mapping.json");
    fs::create_dir_all(&squatter).unwrap();
    fs::write(squatter.join("note.txt"), "x").unwrap();
    let before = snapshot(&out);

    let err =
        artifacts::generate(&cloud_policy(), &out, &OutputConfig::default(), None).unwrap_err();
    assert_eq!(err.stage, Stage::Write);

    assert_eq!(snapshot(&out), before);
    assert_eq!(names(&out.join("controls/cloud-policy-001")).len(), 1);
    assert!(!out.join("resolved").exists());
    assert!(!out.join("patterns").exists());
    assert_eq!(names(tmp.path()), vec!["out"]);
}

#[test]
fn commit_over_previous_run_replaces_its_files() {
    let tmp = tempdir().unwrap();
    let out = tmp.path().join("out");
    let record = out.join("controls/cloud-policy-001/ccc-core-cn01-tr01.requirement.json");
    fs::create_dir_all(record.parent().unwrap()).unwrap();
    fs::write(&record, "previous run").unwrap();
    fs::write(out.join("keep.txt"), "existing").unwrap();

    artifacts::generate(&cloud_policy(), &out, &OutputConfig::default(), None).unwrap();

    assert!(fs::read_to_string(&record).unwrap().contains("TLS 1.3"));
    assert_eq!(fs::read_to_string(out.join("keep.txt")).unwrap(), "existing");
    assert_eq!(snapshot(&out).len(), 7);
    assert_eq!(names(tmp.path()), vec!["out"]);
}

#[test]
fn mapping_rejects_urls_sharing_a_record_file() {
    let tmp = tempdir().unwrap();
    let output = tmp.path().join("mappings/url-mapping.json");
    let layout = MappingLayout {
        controls_dir: "controls/p".into(),
        base_requirements_dir: "controls/base".into(),
        path_prefix: "../".into(),
    };
    let err = artifacts::write_mapping(
        &colliding_set(),
        &layout,
        &output,
        &MaterializeOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.stage, Stage::Mapping);
    match err.source {
        ResolverError::FileCollision { path, .. } => {
            assert_eq!(path, "../controls/p/c1-tr01.requirement.json")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!output.exists());
}

#[test]
fn failed_controls_gen_creates_nothing() {
    let tmp = tempdir().unwrap();
    let out = tmp.path().join("controls");
    assert!(
        artifacts::write_controls(&colliding_set(), &out, &MaterializeOptions::default()).is_err()
    );
    assert!(!out.exists());
    assert!(names(tmp.path()).is_empty());
}

#[test]
fn incomplete_lineage_fails_before_writing() {
    let tmp = tempdir().unwrap();
    let out = tmp.path().join("out");
    let mut set = cloud_policy();
    set.requirements[0].base_requirement_url.clear();

    let err = artifacts::generate(&set, &out, &OutputConfig::default(), None).unwrap_err();
    assert_eq!(err.stage, Stage::Materialize);
    assert!(matches!(err.source, ResolverError::IncompleteRecord { .. }));
    assert!(!out.exists());
}
