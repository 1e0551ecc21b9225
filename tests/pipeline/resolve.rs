//! Integration tests for policy and catalog resolution through the driver.

use gemara_calm::core::cancel::FetchContext;
use gemara_calm::core::error::{ResolverError, Stage};
use gemara_calm::core::model::{
    AssessmentRequirement, AssessmentRequirementModification, Control, ControlModification,
    ControlReference, Layer, Policy, PolicyMetadata, SourceKind,
};
use gemara_calm::pipeline::fetch::{FileSource, MemorySource};
use gemara_calm::pipeline::materialize::{MaterializeOptions, materialize_all};
use gemara_calm::pipeline::{RunOptions, resolve_catalog_run, resolve_policy_run};
use std::path::PathBuf;

const CATALOG: &str = "FINOS-CCC";

fn fixtures() -> FileSource {
    FileSource::new(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/gemara"))
}

fn apply() -> RunOptions {
    RunOptions {
        apply_modifications: true,
        concurrency: 4,
    }
}

fn control(id: &str, requirements: &[&str]) -> Control {
    Control {
        id: id.to_string(),
        catalog_id: CATALOG.to_string(),
        title: format!("{} base title", id),
        objective: format!("{} base objective", id),
        assessment_requirements: requirements
            .iter()
            .map(|r| AssessmentRequirement {
                id: r.to_string(),
                text: format!("{} base text", r),
                applicability: vec!["default".to_string()],
            })
            .collect(),
    }
}

fn policy(id: &str, references: Vec<ControlReference>) -> Policy {
    Policy {
        metadata: PolicyMetadata {
            id: id.to_string(),
            title: None,
            version: None,
        },
        control_references: references,
    }
}

fn reference(control_ids: &[&str]) -> ControlReference {
    ControlReference {
        reference_id: CATALOG.to_string(),
        control_ids: control_ids.iter().map(|c| c.to_string()).collect(),
        control_modifications: vec![],
        assessment_requirement_modifications: vec![],
    }
}

fn title_mod(target: &str, title: &str, objective: &str) -> ControlModification {
    ControlModification {
        target_id: target.to_string(),
        modification_type: Some("enhancement".to_string()),
        title: Some(title.to_string()),
        objective: Some(objective.to_string()),
    }
}

fn text_mod(target: &str, text: &str) -> AssessmentRequirementModification {
    AssessmentRequirementModification {
        target_id: target.to_string(),
        modification_type: Some("enhancement".to_string()),
        text: Some(text.to_string()),
        applicability: None,
        name: None,
    }
}

#[test]
fn cloud_policy_example_produces_layer3_record() {
    let set = resolve_policy_run(
        &fixtures(),
        "cloud-policy-001",
        &apply(),
        &FetchContext::new(),
    )
    .unwrap();
    assert_eq!(set.source, SourceKind::Policy);
    assert!(set.verify_digest().unwrap());

    let records = materialize_all(set.layer(), &set.requirements, &MaterializeOptions::default())
        .unwrap();
    let record = records
        .iter()
        .find(|r| r.requirement_id() == "CCC.Core.CN01.TR01")
        .unwrap();
    assert_eq!(
        record.id,
        "gemara://policies/cloud-policy-001/controls/CCC.Core.CN01/requirements/CCC.Core.CN01.TR01"
    );
    assert_eq!(
        record.description,
        "All HTTPS communications MUST use TLS 1.3 or higher"
    );
    assert_eq!(record.layer(), Layer::Layer3);
    assert_eq!(
        record.base_reference_url(),
        Some("gemara://controls/FINOS-CCC/CCC.Core.CN01/requirements/CCC.Core.CN01.TR01")
    );
    assert_eq!(
        record.name,
        "Enhanced Encryption in Transit - CCC.Core.CN01.TR01"
    );
}

#[test]
fn description_is_override_or_base_text() {
    let set = resolve_policy_run(
        &fixtures(),
        "cloud-policy-001",
        &apply(),
        &FetchContext::new(),
    )
    .unwrap();
    let by_id = |id: &str| {
        set.requirements
            .iter()
            .find(|r| r.requirement_id == id)
            .unwrap()
            .clone()
    };
    // overridden
    assert!(by_id("CCC.Core.CN01.TR01").modified);
    // untouched
    let untouched = by_id("CCC.Core.CN01.TR02");
    assert!(!untouched.modified);
    assert_eq!(untouched.text, "SSH connections MUST use SSHv2");
    // applicability-only override keeps base text
    let at_rest = by_id("CCC.Core.CN02.TR01");
    assert_eq!(at_rest.text, "Stored data MUST be encrypted");
    assert_eq!(at_rest.applicability, vec!["retail".to_string()]);
}

#[test]
fn last_declared_control_modification_wins() {
    let mut first = reference(&["C1"]);
    first.control_modifications.push(title_mod("C1", "A", "a"));
    first.control_modifications.push(title_mod("C1", "B", "b"));
    let mut second = reference(&[]);
    second.control_modifications.push(title_mod("C1", "C", "c"));

    let source = MemorySource::new()
        .with_policy(policy("p-abc", vec![first, second]))
        .with_control(CATALOG, control("C1", &["C1.TR01"]));
    let set = resolve_policy_run(&source, "p-abc", &apply(), &FetchContext::new()).unwrap();
    assert_eq!(set.requirements.len(), 1);
    assert_eq!(set.requirements[0].control_title, "C");
    assert_eq!(set.requirements[0].control_objective, "c");
}

#[test]
fn last_declared_requirement_modification_wins() {
    let mut r = reference(&["C1"]);
    r.assessment_requirement_modifications
        .push(text_mod("C1.TR01", "A"));
    r.assessment_requirement_modifications
        .push(text_mod("C1.TR01", "B"));
    r.assessment_requirement_modifications
        .push(text_mod("C1.TR01", "C"));
    let source = MemorySource::new()
        .with_policy(policy("p", vec![r]))
        .with_control(CATALOG, control("C1", &["C1.TR01"]));
    let set = resolve_policy_run(&source, "p", &apply(), &FetchContext::new()).unwrap();
    assert_eq!(set.requirements[0].text, "C");
}

#[test]
fn without_modifications_records_stay_layer3_with_base_text() {
    let set = resolve_policy_run(
        &fixtures(),
        "cloud-policy-001",
        &RunOptions::default(),
        &FetchContext::new(),
    )
    .unwrap();
    assert_eq!(set.layer(), Layer::Layer3);
    let tr01 = set
        .requirements
        .iter()
        .find(|r| r.requirement_id == "CCC.Core.CN01.TR01")
        .unwrap();
    assert_eq!(tr01.text, "Encrypt data in transit");
    assert!(set.requirements.iter().all(|r| !r.modified));
}

#[test]
fn catalog_path_declares_layer2_and_skips_duplicates() {
    let ids = vec![
        "CCC.Core.CN03".to_string(),
        "CCC.Core.CN01".to_string(),
        "CCC.Core.CN03".to_string(),
    ];
    let set = resolve_catalog_run(
        &fixtures(),
        CATALOG,
        &ids,
        &RunOptions::default(),
        &FetchContext::new(),
    )
    .unwrap();
    assert_eq!(set.layer(), Layer::Layer2);
    assert_eq!(set.catalog_id.as_deref(), Some(CATALOG));
    let order: Vec<&str> = set
        .requirements
        .iter()
        .map(|r| r.requirement_id.as_str())
        .collect();
    assert_eq!(
        order,
        vec!["CCC.Core.CN03.TR01", "CCC.Core.CN01.TR01", "CCC.Core.CN01.TR02"]
    );
    assert!(set.requirements.iter().all(|r| r.gemara_url == r.base_requirement_url));
}

#[test]
fn catalog_path_requires_controls() {
    let err = resolve_catalog_run(
        &fixtures(),
        CATALOG,
        &[],
        &RunOptions::default(),
        &FetchContext::new(),
    )
    .unwrap_err();
    assert_eq!(err.stage, Stage::Fetch);
    assert!(matches!(err.source, ResolverError::InvalidIdentifier(_)));
}

#[test]
fn dangling_requirement_target_fails_in_resolve_stage() {
    let err = resolve_policy_run(
        &fixtures(),
        "dangling-policy",
        &apply(),
        &FetchContext::new(),
    )
    .unwrap_err();
    assert_eq!(err.stage, Stage::Resolve);
    assert!(err.to_string().starts_with("error[resolve]:"));
    assert!(err.to_string().contains("CCC.Core.CN01.TR99"));
}

#[test]
fn missing_modification_only_control_is_dangling() {
    let mut r = reference(&["C1"]);
    r.control_modifications.push(title_mod("C9", "x", "y"));
    let source = MemorySource::new()
        .with_policy(policy("p", vec![r]))
        .with_control(CATALOG, control("C1", &["C1.TR01"]));
    let err = resolve_policy_run(&source, "p", &apply(), &FetchContext::new()).unwrap_err();
    assert_eq!(err.stage, Stage::Resolve);
    assert!(matches!(
        err.source,
        ResolverError::DanglingModification { kind: "control", .. }
    ));
}

#[test]
fn missing_declared_control_is_not_found() {
    let source = MemorySource::new()
        .with_policy(policy("p", vec![reference(&["C1", "C2"])]))
        .with_control(CATALOG, control("C1", &["C1.TR01"]));
    let err = resolve_policy_run(&source, "p", &apply(), &FetchContext::new()).unwrap_err();
    assert_eq!(err.stage, Stage::Fetch);
    assert!(err.source.is_not_found());
}

#[test]
fn missing_policy_is_fetch_not_found() {
    let err = resolve_policy_run(
        &MemorySource::new(),
        "nope",
        &apply(),
        &FetchContext::new(),
    )
    .unwrap_err();
    assert_eq!(err.stage, Stage::Fetch);
    assert!(err.source.is_not_found());
}

#[test]
fn policy_scoped_urls_are_unique_and_order_is_stable_across_pool_sizes() {
    let ids: Vec<String> = (1..=24).map(|i| format!("C{:02}", i)).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let mut source = MemorySource::new().with_policy(policy("wide", vec![reference(&id_refs)]));
    for id in &ids {
        let reqs = [format!("{}.TR01", id), format!("{}.TR02", id)];
        let req_refs: Vec<&str> = reqs.iter().map(String::as_str).collect();
        source = source.with_control(CATALOG, control(id, &req_refs));
    }

    let serial = resolve_policy_run(
        &source,
        "wide",
        &RunOptions {
            apply_modifications: true,
            concurrency: 1,
        },
        &FetchContext::new(),
    )
    .unwrap();
    let parallel = resolve_policy_run(
        &source,
        "wide",
        &RunOptions {
            apply_modifications: true,
            concurrency: 8,
        },
        &FetchContext::new(),
    )
    .unwrap();

    assert_eq!(serial, parallel);
    assert_eq!(serial.requirements.len(), 48);
    let mut urls: Vec<&str> = serial
        .requirements
        .iter()
        .map(|r| r.gemara_url.as_str())
        .collect();
    urls.sort();
    urls.dedup();
    assert_eq!(urls.len(), 48);
}
