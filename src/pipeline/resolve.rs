//! Modification Resolver.
//!
//! Pure functions over an already-fetched policy and its controls. Precedence
//! rules:
//! - only control-references whose `reference-id` equals the control's catalog
//!   contribute modifications
//! - among several modifications with the same target, the last one in
//!   document order wins (references in order, then entries in order)
//! - present override fields replace base values outright; absent fields keep
//!   the base value. Text and applicability are independent of each other.
//! - a modification target that matches nothing fetched is an error

use crate::core::error::ResolverError;
use crate::core::model::{
    AssessmentRequirementModification, Control, ControlModification, Policy, ResolvedAssessment,
    ResolvedControl,
};
use rayon::prelude::*;
use rustc_hash::FxHashSet;

/// Why a control is part of a policy's scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOrigin {
    /// Listed in `control-ids`.
    Declared,
    /// Only reachable through a control-modification target.
    Modification,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedControl {
    pub catalog_id: String,
    pub control_id: String,
    pub origin: PlanOrigin,
}

/// Controls to fetch for `policy`, in document order, de-duplicated by
/// (catalog, control). Declared controls come before modification targets of
/// the same reference.
pub fn plan_controls(policy: &Policy) -> Vec<PlannedControl> {
    let mut plan: Vec<PlannedControl> = Vec::new();
    for reference in &policy.control_references {
        let declared = reference
            .control_ids
            .iter()
            .map(|id| (id, PlanOrigin::Declared));
        let modified = reference
            .control_modifications
            .iter()
            .map(|m| (&m.target_id, PlanOrigin::Modification));

        for (control_id, origin) in declared.chain(modified) {
            match plan
                .iter_mut()
                .find(|p| p.catalog_id == reference.reference_id && &p.control_id == control_id)
            {
                Some(existing) => {
                    if origin == PlanOrigin::Declared {
                        existing.origin = PlanOrigin::Declared;
                    }
                }
                None => plan.push(PlannedControl {
                    catalog_id: reference.reference_id.clone(),
                    control_id: control_id.clone(),
                    origin,
                }),
            }
        }
    }
    plan
}

pub fn effective_control_modification<'a>(
    policy: &'a Policy,
    catalog_id: &str,
    control_id: &str,
) -> Option<&'a ControlModification> {
    policy
        .control_references
        .iter()
        .filter(|r| r.reference_id == catalog_id)
        .flat_map(|r| r.control_modifications.iter())
        .filter(|m| m.target_id == control_id)
        .last()
}

pub fn effective_requirement_modification<'a>(
    policy: &'a Policy,
    catalog_id: &str,
    requirement_id: &str,
) -> Option<&'a AssessmentRequirementModification> {
    policy
        .control_references
        .iter()
        .filter(|r| r.reference_id == catalog_id)
        .flat_map(|r| r.assessment_requirement_modifications.iter())
        .filter(|m| m.target_id == requirement_id)
        .last()
}

/// Base control with no modifications applied.
pub fn passthrough(control: &Control) -> ResolvedControl {
    ResolvedControl {
        id: control.id.clone(),
        catalog_id: control.catalog_id.clone(),
        title: control.title.clone(),
        objective: control.objective.clone(),
        requirements: control
            .assessment_requirements
            .iter()
            .map(|r| ResolvedAssessment {
                id: r.id.clone(),
                text: r.text.clone(),
                applicability: r.applicability.clone(),
                modified: false,
                name: None,
            })
            .collect(),
    }
}

/// Apply the policy's effective modifications to one control.
pub fn resolve_control(policy: &Policy, control: &Control) -> ResolvedControl {
    let mut resolved = passthrough(control);

    if let Some(modification) =
        effective_control_modification(policy, &control.catalog_id, &control.id)
    {
        if let Some(title) = &modification.title {
            resolved.title = title.clone();
        }
        if let Some(objective) = &modification.objective {
            resolved.objective = objective.clone();
        }
    }

    for requirement in &mut resolved.requirements {
        let Some(modification) =
            effective_requirement_modification(policy, &control.catalog_id, &requirement.id)
        else {
            continue;
        };
        if let Some(text) = &modification.text {
            requirement.text = text.clone();
        }
        if let Some(applicability) = &modification.applicability {
            requirement.applicability = applicability.clone();
        }
        requirement.name = modification.name.clone();
        requirement.modified = true;
    }

    resolved
}

/// Every modification must target a fetched control / requirement of its
/// reference's catalog. Reports the first offender in document order.
pub fn check_dangling(policy: &Policy, controls: &[Control]) -> Result<(), ResolverError> {
    for reference in &policy.control_references {
        let catalog = reference.reference_id.as_str();
        let in_catalog: Vec<&Control> = controls
            .iter()
            .filter(|c| c.catalog_id == catalog)
            .collect();

        for modification in &reference.control_modifications {
            if !in_catalog.iter().any(|c| c.id == modification.target_id) {
                return Err(dangling(policy, catalog, "control", &modification.target_id));
            }
        }

        let requirement_ids: FxHashSet<&str> = in_catalog
            .iter()
            .flat_map(|c| c.assessment_requirements.iter())
            .map(|r| r.id.as_str())
            .collect();
        for modification in &reference.assessment_requirement_modifications {
            if !requirement_ids.contains(modification.target_id.as_str()) {
                return Err(dangling(
                    policy,
                    catalog,
                    "assessment-requirement",
                    &modification.target_id,
                ));
            }
        }
    }
    Ok(())
}

pub(crate) fn dangling(
    policy: &Policy,
    catalog_id: &str,
    kind: &'static str,
    target_id: &str,
) -> ResolverError {
    ResolverError::DanglingModification {
        policy_id: policy.id().to_string(),
        catalog_id: catalog_id.to_string(),
        kind,
        target_id: target_id.to_string(),
    }
}

/// Resolve every fetched control of `policy`. Output order follows `controls`.
///
/// Dangling modifications are rejected even when `apply_modifications` is
/// off: the policy and the catalog disagree either way.
pub fn resolve_policy(
    policy: &Policy,
    controls: &[Control],
    apply_modifications: bool,
) -> Result<Vec<ResolvedControl>, ResolverError> {
    check_dangling(policy, controls)?;
    let resolved: Vec<ResolvedControl> = if apply_modifications {
        controls
            .par_iter()
            .map(|c| resolve_control(policy, c))
            .collect()
    } else {
        controls.par_iter().map(passthrough).collect()
    };
    Ok(resolved)
}
