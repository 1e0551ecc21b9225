//! Resolution pipeline: Fetch → Resolve → Materialize → {Mapping, Pattern} → Write.
//!
//! Every stage is a plain function over the previous stage's output. The
//! drivers here own the only parallel section (control fetch) and tag every
//! failure with the stage it came from.

pub mod artifacts;
pub mod fetch;
pub mod mapping;
pub mod materialize;
pub mod pattern;
pub mod resolve;
pub mod validate;

use crate::core::cancel::FetchContext;
use crate::core::error::{ResolverError, Stage, StageContext, StageError};
use crate::core::model::{Control, ResolvedControl, ResolvedRequirement, ResolvedSet, SourceKind};
use fetch::{PolicySource, require_id};
use rayon::prelude::*;
use resolve::{PlanOrigin, PlannedControl};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub apply_modifications: bool,
    /// Upper bound on concurrent control fetches.
    pub concurrency: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            apply_modifications: false,
            concurrency: 4,
        }
    }
}

/// Fetch every planned control on a bounded pool. Results come back in plan
/// order whatever order the fetches finished in.
fn fetch_controls(
    source: &dyn PolicySource,
    plan: &[PlannedControl],
    concurrency: usize,
    ctx: &FetchContext,
) -> Result<Vec<Result<Control, ResolverError>>, ResolverError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency.max(1))
        .build()
        .map_err(|e| ResolverError::IoError(std::io::Error::other(e.to_string())))?;
    Ok(pool.install(|| {
        plan.par_iter()
            .map(|p| source.fetch_control(&p.control_id, &p.catalog_id, ctx))
            .collect()
    }))
}

/// One requirement per resolved assessment requirement; identity URLs must
/// be unique across the whole set.
pub fn flatten_requirements(
    policy_id: Option<&str>,
    controls: &[ResolvedControl],
) -> Result<Vec<ResolvedRequirement>, ResolverError> {
    let mut seen: FxHashMap<String, String> = FxHashMap::default();
    let mut out = Vec::new();
    for control in controls {
        for assessment in &control.requirements {
            let req = ResolvedRequirement::from_control(policy_id, control, assessment);
            let origin = format!("{}/{}/{}", req.catalog_id, req.control_id, req.requirement_id);
            if let Some(previous) = seen.insert(req.gemara_url.clone(), origin.clone()) {
                return Err(ResolverError::DuplicateUrl {
                    url: req.gemara_url,
                    first: previous,
                    second: origin,
                });
            }
            out.push(req);
        }
    }
    Ok(out)
}

/// Policy path: records are Layer 3 whether or not modifications are applied.
pub fn resolve_policy_run(
    source: &dyn PolicySource,
    policy_id: &str,
    options: &RunOptions,
    ctx: &FetchContext,
) -> Result<ResolvedSet, StageError> {
    let policy = source.fetch_policy(policy_id, ctx).stage(Stage::Fetch)?;
    let plan = resolve::plan_controls(&policy);

    let fetched = fetch_controls(source, &plan, options.concurrency, ctx).stage(Stage::Fetch)?;
    let mut controls = Vec::with_capacity(fetched.len());
    for (planned, result) in plan.iter().zip(fetched) {
        match result {
            Ok(control) => controls.push(control),
            Err(e) if e.is_not_found() && planned.origin == PlanOrigin::Modification => {
                return Err(resolve::dangling(
                    &policy,
                    &planned.catalog_id,
                    "control",
                    &planned.control_id,
                ))
                .stage(Stage::Resolve);
            }
            Err(e) => return Err(e).stage(Stage::Fetch),
        }
    }

    let resolved = resolve::resolve_policy(&policy, &controls, options.apply_modifications)
        .stage(Stage::Resolve)?;
    let requirements = flatten_requirements(Some(policy.id()), &resolved).stage(Stage::Resolve)?;
    ResolvedSet::new(
        SourceKind::Policy,
        Some(policy.id().to_string()),
        None,
        requirements,
    )
    .map_err(ResolverError::from)
    .stage(Stage::Resolve)
}

/// Catalog path: named controls pass through unmodified as Layer 2.
pub fn resolve_catalog_run(
    source: &dyn PolicySource,
    catalog_id: &str,
    control_ids: &[String],
    options: &RunOptions,
    ctx: &FetchContext,
) -> Result<ResolvedSet, StageError> {
    require_id(catalog_id, "catalog id").stage(Stage::Fetch)?;
    let mut plan: Vec<PlannedControl> = Vec::new();
    for control_id in control_ids {
        if !plan.iter().any(|p| &p.control_id == control_id) {
            plan.push(PlannedControl {
                catalog_id: catalog_id.to_string(),
                control_id: control_id.clone(),
                origin: PlanOrigin::Declared,
            });
        }
    }
    if plan.is_empty() {
        return Err(ResolverError::InvalidIdentifier("control ids")).stage(Stage::Fetch);
    }

    let controls = fetch_controls(source, &plan, options.concurrency, ctx)
        .stage(Stage::Fetch)?
        .into_iter()
        .collect::<Result<Vec<Control>, ResolverError>>()
        .stage(Stage::Fetch)?;

    let resolved: Vec<ResolvedControl> = controls.par_iter().map(resolve::passthrough).collect();
    let requirements = flatten_requirements(None, &resolved).stage(Stage::Resolve)?;
    ResolvedSet::new(
        SourceKind::Catalog,
        None,
        Some(catalog_id.to_string()),
        requirements,
    )
    .map_err(ResolverError::from)
    .stage(Stage::Resolve)
}
