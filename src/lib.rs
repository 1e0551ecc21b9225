//! gemara-calm: Gemara policy resolution for CALM architectures.
//!
//! Takes a Gemara Layer 3 policy, fetches the Layer 2 controls it references,
//! applies the policy's modifications and emits:
//!
//! - one CALM control requirement record per assessment requirement
//! - a `gemara://` URL → record location mapping
//! - a closed-world JSON Schema pattern fragment enumerating the allowed
//!   requirement URLs
//!
//! # Pipeline
//!
//! ```text
//! Fetch → Resolve → Materialize → {Mapping, Pattern} → Write
//! ```
//!
//! Policy documents come from an injected [`pipeline::fetch::PolicySource`].
//! Every stage returns `Result<_, ResolverError>`; the CLI tags failures with
//! their [`core::error::Stage`] and writes nothing unless every stage
//! succeeded.
//!
//! # Examples
//!
//! ```bash
//! gemara-calm resolve --policy cloud-policy-001 --apply-modifications \
//!     --output resolved/cloud-policy-001.resolved.json
//! gemara-calm controls-gen --resolved resolved/cloud-policy-001.resolved.json \
//!     --output-dir controls/cloud-policy-001
//! gemara-calm pattern-gen --resolved resolved/cloud-policy-001.resolved.json \
//!     --output patterns/cloud-policy-001.pattern.json --scope payment-processing
//! gemara-calm validate --architecture-dir architecture --controls-dir controls
//! ```

pub mod core;
pub mod pipeline;

mod cli;

use crate::cli::{
    Cli, Command, ControlsGenCli, GenerateCli, MappingGenCli, PatternGenCli, ResolveCli,
    ValidateCli,
};
use crate::core::cancel::FetchContext;
use crate::core::config::{self, ResolverConfig, SourceBackend};
use crate::core::error::{ResolverError, Stage, StageContext, StageError};
use crate::core::model::ResolvedSet;
use crate::core::output::{self, OutputFormat, Reporter, compact_line, preview_messages};
use crate::pipeline::artifacts;
use crate::pipeline::fetch::build_source;
use crate::pipeline::mapping::MappingLayout;
use crate::pipeline::materialize::MaterializeOptions;
use crate::pipeline::{RunOptions, resolve_catalog_run, resolve_policy_run, validate};

use clap::Parser;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

struct Session {
    config: ResolverConfig,
    reporter: Reporter,
}

impl Session {
    fn fetch_context(&self) -> FetchContext {
        FetchContext::with_timeout(self.config.timeout())
    }

    fn run_options(&self, apply_modifications: bool) -> RunOptions {
        RunOptions {
            apply_modifications,
            concurrency: self.config.fetch.concurrency,
        }
    }

    fn materialize_options(&self) -> MaterializeOptions {
        MaterializeOptions {
            schema_url: self.config.output.schema_url.clone(),
        }
    }
}

fn scope_filter(tags: Vec<String>) -> Option<BTreeSet<String>> {
    if tags.is_empty() {
        None
    } else {
        Some(tags.into_iter().collect())
    }
}

fn describe_set(set: &ResolvedSet) -> serde_json::Value {
    serde_json::json!({
        "source": set.source,
        "layer": set.layer(),
        "policy_id": set.policy_id,
        "catalog_id": set.catalog_id,
        "digest": set.digest,
        "requirements": set.requirements.len(),
    })
}

fn report_modified(reporter: &Reporter, set: &ResolvedSet) {
    for req in set.requirements.iter().filter(|r| r.modified) {
        reporter.ok(&format!(
            "{} {}",
            req.requirement_id,
            compact_line(&req.text, 80)
        ));
    }
}

fn run_resolve(session: &Session, args: ResolveCli) -> Result<(), StageError> {
    let source = build_source(&session.config.source);
    let ctx = session.fetch_context();
    let options = session.run_options(args.apply_modifications);

    let set = match (args.policy, args.catalog) {
        (Some(policy), _) => {
            session
                .reporter
                .step(&format!("Resolving policy {}", policy));
            resolve_policy_run(&*source, &policy, &options, &ctx)?
        }
        (None, Some(catalog)) => {
            session.reporter.step(&format!(
                "Resolving {} control(s) from catalog {}",
                args.controls.len(),
                catalog
            ));
            resolve_catalog_run(&*source, &catalog, &args.controls, &options, &ctx)?
        }
        (None, None) => {
            return Err(ResolverError::InvalidIdentifier("policy or catalog id"))
                .stage(Stage::Config);
        }
    };
    report_modified(&session.reporter, &set);

    let output = args.output.unwrap_or_else(|| {
        Path::new("resolved").join(format!("{}.resolved.json", artifacts::set_slug(&set)))
    });
    artifacts::write_resolved(&output, &set).stage(Stage::Write)?;

    session.reporter.finish(
        "resolve",
        &format!(
            "Resolved {} requirement(s) ({}) -> {}",
            set.requirements.len(),
            set.layer(),
            output.display()
        ),
        serde_json::json!({ "resolved": describe_set(&set), "output": output }),
    );
    Ok(())
}

fn run_pattern_gen(session: &Session, args: PatternGenCli) -> Result<(), StageError> {
    let set = artifacts::read_resolved(&args.resolved).stage(Stage::Pattern)?;
    let scope = scope_filter(args.scope);
    let fragment = artifacts::write_pattern(
        &set,
        scope.as_ref(),
        &args.output,
        &session.materialize_options(),
    )?;
    session.reporter.finish(
        "pattern-gen",
        &format!(
            "Pattern fragment allows {} requirement URL(s) -> {}",
            fragment.requirement_urls.len(),
            args.output.display()
        ),
        serde_json::json!({
            "output": args.output,
            "requirement_urls": fragment.requirement_urls,
            "scope": fragment.scope,
        }),
    );
    Ok(())
}

fn run_controls_gen(session: &Session, args: ControlsGenCli) -> Result<(), StageError> {
    let set = artifacts::read_resolved(&args.resolved).stage(Stage::Materialize)?;
    let records =
        artifacts::write_controls(&set, &args.output_dir, &session.materialize_options())?;
    for record in &records {
        session
            .reporter
            .ok(&format!("{} {}", record.file_name(), record.id));
    }
    session.reporter.finish(
        "controls-gen",
        &format!(
            "Wrote {} {} record(s) -> {}",
            records.len(),
            set.layer(),
            args.output_dir.display()
        ),
        serde_json::json!({
            "output_dir": args.output_dir,
            "records": records.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
        }),
    );
    Ok(())
}

fn run_mapping_gen(session: &Session, args: MappingGenCli) -> Result<(), StageError> {
    let set = artifacts::read_resolved(&args.resolved).stage(Stage::Mapping)?;
    let layout = MappingLayout {
        controls_dir: args.control_files_dir,
        base_requirements_dir: args
            .base_requirements_dir
            .unwrap_or_else(|| session.config.output.base_requirements_dir.clone()),
        path_prefix: session.config.output.path_prefix.clone(),
    };
    let mapping =
        artifacts::write_mapping(&set, &layout, &args.output, &session.materialize_options())?;
    session.reporter.finish(
        "mapping-gen",
        &format!(
            "Mapped {} URL(s) -> {}",
            mapping.len(),
            args.output.display()
        ),
        serde_json::json!({ "output": args.output, "entries": mapping.len() }),
    );
    Ok(())
}

fn run_generate(session: &Session, args: GenerateCli) -> Result<(), StageError> {
    let source = build_source(&session.config.source);
    let ctx = session.fetch_context();
    session
        .reporter
        .step(&format!("Resolving policy {}", args.policy));
    let set = resolve_policy_run(
        &*source,
        &args.policy,
        &session.run_options(args.apply_modifications),
        &ctx,
    )?;
    report_modified(&session.reporter, &set);

    let scope = scope_filter(args.scope);
    session
        .reporter
        .step(&format!("Writing artifacts to {}", args.output_dir.display()));
    let summary = artifacts::generate(
        &set,
        &args.output_dir,
        &session.config.output,
        scope.as_ref(),
    )?;
    session.reporter.finish(
        "generate",
        &format!(
            "Generated {} record(s), {} mapping entries, {} allowed URL(s) -> {}",
            summary.records,
            summary.mapping_entries,
            summary.pattern_urls,
            summary.root.display()
        ),
        serde_json::json!({
            "resolved": describe_set(&set),
            "output_dir": summary.root,
            "files": summary.files,
        }),
    );
    Ok(())
}

fn run_validate(session: &Session, args: ValidateCli) -> Result<(), StageError> {
    session.reporter.step(&format!(
        "Validating {} against {}",
        args.architecture_dir.display(),
        args.controls_dir.display()
    ));
    let report = validate::validate_control_files(&args.architecture_dir, &args.controls_dir)
        .stage(Stage::Validate)?;
    for (url, file) in &report.found {
        session
            .reporter
            .ok(&format!("{} -> {}", url, file.display()));
    }
    for warning in &report.warnings {
        session.reporter.warn(warning);
    }
    for error in &report.errors {
        session.reporter.fail(error);
    }
    if !report.is_ok() {
        return Err(ResolverError::ValidationError(format!(
            "{} referenced URL(s) failed validation: {}",
            report.errors.len(),
            preview_messages(&report.errors, 3, 160)
        )))
        .stage(Stage::Validate);
    }
    session.reporter.finish(
        "validate",
        &format!(
            "All {} referenced URL(s) have conforming control files ({} warning(s))",
            report.found.len(),
            report.warnings.len()
        ),
        serde_json::json!({
            "found": report.found,
            "warnings": report.warnings,
        }),
    );
    Ok(())
}

fn load_session(
    config_path: Option<PathBuf>,
    source_root: Option<PathBuf>,
    reporter: Reporter,
) -> Result<Session, StageError> {
    let cwd = std::env::current_dir()
        .map_err(ResolverError::from)
        .stage(Stage::Config)?;
    let mut config = config::load_config(config_path.as_deref(), &cwd).stage(Stage::Config)?;
    if let Some(root) = source_root {
        config.source.kind = SourceBackend::Files;
        config.source.root = root;
    }
    Ok(Session { config, reporter })
}

fn dispatch(cli: Cli, format: OutputFormat) -> Result<(), StageError> {
    let reporter = Reporter::new(format, cli.quiet);
    let session = load_session(cli.config, cli.source_root, reporter)?;
    match cli.command {
        Command::Resolve(args) => run_resolve(&session, args),
        Command::PatternGen(args) => run_pattern_gen(&session, args),
        Command::ControlsGen(args) => run_controls_gen(&session, args),
        Command::MappingGen(args) => run_mapping_gen(&session, args),
        Command::Generate(args) => run_generate(&session, args),
        Command::Validate(args) => run_validate(&session, args),
    }
}

/// Parse arguments, run one command and report a failure on stderr.
pub fn run() -> Result<(), StageError> {
    let cli = Cli::parse();
    let cmd = cli.command.name();
    match OutputFormat::parse(&cli.format) {
        Some(format) => dispatch(cli, format).inspect_err(|e| {
            output::report_error(format, cmd, e.stage.as_str(), &e.to_string())
        }),
        None => Err(ResolverError::ConfigError(format!(
            "unknown output format '{}' (expected 'text' or 'json')",
            cli.format
        )))
        .stage(Stage::Config)
        .inspect_err(|e| {
            output::report_error(OutputFormat::Text, cmd, e.stage.as_str(), &e.to_string())
        }),
    }
}
