//! CLI struct definitions for the gemara-calm command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "gemara-calm",
    version = env!("CARGO_PKG_VERSION"),
    about = "Resolve Gemara Layer 3 policies against their Layer 2 catalogs and emit CALM control requirements, URL mappings and pattern fragments."
)]
pub(crate) struct Cli {
    /// Path to gemara.toml (default: $GEMARA_CONFIG, then ./gemara.toml).
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
    /// Read policies and catalogs from this directory instead of the configured source.
    #[clap(long, global = true)]
    pub source_root: Option<PathBuf>,
    /// Output format: 'text' or 'json'.
    #[clap(long, global = true, default_value = "text")]
    pub format: String,
    /// Suppress progress lines.
    #[clap(long, short = 'q', global = true)]
    pub quiet: bool,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(clap::Args, Debug)]
#[clap(group(
    clap::ArgGroup::new("input")
        .required(true)
        .args(["policy", "catalog"])
))]
pub(crate) struct ResolveCli {
    /// Layer 3 policy id to resolve.
    #[clap(long)]
    pub policy: Option<String>,
    /// Layer 2 catalog id; pass-through resolution of the named controls.
    #[clap(long, requires = "controls")]
    pub catalog: Option<String>,
    /// Control id within --catalog (repeatable).
    #[clap(long = "control", conflicts_with = "policy")]
    pub controls: Vec<String>,
    /// Apply the policy's control and assessment-requirement modifications.
    #[clap(long, conflicts_with = "catalog")]
    pub apply_modifications: bool,
    /// Resolved set path (default: resolved/<id>.resolved.json).
    #[clap(long)]
    pub output: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct PatternGenCli {
    #[clap(long)]
    pub resolved: PathBuf,
    #[clap(long)]
    pub output: PathBuf,
    /// Keep only requirements whose applicability contains one of these tags (repeatable).
    #[clap(long)]
    pub scope: Vec<String>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ControlsGenCli {
    #[clap(long)]
    pub resolved: PathBuf,
    #[clap(long)]
    pub output_dir: PathBuf,
}

#[derive(clap::Args, Debug)]
pub(crate) struct MappingGenCli {
    #[clap(long)]
    pub resolved: PathBuf,
    /// Directory the records were written to, as referenced from the mapping file.
    #[clap(long)]
    pub control_files_dir: String,
    /// Directory of Layer 2 base records (default: output.base_requirements_dir).
    #[clap(long)]
    pub base_requirements_dir: Option<String>,
    #[clap(long)]
    pub output: PathBuf,
}

#[derive(clap::Args, Debug)]
pub(crate) struct GenerateCli {
    #[clap(long)]
    pub policy: String,
    #[clap(long, default_value = "generated")]
    pub output_dir: PathBuf,
    #[clap(long)]
    pub apply_modifications: bool,
    #[clap(long)]
    pub scope: Vec<String>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ValidateCli {
    /// Directory of CALM architectures (*.arch.json).
    #[clap(long, default_value = "architecture")]
    pub architecture_dir: PathBuf,
    /// Directory of control requirement records (*.requirement.json).
    #[clap(long, default_value = "controls")]
    pub controls_dir: PathBuf,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Fetch a policy (or catalog controls) and write the resolved requirement set
    #[clap(name = "resolve")]
    Resolve(ResolveCli),

    /// Write a closed-world pattern fragment from a resolved set
    #[clap(name = "pattern-gen")]
    PatternGen(PatternGenCli),

    /// Write one control requirement record per resolved requirement
    #[clap(name = "controls-gen")]
    ControlsGen(ControlsGenCli),

    /// Write the gemara:// URL to record location mapping
    #[clap(name = "mapping-gen")]
    MappingGen(MappingGenCli),

    /// Resolve a policy and write every artifact in one atomic step
    #[clap(name = "generate")]
    Generate(GenerateCli),

    /// Check that every gemara:// URL in the architectures has a conforming record
    #[clap(name = "validate")]
    Validate(ValidateCli),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Resolve(_) => "resolve",
            Command::PatternGen(_) => "pattern-gen",
            Command::ControlsGen(_) => "controls-gen",
            Command::MappingGen(_) => "mapping-gen",
            Command::Generate(_) => "generate",
            Command::Validate(_) => "validate",
        }
    }
}
