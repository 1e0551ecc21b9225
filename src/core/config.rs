//! Resolver configuration (`gemara.toml`).
//!
//! Lookup order: explicit `--config` path, `$GEMARA_CONFIG`, `./gemara.toml`.
//! Every section is optional; missing keys fall back to defaults.

use crate::core::error::ResolverError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "gemara.toml";
pub const CONFIG_ENV_VAR: &str = "GEMARA_CONFIG";
pub const DEFAULT_SCHEMA_URL: &str =
    "https://calm.finos.org/release/1.1/meta/control-requirement.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceBackend {
    Files,
    Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceBackend,
    /// Root of the file-backed source (`policies/`, `catalogs/`).
    pub root: PathBuf,
    /// MCP bridge program for the command-backed source.
    pub command: String,
    pub args: Vec<String>,
    /// Memoize documents for the duration of one run.
    pub cache: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            kind: SourceBackend::Files,
            root: PathBuf::from("gemara"),
            command: "gemara-mcp".to_string(),
            args: Vec::new(),
            cache: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    pub concurrency: usize,
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            concurrency: 4,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub controls_dir: String,
    pub base_requirements_dir: String,
    /// Prepended to every mapped location (mapping files live one level down).
    pub path_prefix: String,
    pub schema_url: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            controls_dir: "controls".to_string(),
            base_requirements_dir: "controls/base".to_string(),
            path_prefix: "../".to_string(),
            schema_url: DEFAULT_SCHEMA_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub source: SourceConfig,
    pub fetch: FetchConfig,
    pub output: OutputConfig,
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<(), ResolverError> {
        if self.fetch.concurrency == 0 {
            return Err(ResolverError::ConfigError(
                "fetch.concurrency must be at least 1".to_string(),
            ));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ResolverError::ConfigError(
                "fetch.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.output.controls_dir.trim().is_empty()
            || self.output.base_requirements_dir.trim().is_empty()
        {
            return Err(ResolverError::ConfigError(
                "output directories must not be empty".to_string(),
            ));
        }
        if self.source.kind == SourceBackend::Command && self.source.command.trim().is_empty() {
            return Err(ResolverError::ConfigError(
                "source.command is required when source.kind = \"command\"".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs)
    }
}

pub fn parse_config(content: &str) -> Result<ResolverConfig, ResolverError> {
    let config: ResolverConfig =
        toml::from_str(content).map_err(|e| ResolverError::ConfigError(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Resolve the config file path without reading it.
pub fn locate_config(explicit: Option<&Path>, cwd: &Path) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(from_env) = std::env::var(CONFIG_ENV_VAR)
        && !from_env.trim().is_empty()
    {
        return Some(PathBuf::from(from_env));
    }
    let local = cwd.join(CONFIG_FILE_NAME);
    local.exists().then_some(local)
}

/// Load configuration; defaults when no file is found.
///
/// An explicitly named file that does not exist is an error.
pub fn load_config(explicit: Option<&Path>, cwd: &Path) -> Result<ResolverConfig, ResolverError> {
    let Some(path) = locate_config(explicit, cwd) else {
        return Ok(ResolverConfig::default());
    };
    if !path.exists() {
        return Err(ResolverError::ConfigError(format!(
            "config file not found: {}",
            path.display()
        )));
    }
    let content = fs::read_to_string(&path)?;
    let mut config = parse_config(&content)?;
    // Relative source roots are anchored at the config file's directory.
    if config.source.root.is_relative()
        && let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        config.source.root = parent.join(&config.source.root);
    }
    Ok(config)
}
