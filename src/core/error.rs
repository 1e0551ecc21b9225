use std::fmt;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("Not found: {kind} '{id}'")]
    NotFound { kind: &'static str, id: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Dangling modification in policy '{policy_id}': {kind} target '{target_id}' matches nothing in catalog '{catalog_id}'")]
    DanglingModification {
        policy_id: String,
        catalog_id: String,
        kind: &'static str,
        target_id: String,
    },
    #[error("Duplicate URL {url}: produced by '{first}' and '{second}'")]
    DuplicateUrl {
        url: String,
        first: String,
        second: String,
    },
    #[error("Incomplete record for requirement '{requirement_id}': {reason}")]
    IncompleteRecord {
        requirement_id: String,
        reason: String,
    },
    #[error("Invalid identifier: {0} must not be empty")]
    InvalidIdentifier(&'static str),
    #[error("Run cancelled: {0}")]
    Cancelled(String),
    #[error("File collision at {path}: '{first}' and '{second}'")]
    FileCollision {
        path: String,
        first: String,
        second: String,
    },
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ResolverError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        ResolverError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ResolverError::NotFound { .. })
    }
}

/// Pipeline stage a failure is attributed to on the CLI surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Fetch,
    Resolve,
    Materialize,
    Mapping,
    Pattern,
    Write,
    Validate,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Config => "config",
            Stage::Fetch => "fetch",
            Stage::Resolve => "resolve",
            Stage::Materialize => "materialize",
            Stage::Mapping => "mapping",
            Stage::Pattern => "pattern",
            Stage::Write => "write",
            Stage::Validate => "validate",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("error[{stage}]: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: ResolverError,
}

pub trait StageContext<T> {
    fn stage(self, stage: Stage) -> Result<T, StageError>;
}

impl<T> StageContext<T> for Result<T, ResolverError> {
    fn stage(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|source| StageError { stage, source })
    }
}
