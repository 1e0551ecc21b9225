//! Policy Fetcher: the injected capability that supplies Layer 3 policies and
//! Layer 2 controls.
//!
//! Resolution logic only sees [`PolicySource`]. Adapters:
//! - [`FileSource`]: `policies/{id}.json` and `catalogs/{catalog}.json` under a root
//! - [`CommandSource`]: an MCP bridge subprocess, one JSON request per call
//! - [`MemorySource`]: in-process documents
//! - [`CachedSource`]: memoizes another source for one run

use crate::core::cancel::FetchContext;
use crate::core::config::{SourceBackend, SourceConfig};
use crate::core::error::ResolverError;
use crate::core::model::{Catalog, Control, Policy};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

pub const TOOL_GET_POLICY: &str = "get_layer3_policy";
pub const TOOL_GET_CONTROL: &str = "get_layer2_control";

pub trait PolicySource: Send + Sync {
    fn fetch_policy(&self, policy_id: &str, ctx: &FetchContext) -> Result<Policy, ResolverError>;

    fn fetch_control(
        &self,
        control_id: &str,
        catalog_id: &str,
        ctx: &FetchContext,
    ) -> Result<Control, ResolverError>;
}

impl<S: PolicySource + ?Sized> PolicySource for Box<S> {
    fn fetch_policy(&self, policy_id: &str, ctx: &FetchContext) -> Result<Policy, ResolverError> {
        (**self).fetch_policy(policy_id, ctx)
    }

    fn fetch_control(
        &self,
        control_id: &str,
        catalog_id: &str,
        ctx: &FetchContext,
    ) -> Result<Control, ResolverError> {
        (**self).fetch_control(control_id, catalog_id, ctx)
    }
}

/// Identifiers are opaque; the only check made here is non-emptiness.
pub fn require_id(value: &str, what: &'static str) -> Result<(), ResolverError> {
    if value.trim().is_empty() {
        return Err(ResolverError::InvalidIdentifier(what));
    }
    Ok(())
}

/// Reject a policy document answering for a different id.
fn bind_policy(policy: Policy, policy_id: &str) -> Result<Policy, ResolverError> {
    if policy.id() != policy_id {
        return Err(ResolverError::Transport(format!(
            "policy '{}' was requested but the document declares id '{}'",
            policy_id,
            policy.id()
        )));
    }
    Ok(policy)
}

/// Fill in a missing catalog id and reject a control filed under another catalog.
fn bind_catalog(mut control: Control, catalog_id: &str) -> Result<Control, ResolverError> {
    if control.catalog_id.is_empty() {
        control.catalog_id = catalog_id.to_string();
    } else if control.catalog_id != catalog_id {
        return Err(ResolverError::Transport(format!(
            "control '{}' was requested from catalog '{}' but declares catalog '{}'",
            control.id, catalog_id, control.catalog_id
        )));
    }
    Ok(control)
}

// --- file-backed ---------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileSource { root: root.into() }
    }

    pub fn policy_path(&self, policy_id: &str) -> PathBuf {
        self.root.join("policies").join(format!("{}.json", policy_id))
    }

    pub fn catalog_path(&self, catalog_id: &str) -> PathBuf {
        self.root.join("catalogs").join(format!("{}.json", catalog_id))
    }

    fn read_document<T: for<'de> Deserialize<'de>>(
        path: &Path,
        kind: &'static str,
        id: &str,
    ) -> Result<T, ResolverError> {
        if id.contains(['/', '\\']) || id == ".." || !path.is_file() {
            return Err(ResolverError::not_found(kind, id));
        }
        let content = fs::read_to_string(path).map_err(|e| {
            ResolverError::Transport(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ResolverError::Transport(format!("malformed {} document {}: {}", kind, path.display(), e))
        })
    }
}

impl PolicySource for FileSource {
    fn fetch_policy(&self, policy_id: &str, ctx: &FetchContext) -> Result<Policy, ResolverError> {
        require_id(policy_id, "policy id")?;
        ctx.check(&format!("policy '{}'", policy_id))?;
        let policy: Policy =
            Self::read_document(&self.policy_path(policy_id), "policy", policy_id)?;
        bind_policy(policy, policy_id)
    }

    fn fetch_control(
        &self,
        control_id: &str,
        catalog_id: &str,
        ctx: &FetchContext,
    ) -> Result<Control, ResolverError> {
        require_id(control_id, "control id")?;
        require_id(catalog_id, "catalog id")?;
        ctx.check(&format!("control '{}/{}'", catalog_id, control_id))?;
        let catalog: Catalog =
            Self::read_document(&self.catalog_path(catalog_id), "catalog", catalog_id)?;
        let control = catalog
            .controls
            .into_iter()
            .find(|c| c.id == control_id)
            .ok_or_else(|| {
                ResolverError::not_found("control", format!("{}/{}", catalog_id, control_id))
            })?;
        bind_catalog(control, catalog_id)
    }
}

// --- MCP bridge subprocess -------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BridgeError {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    #[serde(default)]
    result: Option<JsonValue>,
    #[serde(default)]
    error: Option<BridgeError>,
}

/// Runs `program args...` once per fetch, writes
/// `{"tool": ..., "arguments": {...}}` to its stdin and reads
/// `{"result": ...}` or `{"error": {"code", "message"}}` from its stdout.
#[derive(Debug, Clone)]
pub struct CommandSource {
    program: String,
    args: Vec<String>,
}

const POLL_INTERVAL: Duration = Duration::from_millis(10);

impl CommandSource {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        CommandSource {
            program: program.into(),
            args,
        }
    }

    fn call(
        &self,
        tool: &str,
        arguments: JsonValue,
        kind: &'static str,
        id: &str,
        ctx: &FetchContext,
    ) -> Result<JsonValue, ResolverError> {
        let what = format!("{} '{}'", kind, id);
        ctx.check(&what)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ResolverError::Transport(format!("failed to start {}: {}", self.program, e))
            })?;

        let request = serde_json::json!({ "tool": tool, "arguments": arguments });
        if let Some(mut stdin) = child.stdin.take() {
            // A bridge that exits before reading surfaces below as a bad exit.
            let _ = stdin.write_all(request.to_string().as_bytes());
        }

        let stdout_reader = child.stdout.take().map(|mut out| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = out.read_to_string(&mut buf);
                buf
            })
        });
        let stderr_reader = child.stderr.take().map(|mut err| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = err.read_to_string(&mut buf);
                buf
            })
        });

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if let Err(e) = ctx.check(&what) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stdout = stdout_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        let response: BridgeResponse = match serde_json::from_str(stdout.trim()) {
            Ok(r) => r,
            Err(e) if status.success() => {
                return Err(ResolverError::Transport(format!(
                    "{} returned malformed response for {}: {}",
                    self.program, what, e
                )));
            }
            Err(_) => {
                return Err(ResolverError::Transport(format!(
                    "{} exited with {}: {}",
                    self.program,
                    status,
                    stderr.trim()
                )));
            }
        };

        if let Some(err) = response.error {
            return Err(match err.code.as_str() {
                "not_found" => ResolverError::not_found(kind, id),
                _ => ResolverError::Transport(format!(
                    "{} failed for {}: {} ({})",
                    tool, what, err.message, err.code
                )),
            });
        }
        response.result.ok_or_else(|| {
            ResolverError::Transport(format!("{} returned no result for {}", tool, what))
        })
    }
}

impl PolicySource for CommandSource {
    fn fetch_policy(&self, policy_id: &str, ctx: &FetchContext) -> Result<Policy, ResolverError> {
        require_id(policy_id, "policy id")?;
        let value = self.call(
            TOOL_GET_POLICY,
            serde_json::json!({ "policy_id": policy_id }),
            "policy",
            policy_id,
            ctx,
        )?;
        let policy: Policy = serde_json::from_value(value).map_err(|e| {
            ResolverError::Transport(format!("malformed policy '{}': {}", policy_id, e))
        })?;
        bind_policy(policy, policy_id)
    }

    fn fetch_control(
        &self,
        control_id: &str,
        catalog_id: &str,
        ctx: &FetchContext,
    ) -> Result<Control, ResolverError> {
        require_id(control_id, "control id")?;
        require_id(catalog_id, "catalog id")?;
        let id = format!("{}/{}", catalog_id, control_id);
        let value = self.call(
            TOOL_GET_CONTROL,
            serde_json::json!({ "control_id": control_id, "catalog_id": catalog_id }),
            "control",
            &id,
            ctx,
        )?;
        let control: Control = serde_json::from_value(value)
            .map_err(|e| ResolverError::Transport(format!("malformed control '{}': {}", id, e)))?;
        if control.id != control_id {
            return Err(ResolverError::Transport(format!(
                "control '{}' was requested but the bridge returned '{}'",
                id, control.id
            )));
        }
        bind_catalog(control, catalog_id)
    }
}

// --- in-process ------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    policies: FxHashMap<String, Policy>,
    controls: FxHashMap<(String, String), Control>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policies.insert(policy.id().to_string(), policy);
        self
    }

    pub fn with_control(mut self, catalog_id: &str, mut control: Control) -> Self {
        control.catalog_id = catalog_id.to_string();
        self.controls
            .insert((catalog_id.to_string(), control.id.clone()), control);
        self
    }

    pub fn with_catalog(self, catalog: Catalog) -> Self {
        let catalog_id = catalog.metadata.id.clone();
        catalog
            .controls
            .into_iter()
            .fold(self, |src, control| src.with_control(&catalog_id, control))
    }
}

impl PolicySource for MemorySource {
    fn fetch_policy(&self, policy_id: &str, ctx: &FetchContext) -> Result<Policy, ResolverError> {
        require_id(policy_id, "policy id")?;
        ctx.check(&format!("policy '{}'", policy_id))?;
        self.policies
            .get(policy_id)
            .cloned()
            .ok_or_else(|| ResolverError::not_found("policy", policy_id))
    }

    fn fetch_control(
        &self,
        control_id: &str,
        catalog_id: &str,
        ctx: &FetchContext,
    ) -> Result<Control, ResolverError> {
        require_id(control_id, "control id")?;
        require_id(catalog_id, "catalog id")?;
        ctx.check(&format!("control '{}/{}'", catalog_id, control_id))?;
        self.controls
            .get(&(catalog_id.to_string(), control_id.to_string()))
            .cloned()
            .ok_or_else(|| {
                ResolverError::not_found("control", format!("{}/{}", catalog_id, control_id))
            })
    }
}

// --- per-run cache ---------------------------------------------------------------

/// Memoizes successful fetches; failures are never cached.
pub struct CachedSource<S> {
    inner: S,
    policies: Mutex<FxHashMap<String, Policy>>,
    controls: Mutex<FxHashMap<(String, String), Control>>,
}

impl<S: PolicySource> CachedSource<S> {
    pub fn new(inner: S) -> Self {
        CachedSource {
            inner,
            policies: Mutex::new(FxHashMap::default()),
            controls: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: PolicySource> PolicySource for CachedSource<S> {
    fn fetch_policy(&self, policy_id: &str, ctx: &FetchContext) -> Result<Policy, ResolverError> {
        if let Some(hit) = self
            .policies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(policy_id)
        {
            return Ok(hit.clone());
        }
        let policy = self.inner.fetch_policy(policy_id, ctx)?;
        self.policies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(policy_id.to_string(), policy.clone());
        Ok(policy)
    }

    fn fetch_control(
        &self,
        control_id: &str,
        catalog_id: &str,
        ctx: &FetchContext,
    ) -> Result<Control, ResolverError> {
        let key = (catalog_id.to_string(), control_id.to_string());
        if let Some(hit) = self
            .controls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return Ok(hit.clone());
        }
        let control = self.inner.fetch_control(control_id, catalog_id, ctx)?;
        self.controls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, control.clone());
        Ok(control)
    }
}

/// Build the configured source.
pub fn build_source(config: &SourceConfig) -> Box<dyn PolicySource> {
    match (config.kind, config.cache) {
        (SourceBackend::Files, true) => Box::new(CachedSource::new(FileSource::new(&config.root))),
        (SourceBackend::Files, false) => Box::new(FileSource::new(&config.root)),
        (SourceBackend::Command, true) => Box::new(CachedSource::new(CommandSource::new(
            config.command.clone(),
            config.args.clone(),
        ))),
        (SourceBackend::Command, false) => Box::new(CommandSource::new(
            config.command.clone(),
            config.args.clone(),
        )),
    }
}
