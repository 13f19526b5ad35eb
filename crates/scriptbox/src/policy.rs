//! Sandbox policy: the immutable security and resource configuration of one
//! sandbox instance.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, SandboxError};

/// Filesystem operation named in a consent request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FsOperation {
    /// Read a file as text
    ReadText,
    /// Write text to a file
    WriteText,
    /// List directory entries
    ListDirectory,
    /// Check whether a path exists
    Exists,
    /// Delete a file or directory tree
    Delete,
    /// Create a directory tree
    CreateDirectory,
}

impl fmt::Display for FsOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FsOperation::ReadText => "read",
            FsOperation::WriteText => "write",
            FsOperation::ListDirectory => "list",
            FsOperation::Exists => "exists",
            FsOperation::Delete => "delete",
            FsOperation::CreateDirectory => "mkdir",
        };
        f.write_str(s)
    }
}

/// Host-supplied override that may approve an otherwise denied filesystem access.
///
/// Receives the path exactly as the script supplied it.
#[derive(Clone)]
pub struct FsConsent(Arc<dyn Fn(&Path, FsOperation) -> bool + Send + Sync>);

impl FsConsent {
    /// Wrap a consent callback.
    pub fn new(f: impl Fn(&Path, FsOperation) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Ask the callback.
    pub fn approves(&self, path: &Path, op: FsOperation) -> bool {
        (self.0)(path, op)
    }
}

impl fmt::Debug for FsConsent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FsConsent(..)")
    }
}

/// Host-supplied override that may approve a request to a non-allowlisted host.
///
/// Receives the full request URL.
#[derive(Clone)]
pub struct NetworkConsent(Arc<dyn Fn(&str) -> bool + Send + Sync>);

impl NetworkConsent {
    /// Wrap a consent callback.
    pub fn new(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Ask the callback.
    pub fn approves(&self, url: &str) -> bool {
        (self.0)(url)
    }
}

impl fmt::Debug for NetworkConsent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NetworkConsent(..)")
    }
}

/// Security and resource policy for a sandbox.
///
/// Following the deny-by-default model, scripts get no filesystem access outside
/// `sandbox_root` and, once `allowed_domains` is non-empty, no network access
/// outside the listed domains.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxPolicy {
    /// Directory all script filesystem paths are resolved against
    pub sandbox_root: PathBuf,

    /// Default execution deadline in milliseconds (0 or negative = unbounded)
    pub default_timeout_ms: i64,

    /// Hosts scripts may reach; subdomains match. Empty = any host.
    pub allowed_domains: Vec<String>,

    /// Maximum network response body in bytes
    pub max_response_bytes: usize,

    /// Per-request network timeout in milliseconds
    pub request_timeout_ms: u64,

    /// Script sources evaluated before user code on every run
    pub startup_scripts: Vec<String>,

    /// Filesystem consent callback
    #[serde(skip)]
    pub fs_consent: Option<FsConsent>,

    /// Network consent callback
    #[serde(skip)]
    pub network_consent: Option<NetworkConsent>,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            sandbox_root: PathBuf::from("sandbox"),
            default_timeout_ms: 30_000,
            allowed_domains: Vec::new(),
            max_response_bytes: 10 * 1024 * 1024, // 10 MB
            request_timeout_ms: 30_000,
            startup_scripts: Vec::new(),
            fs_consent: None,
            network_consent: None,
        }
    }
}

impl SandboxPolicy {
    /// Create a policy rooted at the given directory.
    pub fn new(sandbox_root: impl Into<PathBuf>) -> Self {
        Self {
            sandbox_root: sandbox_root.into(),
            ..Default::default()
        }
    }

    /// Load a policy from a JSON file. Callbacks must be attached afterwards.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let policy: Self = serde_json::from_str(&text).map_err(|e| {
            SandboxError::Config(format!("invalid policy file {}: {}", path.display(), e))
        })?;
        policy.validate()?;
        Ok(policy)
    }

    /// Check the policy for values that can never work.
    pub fn validate(&self) -> Result<()> {
        if self.sandbox_root.as_os_str().is_empty() {
            return Err(SandboxError::Config("sandbox root is empty".to_string()));
        }
        if self.max_response_bytes == 0 {
            return Err(SandboxError::Config(
                "max_response_bytes must be greater than zero".to_string(),
            ));
        }
        for domain in &self.allowed_domains {
            let d = domain.trim();
            if d.is_empty() || d.contains('/') || d.contains(':') || d.starts_with('.') {
                return Err(SandboxError::Config(format!(
                    "invalid allowlist entry '{}': expected a bare host name",
                    domain
                )));
            }
        }
        Ok(())
    }

    /// Resolve the deadline for one run.
    ///
    /// The per-call override wins over the default; zero or negative disables the bound.
    pub fn effective_timeout(&self, override_ms: Option<i64>) -> Option<Duration> {
        let ms = override_ms.unwrap_or(self.default_timeout_ms);
        (ms > 0).then(|| Duration::from_millis(ms as u64))
    }

    /// Network request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Builder: set the default execution timeout (ms)
    pub fn timeout_ms(mut self, ms: i64) -> Self {
        self.default_timeout_ms = ms;
        self
    }

    /// Builder: allow a domain (and its subdomains)
    pub fn allow_domain(mut self, domain: impl Into<String>) -> Self {
        self.allowed_domains.push(domain.into());
        self
    }

    /// Builder: set the response size cap
    pub fn max_response_bytes(mut self, bytes: usize) -> Self {
        self.max_response_bytes = bytes;
        self
    }

    /// Builder: set the network request timeout (ms)
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    /// Builder: add a startup script
    pub fn startup_script(mut self, source: impl Into<String>) -> Self {
        self.startup_scripts.push(source.into());
        self
    }

    /// Builder: set the filesystem consent callback
    pub fn fs_consent(
        mut self,
        f: impl Fn(&Path, FsOperation) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.fs_consent = Some(FsConsent::new(f));
        self
    }

    /// Builder: set the network consent callback
    pub fn network_consent(mut self, f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.network_consent = Some(NetworkConsent::new(f));
        self
    }
}
