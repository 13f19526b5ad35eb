//! Error types for the scriptbox crate.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::wasm::{selftest, EvalStatus};

/// Sandbox error type
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Invalid sandbox policy or engine configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Guest module does not provide a required export
    #[error("guest module is missing required export '{0}'")]
    MissingExport(String),

    /// Engine, module or instantiation fault reported by wasmtime
    #[error("WASM sandbox error: {0}")]
    Wasm(String),

    /// Script source does not fit in the guest script buffer
    #[error("script is {len} bytes but the guest script buffer holds {capacity}")]
    ScriptTooLarge {
        /// Script length in bytes
        len: usize,
        /// Resolved buffer capacity in bytes
        capacity: usize,
    },

    /// Failure while locating, writing or reading a guest buffer
    #[error("buffer error during {stage}: {message}")]
    Buffer {
        /// Which exchange step failed
        stage: BufferStage,
        /// Details
        message: String,
    },

    /// The guest reported a failure while evaluating the script
    #[error("{0}")]
    Execution(ScriptError),

    /// Run exceeded its deadline; the guest may still be running in the background
    #[error("script execution timed out after {}ms", limit.as_millis())]
    Timeout {
        /// The effective deadline
        limit: Duration,
    },

    /// Filesystem or network request rejected by the sandbox policy
    #[error("security violation: {0}")]
    SecurityViolation(String),

    /// Host-call arguments did not match what the handler expects
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Network response body exceeded the configured cap
    #[error("response exceeded the maximum size of {limit} bytes")]
    ResponseTooLarge {
        /// Configured cap in bytes
        limit: usize,
    },

    /// Outbound HTTP failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// Host call was cancelled because its run was abandoned
    #[error("host call cancelled")]
    Cancelled,

    /// A registered handler failed
    #[error("{0}")]
    HandlerFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Whether this is a filesystem/network policy rejection.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, SandboxError::SecurityViolation(_))
    }

    /// Whether the supervisor gave up waiting on the run.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SandboxError::Timeout { .. })
    }

    /// The guest-side failure, if this is an execution error.
    pub fn script_error(&self) -> Option<&ScriptError> {
        match self {
            SandboxError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for SandboxError {
    fn from(e: reqwest::Error) -> Self {
        // A rejected redirect hop surfaces as the policy's own error in the source chain.
        let mut source = std::error::Error::source(&e);
        while let Some(inner) = source {
            if let Some(SandboxError::SecurityViolation(msg)) = inner.downcast_ref::<SandboxError>() {
                return SandboxError::SecurityViolation(msg.clone());
            }
            source = inner.source();
        }
        SandboxError::Http(e.to_string())
    }
}

/// Step of the buffer exchange that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStage {
    /// Resolving the script input region
    ResolveScript,
    /// Copying the script into guest memory
    WriteScript,
    /// Reading the result region
    ReadResult,
    /// Reading the error region
    ReadError,
}

impl fmt::Display for BufferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BufferStage::ResolveScript => "script buffer resolution",
            BufferStage::WriteScript => "script write",
            BufferStage::ReadResult => "result read",
            BufferStage::ReadError => "error read",
        };
        f.write_str(s)
    }
}

/// Classification of a guest-side failure, derived from the status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptErrorKind {
    /// The script threw
    Exception,
    /// Interpreter runtime or context could not be created
    RuntimeInit,
    /// Host bridge bindings could not be installed
    BridgeInstall,
    /// Guest could not allocate its source copy
    Allocation,
    /// Evaluation succeeded but the value could not be stringified
    ResultConversion,
    /// Null source pointer
    InvalidInput,
    /// Status code this host does not know
    Unknown,
}

/// A failure reported by the guest evaluation core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptError {
    /// Failure class
    pub kind: ScriptErrorKind,
    /// Raw guest status code
    pub status: i32,
    /// Exception or failure message
    pub message: String,
    /// JavaScript stack trace, when the thrown value carried one
    pub stack: Option<String>,
    /// Log lines the script emitted before failing
    #[serde(default)]
    pub logs: Vec<String>,
}

const EXCEPTION_PREFIX: &str = "Exception: ";
const STACK_MARKER: &str = "\nStack: ";

impl ScriptError {
    /// Build from the guest status code and the raw error buffer text.
    pub fn from_guest(status: i32, raw: &str) -> Self {
        let kind = match EvalStatus::from_code(status) {
            Some(EvalStatus::Exception) => ScriptErrorKind::Exception,
            Some(EvalStatus::RuntimeCreation) | Some(EvalStatus::ContextCreation) => {
                ScriptErrorKind::RuntimeInit
            }
            Some(EvalStatus::BridgeInstall) => ScriptErrorKind::BridgeInstall,
            Some(EvalStatus::BufferAllocation) => ScriptErrorKind::Allocation,
            Some(EvalStatus::ResultConversion) => ScriptErrorKind::ResultConversion,
            Some(EvalStatus::NullInput) => ScriptErrorKind::InvalidInput,
            Some(EvalStatus::Success) | None => ScriptErrorKind::Unknown,
        };

        let body = raw.strip_prefix(EXCEPTION_PREFIX).unwrap_or(raw);
        let (message, stack) = match body.split_once(STACK_MARKER) {
            Some((message, stack)) => (message.to_string(), Some(stack.to_string())),
            None => (body.to_string(), None),
        };

        Self {
            kind,
            status,
            message,
            stack,
            logs: Vec::new(),
        }
    }

    /// Build from a `quickjs_selftest` failure code and its diagnostic text.
    pub fn from_selftest(status: i32, raw: &str) -> Self {
        let kind = match status {
            selftest::RUNTIME | selftest::CONTEXT => ScriptErrorKind::RuntimeInit,
            selftest::EVAL => ScriptErrorKind::Exception,
            _ => ScriptErrorKind::Unknown,
        };
        Self {
            kind,
            status,
            message: raw.to_string(),
            stack: None,
            logs: Vec::new(),
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "script failed (status {}): {}", self.status, self.message)
    }
}

impl std::error::Error for ScriptError {}

/// Result type alias for sandbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;
