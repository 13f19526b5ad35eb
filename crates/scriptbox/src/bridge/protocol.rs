//! Host-call wire format.
//!
//! Request: `{"method": "fs.readText", "args": ["notes.txt"]}`
//! Success: `{"result": <any json>}`
//! Failure: `{"error": "<message>"}`

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved method that routes to the tool table.
pub const TOOL_INVOKE_METHOD: &str = "tools.invoke";

/// A request written by the guest into the bridge input slot.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostCallRequest {
    /// Dotted method name
    #[serde(default)]
    pub method: Option<String>,
    /// Ordered arguments
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Payload of a `tools.invoke` call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    /// Registered tool id
    pub tool_id: String,
    /// Arguments forwarded to the tool
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Response written back into the guest output slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostCallResponse {
    /// Handler result
    Result(Value),
    /// Protocol or handler failure, observable by the script
    Error(String),
}

impl HostCallResponse {
    /// Build an error response.
    pub fn error(message: impl Into<String>) -> Self {
        HostCallResponse::Error(message.into())
    }

    /// Serialize to the wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        match serde_json::to_vec(self) {
            Ok(bytes) => bytes,
            Err(e) => format!(r#"{{"error":"response serialization failed: {}"}}"#, e).into_bytes(),
        }
    }

    /// Whether this is an error response.
    pub fn is_error(&self) -> bool {
        matches!(self, HostCallResponse::Error(_))
    }
}
