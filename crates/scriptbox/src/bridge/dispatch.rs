//! Request parsing and routing for `host.call`.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use super::builtins::Builtins;
use super::protocol::{HostCallRequest, HostCallResponse, ToolInvocation, TOOL_INVOKE_METHOD};
use super::registry::{CallContext, HandlerRegistry};
use crate::error::{Result, SandboxError};

/// Log lines emitted by one run, in order.
///
/// Lines are traced the moment they arrive. The collected list is returned with
/// the run's output, or attached to its [`ScriptError`](crate::ScriptError).
#[derive(Debug, Clone, Default)]
pub struct GuestLog(Arc<Mutex<Vec<String>>>);

impl GuestLog {
    /// Record one line.
    pub fn push(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!(target: "scriptbox::guest", "{}", line);
        if let Ok(mut lines) = self.0.lock() {
            lines.push(line);
        }
    }

    /// Take all recorded lines.
    pub fn take(&self) -> Vec<String> {
        self.0
            .lock()
            .map(|mut lines| std::mem::take(&mut *lines))
            .unwrap_or_default()
    }
}

/// Security violations raised by host calls during one run.
///
/// The script may catch the resulting exception; when it does not, the run's
/// failure is reported as the violation instead of a plain script error.
#[derive(Debug, Clone, Default)]
pub struct ViolationRecord(Arc<Mutex<Vec<String>>>);

impl ViolationRecord {
    /// Record one violation message.
    pub fn record(&self, message: impl Into<String>) {
        if let Ok(mut seen) = self.0.lock() {
            seen.push(message.into());
        }
    }

    /// Most recent violation whose message appears in `text`.
    pub fn cause_of(&self, text: &str) -> Option<String> {
        let seen = self.0.lock().ok()?;
        seen.iter().rev().find(|msg| text.contains(msg.as_str())).cloned()
    }

    /// Number of violations recorded.
    pub fn len(&self) -> usize {
        self.0.lock().map(|seen| seen.len()).unwrap_or_default()
    }

    /// Whether no violation was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Routes host calls to registered handlers and built-ins.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    builtins: Builtins,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(registry: Arc<HandlerRegistry>, builtins: Builtins) -> Self {
        Self { registry, builtins }
    }

    /// The registration table.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Handle one raw request and produce the response to write back.
    ///
    /// Protocol problems are returned as `{"error": ...}` data, never as faults.
    pub async fn dispatch(
        &self,
        payload: &[u8],
        cancel: &CancellationToken,
        log: &GuestLog,
        violations: &ViolationRecord,
    ) -> HostCallResponse {
        let request: HostCallRequest = match serde_json::from_slice(payload) {
            Ok(req) => req,
            Err(e) => {
                tracing::debug!(error = %e, "malformed host call");
                return HostCallResponse::error(format!("Invalid request: {}", e));
            }
        };

        let method = match request.method.as_deref().map(str::trim) {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => return HostCallResponse::error("Missing method"),
        };

        let start = Instant::now();
        let ctx = CallContext::new(method.clone(), request.args, cancel.clone());
        let response = match self.route(&method, ctx, log).await {
            Some(Ok(value)) => HostCallResponse::Result(value),
            Some(Err(SandboxError::SecurityViolation(msg))) => {
                violations.record(msg.clone());
                HostCallResponse::Error(SandboxError::SecurityViolation(msg).to_string())
            }
            Some(Err(e)) => HostCallResponse::Error(e.to_string()),
            None => HostCallResponse::error(format!("Unknown method: {}", method)),
        };

        tracing::debug!(
            method = %method,
            ok = !response.is_error(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "host call"
        );
        response
    }

    async fn route(
        &self,
        method: &str,
        ctx: CallContext,
        log: &GuestLog,
    ) -> Option<Result<Value>> {
        if let Some(handler) = self.registry.method(method) {
            return Some(handler.call(ctx).await);
        }

        let key = method.to_ascii_lowercase();
        match key.as_str() {
            "log" => {
                let line = ctx
                    .args
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                log.push(line);
                Some(Ok(Value::Null))
            }
            TOOL_INVOKE_METHOD => Some(self.invoke_tool(ctx).await),
            _ => self.builtins.call(&key, &ctx).await,
        }
    }

    async fn invoke_tool(&self, ctx: CallContext) -> Result<Value> {
        let invocation: ToolInvocation = serde_json::from_value(ctx.arg(0).clone()).map_err(|e| {
            SandboxError::InvalidArgument(format!(
                "{}: expected {{toolId, args}}: {}",
                TOOL_INVOKE_METHOD, e
            ))
        })?;

        let handler = self.registry.tool(&invocation.tool_id).ok_or_else(|| {
            SandboxError::HandlerFailed(format!("Unknown tool: {}", invocation.tool_id))
        })?;

        tracing::debug!(tool = %invocation.tool_id, "tool invocation");
        handler
            .call(CallContext::new(
                invocation.tool_id,
                invocation.args,
                ctx.cancel.clone(),
            ))
            .await
    }
}
