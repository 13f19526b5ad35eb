//! Built-in host methods available to every script.

use serde_json::{json, Value};

use super::registry::CallContext;
use crate::error::{Result, SandboxError};
use crate::policy::SandboxPolicy;
use crate::security::FileSystemGuard;

#[cfg(feature = "http")]
use crate::security::{HttpRequest, NetworkGuard};

/// Fixed set of capabilities backed by the security boundary.
#[derive(Debug, Clone)]
pub struct Builtins {
    fs: FileSystemGuard,
    #[cfg(feature = "http")]
    net: NetworkGuard,
}

impl Builtins {
    /// Build the guards from the policy.
    pub fn new(policy: &SandboxPolicy) -> Result<Self> {
        Ok(Self {
            fs: FileSystemGuard::new(policy)?,
            #[cfg(feature = "http")]
            net: NetworkGuard::new(policy)?,
        })
    }

    /// Filesystem guard used by the `fs.*` methods.
    pub fn filesystem(&self) -> &FileSystemGuard {
        &self.fs
    }

    /// Run a built-in. `method` must already be lowercased.
    ///
    /// Returns `None` if no built-in has that name.
    pub async fn call(&self, method: &str, ctx: &CallContext) -> Option<Result<Value>> {
        let result = match method {
            "math.add" => math(ctx, |a, b| Ok(a + b)),
            "math.subtract" => math(ctx, |a, b| Ok(a - b)),
            "math.multiply" => math(ctx, |a, b| Ok(a * b)),
            "math.divide" => math(ctx, |a, b| {
                if b == 0.0 {
                    Err(SandboxError::InvalidArgument("division by zero".to_string()))
                } else {
                    Ok(a / b)
                }
            }),

            "fs.readtext" => self.read_text(ctx).await,
            "fs.writetext" => self.write_text(ctx).await,
            "fs.listdirectory" => self.list_directory(ctx).await,
            "fs.exists" => self.exists(ctx).await,
            "fs.delete" => self.delete(ctx).await,
            "fs.createdirectory" => self.create_directory(ctx).await,

            #[cfg(feature = "http")]
            "http.get" => self.http_get(ctx).await,
            #[cfg(feature = "http")]
            "http.postjson" => self.http_post_json(ctx).await,
            #[cfg(feature = "http")]
            "http.request" => self.http_request(ctx).await,

            _ => return None,
        };
        Some(result)
    }

    async fn read_text(&self, ctx: &CallContext) -> Result<Value> {
        let text = self.fs.read_text(ctx.str_arg(0)?).await?;
        Ok(Value::String(text))
    }

    async fn write_text(&self, ctx: &CallContext) -> Result<Value> {
        let content = match ctx.arg(1) {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        self.fs.write_text(ctx.str_arg(0)?, &content).await?;
        Ok(Value::Null)
    }

    async fn list_directory(&self, ctx: &CallContext) -> Result<Value> {
        let path = match ctx.arg(0) {
            Value::Null => ".",
            _ => ctx.str_arg(0)?,
        };
        let entries = self.fs.list_directory(path).await?;
        serde_json::to_value(entries).map_err(|e| SandboxError::HandlerFailed(e.to_string()))
    }

    async fn exists(&self, ctx: &CallContext) -> Result<Value> {
        Ok(Value::Bool(self.fs.exists(ctx.str_arg(0)?).await?))
    }

    async fn delete(&self, ctx: &CallContext) -> Result<Value> {
        self.fs.delete(ctx.str_arg(0)?).await?;
        Ok(Value::Null)
    }

    async fn create_directory(&self, ctx: &CallContext) -> Result<Value> {
        self.fs.create_directory(ctx.str_arg(0)?).await?;
        Ok(Value::Null)
    }

    #[cfg(feature = "http")]
    async fn http_get(&self, ctx: &CallContext) -> Result<Value> {
        let url = ctx.str_arg(0)?;
        cancellable(ctx, self.net.get(url)).await.map(Value::String)
    }

    #[cfg(feature = "http")]
    async fn http_post_json(&self, ctx: &CallContext) -> Result<Value> {
        let url = ctx.str_arg(0)?;
        cancellable(ctx, self.net.post_json(url, ctx.arg(1)))
            .await
            .map(Value::String)
    }

    #[cfg(feature = "http")]
    async fn http_request(&self, ctx: &CallContext) -> Result<Value> {
        let request: HttpRequest = serde_json::from_value(ctx.arg(0).clone()).map_err(|e| {
            SandboxError::InvalidArgument(format!("http.request: invalid request object: {}", e))
        })?;
        let response = cancellable(ctx, self.net.request(&request)).await?;
        serde_json::to_value(response).map_err(|e| SandboxError::HandlerFailed(e.to_string()))
    }
}

#[cfg(feature = "http")]
async fn cancellable<T>(
    ctx: &CallContext,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(SandboxError::Cancelled),
        out = fut => out,
    }
}

fn math(ctx: &CallContext, op: impl Fn(f64, f64) -> Result<f64>) -> Result<Value> {
    let value = op(ctx.f64_arg(0)?, ctx.f64_arg(1)?)?;
    number(value)
}

/// Integral results go back as JSON integers so scripts see `3`, not `3.0`.
fn number(value: f64) -> Result<Value> {
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        return Ok(json!(value as i64));
    }
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| SandboxError::InvalidArgument(format!("result {} is not a finite number", value)))
}
