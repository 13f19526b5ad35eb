//! Handler registration table.
//!
//! Built once when the sandbox is configured and shared read-only by every
//! execution unit. Method names are dotted (`namespace.method`) and matched
//! case-insensitively.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SandboxError};

/// Arguments and cancellation signal handed to a host handler.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Method name as the script sent it
    pub method: String,
    /// Ordered arguments
    pub args: Vec<Value>,
    /// Cancelled when the owning run is abandoned
    pub cancel: CancellationToken,
}

impl CallContext {
    /// Create a context.
    pub fn new(method: impl Into<String>, args: Vec<Value>, cancel: CancellationToken) -> Self {
        Self {
            method: method.into(),
            args,
            cancel,
        }
    }

    /// Argument at `index`, or `null` when absent.
    pub fn arg(&self, index: usize) -> &Value {
        self.args.get(index).unwrap_or(&Value::Null)
    }

    /// String argument at `index`.
    pub fn str_arg(&self, index: usize) -> Result<&str> {
        self.arg(index).as_str().ok_or_else(|| {
            SandboxError::InvalidArgument(format!(
                "{}: argument {} must be a string",
                self.method, index
            ))
        })
    }

    /// Numeric argument at `index`.
    pub fn f64_arg(&self, index: usize) -> Result<f64> {
        self.arg(index).as_f64().ok_or_else(|| {
            SandboxError::InvalidArgument(format!(
                "{}: argument {} must be a number",
                self.method, index
            ))
        })
    }
}

/// A host capability callable from scripts.
#[async_trait]
pub trait HostHandler: Send + Sync {
    /// Handle one call.
    async fn call(&self, ctx: CallContext) -> Result<Value>;
}

type BoxedFn = dyn Fn(CallContext) -> BoxFuture<'static, Result<Value>> + Send + Sync;

/// Adapter turning an async closure into a [`HostHandler`].
pub struct FnHandler(Box<BoxedFn>);

impl FnHandler {
    /// Wrap a closure returning a future.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self(Box::new(move |ctx| Box::pin(f(ctx))))
    }
}

#[async_trait]
impl HostHandler for FnHandler {
    async fn call(&self, ctx: CallContext) -> Result<Value> {
        (self.0)(ctx).await
    }
}

/// Immutable map from method name to handler, plus the tool table and
/// optional bootstrap script.
#[derive(Default)]
pub struct HandlerRegistry {
    methods: HashMap<String, Arc<dyn HostHandler>>,
    tools: HashMap<String, Arc<dyn HostHandler>>,
    bootstrap: Option<String>,
}

impl HandlerRegistry {
    /// Start building a registry.
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// An empty registry (built-ins only).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up a method handler, ignoring case.
    pub fn method(&self, name: &str) -> Option<&Arc<dyn HostHandler>> {
        self.methods.get(&name.to_ascii_lowercase())
    }

    /// Look up a tool handler, ignoring case.
    pub fn tool(&self, id: &str) -> Option<&Arc<dyn HostHandler>> {
        self.tools.get(&id.to_ascii_lowercase())
    }

    /// Bootstrap script prepended before user code.
    pub fn bootstrap(&self) -> Option<&str> {
        self.bootstrap.as_deref()
    }

    /// Registered method names (lowercased).
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether no methods are registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("bootstrap", &self.bootstrap.is_some())
            .finish()
    }
}

/// Builder for [`HandlerRegistry`].
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    inner: HandlerRegistry,
}

impl HandlerRegistryBuilder {
    /// Register a handler under a dotted method name.
    pub fn register(mut self, method: &str, handler: impl HostHandler + 'static) -> Self {
        let key = method.to_ascii_lowercase();
        if self.inner.methods.insert(key, Arc::new(handler)).is_some() {
            tracing::warn!(method, "handler registered twice; keeping the last one");
        }
        self
    }

    /// Register an async closure under a dotted method name.
    pub fn register_fn<F, Fut>(self, method: &str, f: F) -> Self
    where
        F: Fn(CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(method, FnHandler::new(f))
    }

    /// Register a tool reachable through `tools.invoke`.
    pub fn register_tool(mut self, tool_id: &str, handler: impl HostHandler + 'static) -> Self {
        self.inner
            .tools
            .insert(tool_id.to_ascii_lowercase(), Arc::new(handler));
        self
    }

    /// Register an async closure as a tool.
    pub fn register_tool_fn<F, Fut>(self, tool_id: &str, f: F) -> Self
    where
        F: Fn(CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register_tool(tool_id, FnHandler::new(f))
    }

    /// Set bootstrap script text installing guest-side bindings.
    pub fn bootstrap(mut self, source: impl Into<String>) -> Self {
        self.inner.bootstrap = Some(source.into());
        self
    }

    /// Freeze the registry.
    pub fn build(self) -> HandlerRegistry {
        self.inner
    }
}
