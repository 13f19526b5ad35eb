//! `ScriptBox` facade and builder.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::bridge::{Builtins, Dispatcher, HandlerRegistry, PRELUDE};
use crate::error::{Result, SandboxError};
use crate::policy::SandboxPolicy;
use crate::supervisor;
use crate::wasm::{BridgeContext, GuestModule, ScriptOutput, WasmConfig, WasmSandbox};

/// Runs untrusted scripts, one fresh execution unit per call.
///
/// Cheap to clone; clones share the compiled module, policy and handlers, so
/// one `ScriptBox` can serve many concurrent runs.
#[derive(Clone)]
pub struct ScriptBox {
    engine: WasmSandbox,
    module: GuestModule,
    policy: Arc<SandboxPolicy>,
    dispatcher: Arc<Dispatcher>,
}

impl ScriptBox {
    /// Create a new builder
    pub fn builder() -> ScriptBoxBuilder {
        ScriptBoxBuilder::new()
    }

    /// Get the sandbox policy
    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// Get the compiled guest module
    pub fn module(&self) -> &GuestModule {
        &self.module
    }

    /// Get the handler registration table
    pub fn registry(&self) -> &HandlerRegistry {
        self.dispatcher.registry()
    }

    /// Run a script under the policy's default deadline.
    ///
    /// The script body is wrapped in a function, so `return V` sets the result.
    pub async fn run(&self, source: &str) -> Result<ScriptOutput> {
        self.run_with_timeout(source, None).await
    }

    /// Run a script with an explicit deadline override in milliseconds.
    ///
    /// `None` uses the policy default; zero or negative disables the deadline.
    /// On timeout the unit keeps running in the background until the script
    /// finishes on its own.
    pub async fn run_with_timeout(
        &self,
        source: &str,
        timeout_ms: Option<i64>,
    ) -> Result<ScriptOutput> {
        let limit = self.policy.effective_timeout(timeout_ms);
        let composed = self.compose(source);
        let cancel = CancellationToken::new();
        let bridge = BridgeContext::new(self.dispatcher.clone(), Handle::current(), cancel.clone());

        tracing::debug!(
            module = %self.module.name(),
            script_len = source.len(),
            timeout_ms = limit.map(|d| d.as_millis() as u64),
            "starting run"
        );

        let engine = self.engine.clone();
        let module = self.module.clone();
        supervisor::run_with_deadline(limit, cancel, move || {
            let unit = engine.create_unit(&module, bridge)?;
            unit.run(&composed)
        })
        .await
    }

    /// Run the guest's interpreter self-test in a fresh unit.
    pub async fn self_test(&self) -> Result<String> {
        let limit = self.policy.effective_timeout(None);
        let cancel = CancellationToken::new();
        let bridge = BridgeContext::new(self.dispatcher.clone(), Handle::current(), cancel.clone());

        let engine = self.engine.clone();
        let module = self.module.clone();
        supervisor::run_with_deadline(limit, cancel, move || {
            engine.create_unit(&module, bridge)?.self_test()
        })
        .await
    }

    /// Full source evaluated by the guest: prelude, startup scripts,
    /// registry bootstrap, then the user script as a function body.
    pub fn compose(&self, user: &str) -> String {
        let startup: usize = self.policy.startup_scripts.iter().map(|s| s.len() + 2).sum();
        let bootstrap = self.dispatcher.registry().bootstrap();
        let mut source = String::with_capacity(
            PRELUDE.len() + startup + bootstrap.map_or(0, str::len) + user.len() + 32,
        );

        source.push_str(PRELUDE);
        source.push('\n');
        for script in &self.policy.startup_scripts {
            source.push_str(script);
            source.push_str(";\n");
        }
        if let Some(bootstrap) = bootstrap {
            source.push_str(bootstrap);
            source.push_str(";\n");
        }
        source.push_str("(function () {\n");
        source.push_str(user);
        source.push_str("\n})();");
        source
    }
}

impl std::fmt::Debug for ScriptBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptBox")
            .field("module", &self.module.name())
            .field("policy", &self.policy)
            .field("registry", self.dispatcher.registry())
            .finish()
    }
}

enum ModuleSource {
    Path(PathBuf),
    Bytes { name: String, bytes: Vec<u8> },
}

/// Builder for [`ScriptBox`]
pub struct ScriptBoxBuilder {
    module: Option<ModuleSource>,
    policy: SandboxPolicy,
    wasm_config: WasmConfig,
    registry: HandlerRegistry,
}

impl ScriptBoxBuilder {
    /// Create a new builder with the default policy and engine configuration
    pub fn new() -> Self {
        Self {
            module: None,
            policy: SandboxPolicy::default(),
            wasm_config: WasmConfig::default(),
            registry: HandlerRegistry::empty(),
        }
    }

    /// Load the guest module from a file
    pub fn module_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.module = Some(ModuleSource::Path(path.into()));
        self
    }

    /// Load the guest module from memory (binary or text format)
    pub fn module_bytes(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.module = Some(ModuleSource::Bytes {
            name: name.into(),
            bytes: bytes.into(),
        });
        self
    }

    /// Set the sandbox policy
    pub fn policy(mut self, policy: SandboxPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the WASM engine configuration
    pub fn wasm_config(mut self, config: WasmConfig) -> Self {
        self.wasm_config = config;
        self
    }

    /// Set the handler registration table
    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Compile the module, validate its exports and freeze the configuration.
    pub fn build(self) -> Result<ScriptBox> {
        self.policy.validate()?;
        let source = self
            .module
            .ok_or_else(|| SandboxError::Config("guest module is required".to_string()))?;

        let engine = WasmSandbox::new(self.wasm_config)?;
        let module = match source {
            ModuleSource::Path(path) => engine.load_module(path)?,
            ModuleSource::Bytes { name, bytes } => engine.load_module_bytes(&name, &bytes)?,
        };
        module.validate()?;

        let builtins = Builtins::new(&self.policy)?;
        tracing::info!(
            module = %module.name(),
            sandbox_root = %builtins.filesystem().root().display(),
            handlers = self.registry.len(),
            "script box ready"
        );

        Ok(ScriptBox {
            engine,
            module,
            policy: Arc::new(self.policy),
            dispatcher: Arc::new(Dispatcher::new(Arc::new(self.registry), builtins)),
        })
    }
}

impl Default for ScriptBoxBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ECHO_GUEST: &str = r#"
        (module
          (memory (export "memory") 4)
          (global $rlen (mut i32) (i32.const 0))
          (func (export "get_script_buffer_ptr") (result i32) (i32.const 65536))
          (func (export "get_script_buffer_len") (result i32) (i32.const 65536))
          (func (export "get_result_ptr") (result i32) (i32.const 131072))
          (func (export "get_result_len") (result i32) (global.get $rlen))
          (func (export "get_last_error_ptr") (result i32) (i32.const 0))
          (func (export "get_last_error_len") (result i32) (i32.const 0))
          (func (export "eval") (param $ptr i32) (param $len i32) (result i32)
            (memory.copy (i32.const 131072) (local.get $ptr) (local.get $len))
            (global.set $rlen (local.get $len))
            (i32.const 0)))
    "#;

    fn echo_box(dir: &std::path::Path, registry: HandlerRegistry) -> ScriptBox {
        ScriptBox::builder()
            .module_bytes("echo", ECHO_GUEST)
            .policy(SandboxPolicy::new(dir).startup_script("var started = true"))
            .registry(registry)
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_module() {
        let err = ScriptBox::builder().build().unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));
    }

    #[test]
    fn test_build_rejects_module_without_eval() {
        let dir = tempfile::tempdir().unwrap();
        let err = ScriptBox::builder()
            .module_bytes("bare", r#"(module (memory (export "memory") 1))"#)
            .policy(SandboxPolicy::new(dir.path()))
            .build()
            .unwrap_err();
        assert!(matches!(err, SandboxError::MissingExport(ref name) if name == "eval"));
    }

    #[test]
    fn test_compose_order() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = echo_box(
            dir.path(),
            HandlerRegistry::builder().bootstrap("var boot = 1").build(),
        );

        let source = sandbox.compose("return 1+1");
        let prelude = source.find("var scriptbox").unwrap();
        let startup = source.find("var started = true;").unwrap();
        let boot = source.find("var boot = 1;").unwrap();
        let user = source.find("(function () {\nreturn 1+1\n})();").unwrap();
        assert!(prelude < startup && startup < boot && boot < user);
        assert!(source.ends_with("})();"));
    }

    #[tokio::test]
    async fn test_run_echoes_composed_source() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = echo_box(dir.path(), HandlerRegistry::empty());

        let output = sandbox.run("return 'hi'").await.unwrap();
        assert_eq!(output.value, sandbox.compose("return 'hi'"));
        assert!(output.logs.is_empty());
    }
}
