//! WASM runtime implementation using wasmtime.
//!
//! Uses wasmtime-wasi preview1 so guests compiled for `wasm32-wasip1` link
//! (no preopened directories, environment or network are granted).

use super::buffers;
use super::config::WasmConfig;
use super::host_functions::HostBridgeFunctions;
use super::status::{selftest, EvalStatus};
use crate::bridge::{Dispatcher, GuestLog, HostCallResponse, ViolationRecord};
use crate::error::{Result, SandboxError, ScriptError};

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use wasmtime::*;

/// Evaluation export name.
pub const EVAL_EXPORT: &str = "eval";

/// Evaluation export name used by older guest builds.
pub const LEGACY_EVAL_EXPORT: &str = "eval_js";

/// Optional diagnostics export.
pub const SELFTEST_EXPORT: &str = "quickjs_selftest";

/// Per-run bridge wiring: where host calls are dispatched and how they block.
#[derive(Clone)]
pub struct BridgeContext {
    dispatcher: Arc<Dispatcher>,
    runtime: Handle,
    cancel: CancellationToken,
    log: GuestLog,
    violations: ViolationRecord,
}

impl BridgeContext {
    /// Create bridge wiring for one run.
    ///
    /// `runtime` drives async handlers; the unit must run on a thread outside
    /// that runtime's async context so it can block on them.
    pub fn new(dispatcher: Arc<Dispatcher>, runtime: Handle, cancel: CancellationToken) -> Self {
        Self {
            dispatcher,
            runtime,
            cancel,
            log: GuestLog::default(),
            violations: ViolationRecord::default(),
        }
    }

    /// Log lines collected for this run.
    pub fn log(&self) -> &GuestLog {
        &self.log
    }

    /// Security violations raised by host calls in this run.
    pub fn violations(&self) -> &ViolationRecord {
        &self.violations
    }

    /// Cancellation token handed to every handler of this run.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn block_on_dispatch(&self, payload: &[u8]) -> HostCallResponse {
        self.runtime.block_on(self.dispatcher.dispatch(
            payload,
            &self.cancel,
            &self.log,
            &self.violations,
        ))
    }
}

/// Host state for the WASM store.
pub struct HostState {
    preview1: wasmtime_wasi::preview1::WasiP1Ctx,
    limits: StoreLimits,
    bridge: BridgeContext,
}

impl HostState {
    /// Get the preview1 context.
    fn preview1(&mut self) -> &mut wasmtime_wasi::preview1::WasiP1Ctx {
        &mut self.preview1
    }

    /// Bridge wiring for this unit.
    pub fn bridge(&self) -> &BridgeContext {
        &self.bridge
    }
}

/// Engine that compiles the guest module and creates execution units.
///
/// Cheap to clone; clones share the engine.
#[derive(Clone)]
pub struct WasmSandbox {
    engine: Engine,
    config: WasmConfig,
}

/// A compiled guest module, shared read-only by every execution unit.
#[derive(Clone)]
pub struct GuestModule {
    module: Module,
    name: Arc<str>,
}

/// One single-use instantiation of the guest module.
///
/// [`ExecutionUnit::run`] consumes the unit, so no unit serves two scripts.
pub struct ExecutionUnit {
    store: Store<HostState>,
    instance: Instance,
    memory: Memory,
    module_name: Arc<str>,
}

/// Output of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutput {
    /// The script's completion value as a transport string
    pub value: String,
    /// Log lines emitted by the script, in order
    pub logs: Vec<String>,
    /// Guest evaluation time in microseconds
    pub execution_time_us: u64,
}

impl WasmSandbox {
    /// Create a new WASM engine with the given configuration.
    pub fn new(config: WasmConfig) -> Result<Self> {
        let mut engine_config = Config::new();

        engine_config.cranelift_opt_level(match config.optimization_level {
            0 => OptLevel::None,
            1 | 2 => OptLevel::Speed,
            _ => OptLevel::SpeedAndSize,
        });
        engine_config.wasm_simd(config.enable_simd);

        if let Some(ref cache_path) = config.cache_path {
            if let Err(e) = engine_config.cache_config_load(cache_path) {
                tracing::warn!("Failed to load cache config: {}", e);
            }
        }

        let engine = Engine::new(&engine_config)
            .map_err(|e| SandboxError::Wasm(format!("engine creation failed: {}", e)))?;

        Ok(Self { engine, config })
    }

    /// Load the guest module from a file.
    pub fn load_module(&self, path: impl AsRef<Path>) -> Result<GuestModule> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let module = Module::from_file(&self.engine, path).map_err(|e| {
            SandboxError::Config(format!("guest module {} failed to load: {}", path.display(), e))
        })?;

        tracing::info!(module = %name, "guest module loaded");
        Ok(GuestModule {
            module,
            name: name.into(),
        })
    }

    /// Load the guest module from bytes (binary or text format).
    pub fn load_module_bytes(&self, name: &str, bytes: &[u8]) -> Result<GuestModule> {
        let module = Module::new(&self.engine, bytes)
            .map_err(|e| SandboxError::Config(format!("guest module '{}' is invalid: {}", name, e)))?;

        Ok(GuestModule {
            module,
            name: name.into(),
        })
    }

    /// Create a fresh execution unit: new store, new linear memory, bridge imports bound.
    pub fn create_unit(&self, module: &GuestModule, bridge: BridgeContext) -> Result<ExecutionUnit> {
        let host_state = self.build_host_state(bridge);
        let mut store = Store::new(&self.engine, host_state);
        store.limiter(|state| &mut state.limits);

        let mut linker: Linker<HostState> = Linker::new(&self.engine);
        wasmtime_wasi::preview1::add_to_linker_sync(&mut linker, |state| state.preview1())
            .map_err(|e| SandboxError::Wasm(format!("WASI link failed: {}", e)))?;
        HostBridgeFunctions::register(&mut linker)?;

        let instance = linker
            .instantiate(&mut store, &module.module)
            .map_err(|e| SandboxError::Wasm(format!("instantiation failed: {}", e)))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| SandboxError::MissingExport("memory".to_string()))?;

        // WASI reactors expect their initializer to run once before any export.
        if let Ok(init) = instance.get_typed_func::<(), ()>(&mut store, "_initialize") {
            init.call(&mut store, ())
                .map_err(|e| SandboxError::Wasm(format!("guest initialization trapped: {}", e)))?;
        }

        tracing::trace!(module = %module.name, "execution unit created");
        Ok(ExecutionUnit {
            store,
            instance,
            memory,
            module_name: module.name.clone(),
        })
    }

    fn build_host_state(&self, bridge: BridgeContext) -> HostState {
        let mut builder = wasmtime_wasi::WasiCtxBuilder::new();
        if self.config.inherit_stderr {
            builder.inherit_stderr();
        }
        let preview1 = builder.build_p1();

        let limits = StoreLimitsBuilder::new()
            .memory_size(self.config.max_memory)
            .build();

        HostState {
            preview1,
            limits,
            bridge,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &WasmConfig {
        &self.config
    }
}

impl GuestModule {
    /// Get the module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get exported function names.
    pub fn exports(&self) -> impl Iterator<Item = &str> {
        self.module.exports().filter_map(|e| {
            if matches!(e.ty(), ExternType::Func(_)) {
                Some(e.name())
            } else {
                None
            }
        })
    }

    /// Whether the module exports a function with this name.
    pub fn has_function(&self, name: &str) -> bool {
        self.exports().any(|e| e == name)
    }

    /// Fail fast if the module lacks an export every run needs.
    pub fn validate(&self) -> Result<()> {
        let has_memory = self
            .module
            .exports()
            .any(|e| e.name() == "memory" && matches!(e.ty(), ExternType::Memory(_)));
        if !has_memory {
            return Err(SandboxError::MissingExport("memory".to_string()));
        }
        if !self.has_function(EVAL_EXPORT) && !self.has_function(LEGACY_EVAL_EXPORT) {
            return Err(SandboxError::MissingExport(EVAL_EXPORT.to_string()));
        }
        for required in [
            buffers::RESULT_PTR_EXPORT,
            buffers::RESULT_LEN_EXPORT,
            buffers::ERROR_PTR_EXPORT,
            buffers::ERROR_LEN_EXPORT,
        ] {
            if !self.has_function(required) {
                return Err(SandboxError::MissingExport(required.to_string()));
            }
        }
        Ok(())
    }
}

impl ExecutionUnit {
    /// Evaluate one script and tear the unit down.
    pub fn run(mut self, source: &str) -> Result<ScriptOutput> {
        let start = Instant::now();

        let eval = self.eval_func()?;
        let (region, region_source) =
            buffers::resolve_script_buffer(&self.instance, &mut self.store, &self.memory)?;
        buffers::write_script(&mut self.store, &self.memory, region, source.as_bytes())?;

        tracing::trace!(
            module = %self.module_name,
            script_len = source.len(),
            ?region_source,
            "evaluating script"
        );
        let status = eval
            .call(&mut self.store, (region.ptr as i32, source.len() as i32))
            .map_err(|e| SandboxError::Wasm(format!("guest trapped during eval: {}", e)))?;
        let execution_time_us = start.elapsed().as_micros() as u64;

        if status == EvalStatus::Success.code() {
            let value = buffers::read_result(&self.instance, &mut self.store, &self.memory)?;
            tracing::debug!(module = %self.module_name, execution_time_us, "script succeeded");
            Ok(ScriptOutput {
                value,
                logs: self.store.data().bridge.log.take(),
                execution_time_us,
            })
        } else {
            let raw = buffers::read_error(&self.instance, &mut self.store, &self.memory)?;
            let mut error = ScriptError::from_guest(status, &raw);
            error.logs = self.store.data().bridge.log.take();
            tracing::debug!(
                module = %self.module_name,
                status,
                kind = ?error.kind,
                execution_time_us,
                "script failed"
            );

            // An uncaught exception raised by a refused host call is the violation itself.
            match self.store.data().bridge.violations.cause_of(&error.message) {
                Some(violation) => {
                    tracing::warn!(module = %self.module_name, %violation, "script ended on a security violation");
                    Err(SandboxError::SecurityViolation(violation))
                }
                None => Err(SandboxError::Execution(error)),
            }
        }
    }

    /// Run the guest's interpreter self-test and return its diagnostic text.
    pub fn self_test(mut self) -> Result<String> {
        let func = self
            .instance
            .get_typed_func::<(), i32>(&mut self.store, SELFTEST_EXPORT)
            .map_err(|_| SandboxError::MissingExport(SELFTEST_EXPORT.to_string()))?;
        let status = func
            .call(&mut self.store, ())
            .map_err(|e| SandboxError::Wasm(format!("guest trapped during self-test: {}", e)))?;
        let text = buffers::read_error(&self.instance, &mut self.store, &self.memory)?;

        if status == selftest::OK {
            Ok(text)
        } else {
            Err(SandboxError::Execution(ScriptError::from_selftest(status, &text)))
        }
    }

    /// Bridge wiring of this unit.
    pub fn bridge(&self) -> &BridgeContext {
        &self.store.data().bridge
    }

    fn eval_func(&mut self) -> Result<TypedFunc<(i32, i32), i32>> {
        let name = if self.instance.get_func(&mut self.store, EVAL_EXPORT).is_some() {
            EVAL_EXPORT
        } else {
            LEGACY_EVAL_EXPORT
        };
        self.instance
            .get_typed_func::<(i32, i32), i32>(&mut self.store, name)
            .map_err(|_| SandboxError::MissingExport(EVAL_EXPORT.to_string()))
    }
}

impl Drop for ExecutionUnit {
    fn drop(&mut self) {
        tracing::trace!(module = %self.module_name, "execution unit torn down");
    }
}
