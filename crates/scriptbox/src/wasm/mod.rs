//! WebAssembly isolation for guest scripts.
//!
//! Scripts run inside a QuickJS interpreter compiled to WASM and hosted by
//! wasmtime. Every run gets its own [`ExecutionUnit`]: a fresh store, a fresh
//! linear memory and a fresh interpreter, so nothing a script does can be
//! observed by the next one.
//!
//! ## Security Model
//!
//! - **Memory isolation**: each unit has its own linear memory, capped by [`WasmConfig::max_memory`]
//! - **No ambient authority**: WASI is linked with no preopens, environment or sockets
//! - **One door out**: the guest reaches the host only through `host.call` and `host.log`
//!
//! ## Guest ABI
//!
//! | Export | Signature | Purpose |
//! |--------|-----------|---------|
//! | `memory` | memory | Shared linear memory |
//! | `eval` (or `eval_js`) | `(ptr, len) -> status` | Evaluate a script |
//! | `get_script_buffer_ptr/len` | `() -> i32` | Script input region (optional) |
//! | `get_result_ptr/len` | `() -> i32` | Result string |
//! | `get_last_error_ptr/len` | `() -> i32` | Error string |
//! | `quickjs_selftest` | `() -> status` | Interpreter diagnostics (optional) |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use scriptbox::wasm::{WasmSandbox, WasmConfig, BridgeContext};
//!
//! let engine = WasmSandbox::new(WasmConfig::default())?;
//! let module = engine.load_module("scriptbox_guest.wasm")?;
//! module.validate()?;
//!
//! let unit = engine.create_unit(&module, bridge)?;
//! let output = unit.run("1 + 1")?;
//! assert_eq!(output.value, "2");
//! ```

mod buffers;
mod config;
mod host_functions;
mod runtime;
mod status;

pub use buffers::{BufferRegion, RegionSource, LEGACY_SCRIPT_CAPACITY, LEGACY_SCRIPT_OFFSET};
pub use config::WasmConfig;
pub use host_functions::{HostBridgeFunctions, CALL_ERR_NO_MEMORY, CALL_ERR_OUT_OF_BOUNDS, HOST_MODULE};
pub use runtime::{
    BridgeContext, ExecutionUnit, GuestModule, HostState, ScriptOutput, WasmSandbox, EVAL_EXPORT,
    LEGACY_EVAL_EXPORT, SELFTEST_EXPORT,
};
pub use status::{selftest, EvalStatus};
