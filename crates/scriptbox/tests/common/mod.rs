//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::path::PathBuf;

use scriptbox::{HandlerRegistry, SandboxPolicy, ScriptBox};

/// Guest that echoes the composed script back as its result.
pub const ECHO_GUEST: &str = r#"
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

/// Guest that never returns from `eval`.
pub const SPIN_GUEST: &str = r#"
    (module
      (memory (export "memory") 4)
      (func (export "get_script_buffer_ptr") (result i32) (i32.const 65536))
      (func (export "get_script_buffer_len") (result i32) (i32.const 65536))
      (func (export "get_result_ptr") (result i32) (i32.const 0))
      (func (export "get_result_len") (result i32) (i32.const 0))
      (func (export "get_last_error_ptr") (result i32) (i32.const 0))
      (func (export "get_last_error_len") (result i32) (i32.const 0))
      (func (export "eval") (param i32 i32) (result i32)
        (loop $spin (br $spin))
        (i32.const 0)))
"#;

/// Guest that ignores its script and issues one fixed `host.call`, returning
/// the raw JSON response as its result.
pub fn fixed_call_guest(request: &str) -> String {
    let escaped = request.replace('\\', "\\\\").replace('"', "\\\"");
    format!(
        r#"
        (module
          (import "host" "call" (func $call (param i32 i32 i32 i32) (result i32)))
          (memory (export "memory") 4)
          (global $rlen (mut i32) (i32.const 0))
          (data (i32.const 1024) "{escaped}")
          (func (export "get_script_buffer_ptr") (result i32) (i32.const 65536))
          (func (export "get_script_buffer_len") (result i32) (i32.const 65536))
          (func (export "get_result_ptr") (result i32) (i32.const 131072))
          (func (export "get_result_len") (result i32) (global.get $rlen))
          (func (export "get_last_error_ptr") (result i32) (i32.const 0))
          (func (export "get_last_error_len") (result i32) (i32.const 0))
          (func (export "eval") (param i32 i32) (result i32)
            (global.set $rlen
              (call $call (i32.const 1024) (i32.const {len}) (i32.const 131072) (i32.const 65536)))
            (i32.const 0)))
        "#,
        len = request.len()
    )
}

/// Guest that issues one fixed `host.call` and fails with status 22, using the
/// raw response as its error text (an uncaught bridge exception).
pub fn failing_call_guest(request: &str) -> String {
    let escaped = request.replace('\\', "\\\\").replace('"', "\\\"");
    format!(
        r#"
        (module
          (import "host" "call" (func $call (param i32 i32 i32 i32) (result i32)))
          (memory (export "memory") 4)
          (global $elen (mut i32) (i32.const 0))
          (data (i32.const 1024) "{escaped}")
          (func (export "get_script_buffer_ptr") (result i32) (i32.const 65536))
          (func (export "get_script_buffer_len") (result i32) (i32.const 65536))
          (func (export "get_result_ptr") (result i32) (i32.const 0))
          (func (export "get_result_len") (result i32) (i32.const 0))
          (func (export "get_last_error_ptr") (result i32) (i32.const 131072))
          (func (export "get_last_error_len") (result i32) (global.get $elen))
          (func (export "eval") (param i32 i32) (result i32)
            (global.set $elen
              (call $call (i32.const 1024) (i32.const {len}) (i32.const 131072) (i32.const 65536)))
            (i32.const 22)))
        "#,
        len = request.len()
    )
}

/// Build a box around a WAT guest.
pub fn wat_box(wat: &str, policy: SandboxPolicy, registry: HandlerRegistry) -> ScriptBox {
    ScriptBox::builder()
        .module_bytes("wat-guest", wat)
        .policy(policy)
        .registry(registry)
        .build()
        .expect("failed to build script box")
}

/// Location of the compiled QuickJS guest, if it has been built.
///
/// Set `SCRIPTBOX_GUEST_WASM` or build `crates/scriptbox-guest` for
/// `wasm32-wasip1` in release mode.
pub fn guest_wasm() -> Option<PathBuf> {
    let path = std::env::var_os("SCRIPTBOX_GUEST_WASM")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            PathBuf::from(env!("CARGO_MANIFEST_DIR"))
                .join("../scriptbox-guest/target/wasm32-wasip1/release/scriptbox_guest.wasm")
        });

    if path.exists() {
        Some(path)
    } else {
        eprintln!(
            "skipping: QuickJS guest not found at {} (set SCRIPTBOX_GUEST_WASM)",
            path.display()
        );
        None
    }
}

/// Build a box around the QuickJS guest.
pub fn js_box(policy: SandboxPolicy, registry: HandlerRegistry) -> Option<ScriptBox> {
    let path = guest_wasm()?;
    Some(
        ScriptBox::builder()
            .module_path(path)
            .policy(policy)
            .registry(registry)
            .build()
            .expect("failed to build script box"),
    )
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
