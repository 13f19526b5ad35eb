//! Host functions imported by the guest module.
//!
//! ## Import Module
//!
//! Both functions live under the `host` namespace:
//! ```wat
//! (import "host" "call" (func $call (param i32 i32 i32 i32) (result i32)))
//! (import "host" "log"  (func $log  (param i32 i32)))
//! ```
//!
//! ## Calling Convention
//!
//! `call(in_ptr, in_len, out_ptr, out_cap)` reads a JSON request from guest
//! memory, runs the matching handler to completion while the guest thread
//! waits, and copies the JSON response into `out_ptr`. Responses longer than
//! `out_cap` are truncated. The return value is the number of bytes written, or
//! a negative code on a host-side fault.

use wasmtime::{Caller, Linker, Memory};

use super::runtime::HostState;
use crate::error::{Result, SandboxError};

/// Guest memory has no `memory` export.
pub const CALL_ERR_NO_MEMORY: i32 = -2;

/// Request or response span lies outside guest memory.
pub const CALL_ERR_OUT_OF_BOUNDS: i32 = -1;

/// Import namespace for bridge functions.
pub const HOST_MODULE: &str = "host";

/// Bridge host functions exposed to the guest.
///
/// Marker struct for organizing host function registration.
pub struct HostBridgeFunctions;

impl HostBridgeFunctions {
    /// Register `host.call` and `host.log` with the wasmtime linker.
    pub fn register(linker: &mut Linker<HostState>) -> Result<()> {
        Self::register_call(linker)?;
        Self::register_log(linker)?;
        Ok(())
    }

    fn register_call(linker: &mut Linker<HostState>) -> Result<()> {
        linker
            .func_wrap(
                HOST_MODULE,
                "call",
                |mut caller: Caller<'_, HostState>,
                 in_ptr: i32,
                 in_len: i32,
                 out_ptr: i32,
                 out_cap: i32|
                 -> i32 {
                    let memory = match get_memory(&mut caller) {
                        Ok(m) => m,
                        Err(_) => return CALL_ERR_NO_MEMORY,
                    };
                    let payload = match read_bytes(&memory, &caller, in_ptr, in_len) {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::warn!(error = %e, "host call request out of bounds");
                            return CALL_ERR_OUT_OF_BOUNDS;
                        }
                    };

                    // Blocks this (guest) thread until the handler finishes.
                    let bridge = caller.data().bridge().clone();
                    let response = bridge.block_on_dispatch(&payload);
                    let bytes = response.to_bytes();

                    let cap = out_cap.max(0) as usize;
                    if bytes.len() > cap {
                        tracing::warn!(
                            response_len = bytes.len(),
                            out_cap = cap,
                            "host call response truncated"
                        );
                    }
                    let written = &bytes[..bytes.len().min(cap)];

                    match write_bytes(&memory, &mut caller, out_ptr, written) {
                        Ok(()) => written.len() as i32,
                        Err(e) => {
                            tracing::warn!(error = %e, "host call response out of bounds");
                            CALL_ERR_OUT_OF_BOUNDS
                        }
                    }
                },
            )
            .map_err(|e| SandboxError::Wasm(format!("failed to register host.call: {}", e)))?;
        Ok(())
    }

    fn register_log(linker: &mut Linker<HostState>) -> Result<()> {
        linker
            .func_wrap(
                HOST_MODULE,
                "log",
                |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<()> {
                    let memory = get_memory(&mut caller)?;
                    let bytes = read_bytes(&memory, &caller, ptr, len)?;
                    caller
                        .data()
                        .bridge()
                        .log()
                        .push(String::from_utf8_lossy(&bytes).into_owned());
                    Ok(())
                },
            )
            .map_err(|e| SandboxError::Wasm(format!("failed to register host.log: {}", e)))?;
        Ok(())
    }
}

// ============================================================================
// Memory Access Helpers
// ============================================================================

/// Get the memory export from the caller.
fn get_memory(caller: &mut Caller<'_, HostState>) -> Result<Memory> {
    caller
        .get_export("memory")
        .and_then(|e| e.into_memory())
        .ok_or_else(|| SandboxError::MissingExport("memory".to_string()))
}

/// Copy `len` bytes at `ptr` out of guest memory.
fn read_bytes(
    memory: &Memory,
    caller: &Caller<'_, HostState>,
    ptr: i32,
    len: i32,
) -> Result<Vec<u8>> {
    let data = memory.data(caller);
    let start = ptr as u32 as usize;
    let end = start.checked_add(len.max(0) as usize);

    match end {
        Some(end) if end <= data.len() => Ok(data[start..end].to_vec()),
        _ => Err(SandboxError::Wasm("memory read out of bounds".to_string())),
    }
}

/// Write bytes into guest memory at `ptr`.
fn write_bytes(
    memory: &Memory,
    caller: &mut Caller<'_, HostState>,
    ptr: i32,
    bytes: &[u8],
) -> Result<()> {
    let data = memory.data_mut(caller);
    let start = ptr as u32 as usize;
    let end = start.checked_add(bytes.len());

    match end {
        Some(end) if end <= data.len() => {
            data[start..end].copy_from_slice(bytes);
            Ok(())
        }
        _ => Err(SandboxError::Wasm("memory write out of bounds".to_string())),
    }
}
