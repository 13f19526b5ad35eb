//! Host imports and the JS bindings built on them.
//!
//! Installs two globals into every fresh context:
//!
//! - `__host.bridge(requestJson)` - synchronous call, returns the response JSON
//!   string, or `null` when the host wrote nothing. A negative host status
//!   throws an `InternalError`.
//! - `console.log/info/warn/error/debug(...)` - one-way log lines, arguments
//!   joined with a space

use rquickjs::convert::Coerced;
use rquickjs::function::Rest;
use rquickjs::{Ctx, Exception, Function, Object};

/// Largest response `host.call` may write back.
pub const BRIDGE_RESPONSE_CAPACITY: usize = 64 * 1024;

#[cfg(target_arch = "wasm32")]
#[link(wasm_import_module = "host")]
extern "C" {
    #[link_name = "call"]
    fn host_call(in_ptr: *const u8, in_len: i32, out_ptr: *mut u8, out_cap: i32) -> i32;

    #[link_name = "log"]
    fn host_log(ptr: *const u8, len: i32);
}

#[cfg(not(target_arch = "wasm32"))]
use native::{host_call, host_log};

/// Install `__host` and `console` into the context's global object.
pub fn install(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let host = Object::new(ctx.clone())?;
    host.set("bridge", Function::new(ctx.clone(), bridge_call)?)?;
    globals.set("__host", host)?;

    let console = Object::new(ctx.clone())?;
    for level in ["log", "info", "warn", "error", "debug"] {
        console.set(level, Function::new(ctx.clone(), console_log)?)?;
    }
    globals.set("console", console)?;

    Ok(())
}

fn bridge_call<'js>(ctx: Ctx<'js>, request: Coerced<String>) -> rquickjs::Result<Option<String>> {
    let request = request.0;
    let mut response = vec![0u8; BRIDGE_RESPONSE_CAPACITY];
    // SAFETY: the host reads `request` and writes at most `response.len()` bytes.
    let written = unsafe {
        host_call(
            request.as_ptr(),
            request.len() as i32,
            response.as_mut_ptr(),
            response.len() as i32,
        )
    };

    if written < 0 {
        return Err(Exception::throw_internal(
            &ctx,
            &format!("Host call failed with error code {written}"),
        ));
    }
    if written == 0 {
        return Ok(None);
    }
    response.truncate(written as usize);
    Ok(Some(String::from_utf8_lossy(&response).into_owned()))
}

fn console_log(args: Rest<Coerced<String>>) {
    let line = args
        .0
        .iter()
        .map(|arg| arg.0.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    // SAFETY: the host only reads the given span.
    unsafe { host_log(line.as_ptr(), line.len() as i32) };
}

/// Loopback stand-ins for the `host` imports on native targets.
///
/// `call` echoes the request back, or returns an injected fault code; `log`
/// collects lines per thread.
#[cfg(not(target_arch = "wasm32"))]
pub(crate) mod native {
    use std::cell::{Cell, RefCell};

    thread_local! {
        static LOG: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
        static FAULT: Cell<Option<i32>> = const { Cell::new(None) };
    }

    pub(crate) unsafe fn host_call(
        in_ptr: *const u8,
        in_len: i32,
        out_ptr: *mut u8,
        out_cap: i32,
    ) -> i32 {
        if let Some(code) = FAULT.with(Cell::get) {
            return code;
        }
        let len = in_len.min(out_cap).max(0) as usize;
        // SAFETY: caller passes a readable input span and a writable output of `out_cap` bytes.
        unsafe { std::ptr::copy_nonoverlapping(in_ptr, out_ptr, len) };
        len as i32
    }

    pub(crate) unsafe fn host_log(ptr: *const u8, len: i32) {
        // SAFETY: caller passes a readable span.
        let bytes = unsafe { std::slice::from_raw_parts(ptr, len.max(0) as usize) };
        LOG.with(|log| {
            log.borrow_mut()
                .push(String::from_utf8_lossy(bytes).into_owned())
        });
    }

    #[cfg(test)]
    pub(crate) fn take_log() -> Vec<String> {
        LOG.with(|log| log.take())
    }

    #[cfg(test)]
    pub(crate) fn set_fault(code: Option<i32>) {
        FAULT.with(|fault| fault.set(code));
    }
}
