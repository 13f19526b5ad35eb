//! QuickJS evaluation core for the scriptbox host.
//!
//! Compiled for `wasm32-wasip1`. The host writes a script into the script
//! region, calls `eval(ptr, len)`, then reads either the result region or the
//! error region depending on the returned status. Host capabilities are
//! reached only through the `host.call` / `host.log` imports.

mod bridge;
mod eval;
mod region;

use region::Region;

/// Status codes shared with the host.
pub mod status {
    pub const OK: i32 = 0;
    pub const RUNTIME_CREATION: i32 = 20;
    pub const CONTEXT_CREATION: i32 = 21;
    pub const EXCEPTION: i32 = 22;
    pub const BRIDGE_INSTALL: i32 = 23;
    pub const NULL_INPUT: i32 = 24;
    pub const ALLOCATION: i32 = 25;
    pub const RESULT_CONVERSION: i32 = 26;

    pub const SELFTEST_RUNTIME: i32 = 100;
    pub const SELFTEST_CONTEXT: i32 = 101;
    pub const SELFTEST_EVAL: i32 = 102;
}

const SCRIPT_CAPACITY: usize = 1024 * 1024;
const RESULT_CAPACITY: usize = 64 * 1024;
const ERROR_CAPACITY: usize = 1024;

static SCRIPT: Region<SCRIPT_CAPACITY> = Region::new();
static RESULT: Region<RESULT_CAPACITY> = Region::new();
static ERROR: Region<ERROR_CAPACITY> = Region::new();

// =============================================================================
// Buffer accessors
// =============================================================================

#[no_mangle]
pub extern "C" fn get_script_buffer_ptr() -> i32 {
    SCRIPT.ptr() as i32
}

#[no_mangle]
pub extern "C" fn get_script_buffer_len() -> i32 {
    SCRIPT.capacity() as i32
}

#[no_mangle]
pub extern "C" fn get_result_ptr() -> i32 {
    RESULT.ptr() as i32
}

#[no_mangle]
pub extern "C" fn get_result_len() -> i32 {
    RESULT.len() as i32
}

#[no_mangle]
pub extern "C" fn get_last_error_ptr() -> i32 {
    ERROR.ptr() as i32
}

#[no_mangle]
pub extern "C" fn get_last_error_len() -> i32 {
    ERROR.len() as i32
}

// =============================================================================
// Evaluation
// =============================================================================

/// Evaluate `len` bytes of script at `ptr`.
///
/// # Safety
///
/// `ptr..ptr+len` must lie inside linear memory. The host guarantees this by
/// writing into the script region.
#[no_mangle]
pub unsafe extern "C" fn eval(ptr: *const u8, len: i32) -> i32 {
    RESULT.clear();
    ERROR.clear();

    if ptr.is_null() {
        ERROR.set("Script pointer is null");
        return status::NULL_INPUT;
    }

    // Own a copy with room for the terminator the interpreter appends.
    let len = len.max(0) as usize;
    let mut source = Vec::new();
    if source.try_reserve_exact(len + 1).is_err() {
        ERROR.set("Failed to allocate script copy");
        return status::ALLOCATION;
    }
    source.extend_from_slice(std::slice::from_raw_parts(ptr, len));

    match eval::evaluate(source) {
        Ok(text) => {
            RESULT.set(&text);
            status::OK
        }
        Err(failure) => {
            ERROR.set(&failure.message);
            failure.status
        }
    }
}

/// Older export name for [`eval`].
///
/// # Safety
///
/// Same contract as [`eval`].
#[no_mangle]
pub unsafe extern "C" fn eval_js(ptr: *const u8, len: i32) -> i32 {
    eval(ptr, len)
}

/// Check that the interpreter works at all. Diagnostic text goes to the error region.
#[no_mangle]
pub extern "C" fn quickjs_selftest() -> i32 {
    ERROR.clear();
    match eval::self_test() {
        Ok(text) => {
            ERROR.set(&text);
            status::OK
        }
        Err(failure) => {
            ERROR.set(&failure.message);
            failure.status
        }
    }
}
