//! Status codes returned by the guest `eval` and `quickjs_selftest` exports.

/// Outcome of one guest evaluation call.
///
/// Callers only branch on success vs. non-zero; the code plus the error buffer
/// identify the failing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum EvalStatus {
    /// Result available via `get_result_ptr`/`get_result_len`
    Success = 0,
    /// Interpreter runtime could not be created
    RuntimeCreation = 20,
    /// Interpreter context could not be created
    ContextCreation = 21,
    /// The script threw; see the error buffer
    Exception = 22,
    /// `console`/`__host` bindings could not be installed
    BridgeInstall = 23,
    /// Source pointer was null
    NullInput = 24,
    /// Source copy could not be allocated
    BufferAllocation = 25,
    /// Completion value could not be converted to a string
    ResultConversion = 26,
}

impl EvalStatus {
    /// Map a raw code; `None` for codes this host does not know.
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => EvalStatus::Success,
            20 => EvalStatus::RuntimeCreation,
            21 => EvalStatus::ContextCreation,
            22 => EvalStatus::Exception,
            23 => EvalStatus::BridgeInstall,
            24 => EvalStatus::NullInput,
            25 => EvalStatus::BufferAllocation,
            26 => EvalStatus::ResultConversion,
            _ => return None,
        })
    }

    /// Raw code.
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Codes returned by the optional `quickjs_selftest` export.
pub mod selftest {
    /// Interpreter is functional
    pub const OK: i32 = 0;
    /// Runtime creation failed
    pub const RUNTIME: i32 = 100;
    /// Context creation failed
    pub const CONTEXT: i32 = 101;
    /// Evaluating `1+1` failed
    pub const EVAL: i32 = 102;
}
