//! Shared buffer regions in an execution unit's linear memory.
//!
//! The guest owns its memory layout, so the host asks it where the script,
//! result and error regions live instead of assuming offsets:
//!
//! ```text
//! get_script_buffer_ptr/len  → script input   (host writes)
//! get_result_ptr/len         → result string  (host reads after eval)
//! get_last_error_ptr/len     → error string   (host reads after eval)
//! ```
//!
//! Older guest builds do not export the script accessors; for those the host
//! falls back to a fixed legacy region.

use wasmtime::{Instance, Memory, Store};

use super::runtime::HostState;
use crate::error::{BufferStage, Result, SandboxError};

/// Script region offset assumed for guests without accessor exports.
pub const LEGACY_SCRIPT_OFFSET: u32 = 0x0010_0000;

/// Script region size assumed for guests without accessor exports.
pub const LEGACY_SCRIPT_CAPACITY: u32 = 64 * 1024;

pub(crate) const SCRIPT_PTR_EXPORT: &str = "get_script_buffer_ptr";
pub(crate) const SCRIPT_LEN_EXPORT: &str = "get_script_buffer_len";
pub(crate) const RESULT_PTR_EXPORT: &str = "get_result_ptr";
pub(crate) const RESULT_LEN_EXPORT: &str = "get_result_len";
pub(crate) const ERROR_PTR_EXPORT: &str = "get_last_error_ptr";
pub(crate) const ERROR_LEN_EXPORT: &str = "get_last_error_len";

/// A `(pointer, length)` span in guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRegion {
    /// Offset into linear memory
    pub ptr: u32,
    /// Capacity (script region) or content length (result/error regions)
    pub len: u32,
}

impl BufferRegion {
    fn range(&self, memory_size: usize) -> Option<std::ops::Range<usize>> {
        let start = self.ptr as usize;
        let end = start.checked_add(self.len as usize)?;
        (end <= memory_size).then_some(start..end)
    }
}

/// Where the script region came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionSource {
    /// Guest accessor exports
    Exported,
    /// Fixed legacy offset
    Legacy,
}

/// Locate the script input region.
pub(crate) fn resolve_script_buffer(
    instance: &Instance,
    store: &mut Store<HostState>,
    memory: &Memory,
) -> Result<(BufferRegion, RegionSource)> {
    let exported = instance.get_func(&mut *store, SCRIPT_PTR_EXPORT).is_some()
        && instance.get_func(&mut *store, SCRIPT_LEN_EXPORT).is_some();

    let (region, source) = if exported {
        let region = read_accessors(
            instance,
            store,
            SCRIPT_PTR_EXPORT,
            SCRIPT_LEN_EXPORT,
            BufferStage::ResolveScript,
        )?;
        (region, RegionSource::Exported)
    } else {
        tracing::debug!("guest has no script buffer accessors; using legacy region");
        (
            BufferRegion {
                ptr: LEGACY_SCRIPT_OFFSET,
                len: LEGACY_SCRIPT_CAPACITY,
            },
            RegionSource::Legacy,
        )
    };

    if region.range(memory.data_size(&*store)).is_none() {
        return Err(SandboxError::Buffer {
            stage: BufferStage::ResolveScript,
            message: format!(
                "script region {:#x}+{} lies outside linear memory",
                region.ptr, region.len
            ),
        });
    }
    Ok((region, source))
}

/// Copy the script into its region. Refuses oversize scripts before touching memory.
pub(crate) fn write_script(
    store: &mut Store<HostState>,
    memory: &Memory,
    region: BufferRegion,
    script: &[u8],
) -> Result<()> {
    if script.len() > region.len as usize {
        return Err(SandboxError::ScriptTooLarge {
            len: script.len(),
            capacity: region.len as usize,
        });
    }

    let target = BufferRegion {
        ptr: region.ptr,
        len: script.len() as u32,
    };
    let data = memory.data_mut(&mut *store);
    let range = target.range(data.len()).ok_or_else(|| SandboxError::Buffer {
        stage: BufferStage::WriteScript,
        message: "script region lies outside linear memory".to_string(),
    })?;
    data[range].copy_from_slice(script);
    Ok(())
}

/// Read the result string written by the last evaluation.
pub(crate) fn read_result(
    instance: &Instance,
    store: &mut Store<HostState>,
    memory: &Memory,
) -> Result<String> {
    read_text(
        instance,
        store,
        memory,
        RESULT_PTR_EXPORT,
        RESULT_LEN_EXPORT,
        BufferStage::ReadResult,
    )
}

/// Read the error string written by the last evaluation.
pub(crate) fn read_error(
    instance: &Instance,
    store: &mut Store<HostState>,
    memory: &Memory,
) -> Result<String> {
    read_text(
        instance,
        store,
        memory,
        ERROR_PTR_EXPORT,
        ERROR_LEN_EXPORT,
        BufferStage::ReadError,
    )
}

fn read_text(
    instance: &Instance,
    store: &mut Store<HostState>,
    memory: &Memory,
    ptr_export: &str,
    len_export: &str,
    stage: BufferStage,
) -> Result<String> {
    let region = read_accessors(instance, store, ptr_export, len_export, stage)?;
    let data = memory.data(&*store);
    let range = region.range(data.len()).ok_or_else(|| SandboxError::Buffer {
        stage,
        message: format!(
            "region {:#x}+{} lies outside linear memory",
            region.ptr, region.len
        ),
    })?;
    Ok(String::from_utf8_lossy(&data[range]).into_owned())
}

fn read_accessors(
    instance: &Instance,
    store: &mut Store<HostState>,
    ptr_export: &str,
    len_export: &str,
    stage: BufferStage,
) -> Result<BufferRegion> {
    let ptr = call_accessor(instance, store, ptr_export, stage)?;
    let len = call_accessor(instance, store, len_export, stage)?;
    if len < 0 {
        return Err(SandboxError::Buffer {
            stage,
            message: format!("{} returned negative length {}", len_export, len),
        });
    }
    Ok(BufferRegion {
        ptr: ptr as u32,
        len: len as u32,
    })
}

fn call_accessor(
    instance: &Instance,
    store: &mut Store<HostState>,
    name: &str,
    stage: BufferStage,
) -> Result<i32> {
    let func = instance
        .get_typed_func::<(), i32>(&mut *store, name)
        .map_err(|e| SandboxError::Buffer {
            stage,
            message: format!("accessor '{}' unavailable: {}", name, e),
        })?;
    func.call(&mut *store, ()).map_err(|e| SandboxError::Buffer {
        stage,
        message: format!("accessor '{}' trapped: {}", name, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_range() {
        let r = BufferRegion { ptr: 10, len: 5 };
        assert_eq!(r.range(15), Some(10..15));
        assert_eq!(r.range(14), None);

        let wrap = BufferRegion {
            ptr: u32::MAX,
            len: u32::MAX,
        };
        assert_eq!(wrap.range(1 << 20), None);
    }
}
