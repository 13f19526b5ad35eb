//! Configuration for the WASM engine that hosts the guest module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Engine and per-unit resource configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WasmConfig {
    /// Maximum linear memory per execution unit in bytes (default = 256MB)
    pub max_memory: usize,

    /// Cranelift optimization level (0-3)
    pub optimization_level: u8,

    /// Enable SIMD support
    pub enable_simd: bool,

    /// Forward guest stderr to the host process (diagnostics only)
    pub inherit_stderr: bool,

    /// wasmtime cache config file for compiled modules
    pub cache_path: Option<PathBuf>,
}

impl Default for WasmConfig {
    fn default() -> Self {
        Self {
            max_memory: 256 * 1024 * 1024, // 256 MB
            optimization_level: 2,
            enable_simd: true,
            inherit_stderr: false,
            cache_path: None,
        }
    }
}

impl WasmConfig {
    /// Create a minimal config for tight memory budgets
    pub fn minimal() -> Self {
        Self {
            max_memory: 64 * 1024 * 1024, // 64 MB
            ..Default::default()
        }
    }

    /// Create config for development/debugging
    pub fn development() -> Self {
        Self {
            optimization_level: 0, // Faster compilation
            inherit_stderr: true,
            ..Default::default()
        }
    }

    /// Builder: set max memory
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = bytes;
        self
    }

    /// Builder: enable SIMD
    pub fn simd(mut self, enable: bool) -> Self {
        self.enable_simd = enable;
        self
    }

    /// Builder: set optimization level
    pub fn optimize(mut self, level: u8) -> Self {
        self.optimization_level = level.min(3);
        self
    }

    /// Builder: forward guest stderr
    pub fn inherit_stderr(mut self, inherit: bool) -> Self {
        self.inherit_stderr = inherit;
        self
    }

    /// Builder: set cache path
    pub fn cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }
}
