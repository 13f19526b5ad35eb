//! # ScriptBox
//!
//! Sandboxed script execution for host applications.
//!
//! Untrusted JavaScript runs inside a QuickJS interpreter compiled to
//! WebAssembly. Each run gets a fresh, memory-isolated execution unit; the only
//! way out is a synchronous JSON call bridge whose filesystem and network
//! capabilities are checked against a [`SandboxPolicy`] before any I/O.
//!
//! ## Layers
//!
//! | Layer | Module | Responsibility |
//! |-------|--------|----------------|
//! | Facade | [`ScriptBox`] | Compose source, pick deadline, run |
//! | Supervisor | (internal) | Dedicated thread + deadline |
//! | Execution units | [`wasm`] | One store/instance per run, buffer exchange |
//! | Bridge | [`bridge`] | `host.call` parsing, routing, built-ins |
//! | Security | [`security`] | Path containment, domain allowlist, response caps |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use scriptbox::{HandlerRegistry, SandboxPolicy, ScriptBox};
//! use serde_json::json;
//!
//! let registry = HandlerRegistry::builder()
//!     .register_fn("greeting.get", |_| async { Ok(json!("hello")) })
//!     .build();
//!
//! let sandbox = ScriptBox::builder()
//!     .module_path("scriptbox_guest.wasm")
//!     .policy(SandboxPolicy::new("./sandbox").allow_domain("api.example.com"))
//!     .registry(registry)
//!     .build()?;
//!
//! let output = sandbox.run("return scriptbox.call('greeting.get') + '!'").await?;
//! assert_eq!(output.value, "hello!");
//! ```
//!
//! ## Features
//!
//! - `http` (default) - `http.*` built-ins and the network guard (reqwest)

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bridge;
pub mod error;
pub mod policy;
mod sandbox;
pub mod security;
mod supervisor;
pub mod wasm;

// Re-export main types
pub use bridge::{CallContext, HandlerRegistry, HandlerRegistryBuilder, HostHandler};
pub use error::{BufferStage, Result, SandboxError, ScriptError, ScriptErrorKind};
pub use policy::{FsConsent, FsOperation, NetworkConsent, SandboxPolicy};
pub use sandbox::{ScriptBox, ScriptBoxBuilder};
pub use wasm::{ScriptOutput, WasmConfig};
