//! Host side of the guest-to-host call bridge.
//!
//! The guest reaches the host only through two imports: a synchronous
//! `host.call` carrying a JSON request/response, and a one-way `host.log`.
//! This module parses those requests, routes them to the registration table or
//! the built-in capabilities, and serializes the response.
//!
//! ## Wire format
//!
//! ```text
//! guest → host   {"method": "fs.readText", "args": ["notes.txt"]}
//! host  → guest  {"result": "..."}   or   {"error": "..."}
//! ```
//!
//! Method names are dotted and case-insensitive. `tools.invoke` is reserved
//! for dynamic tool calls shaped `{"toolId": ..., "args": [...]}`.

mod builtins;
mod dispatch;
mod protocol;
mod registry;

pub use builtins::Builtins;
pub use dispatch::{Dispatcher, GuestLog, ViolationRecord};
pub use protocol::{HostCallRequest, HostCallResponse, ToolInvocation, TOOL_INVOKE_METHOD};
pub use registry::{CallContext, FnHandler, HandlerRegistry, HandlerRegistryBuilder, HostHandler};

/// Guest-side bindings (`scriptbox.fs.readText(...)` etc.) evaluated before
/// every script.
pub const PRELUDE: &str = include_str!("prelude.js");
