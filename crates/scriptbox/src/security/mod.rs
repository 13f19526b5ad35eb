//! Security boundary for host capabilities exposed to scripts.
//!
//! Every filesystem and network request from a script passes through one of
//! these guards before any I/O happens:
//!
//! - **Filesystem**: relative paths only, normalized against the sandbox root;
//!   escapes are denied unless the consent callback approves them
//! - **Network**: `http`/`https` only, optional domain allowlist (subdomains
//!   match), response bodies capped while streaming

mod filesystem;
#[cfg(feature = "http")]
mod network;

pub use filesystem::{DirEntryInfo, FileSystemGuard};
#[cfg(feature = "http")]
pub use network::{HttpRequest, HttpResponse, NetworkGuard};
