//! Host-side extension subsystem for the Silt embedded engine.
//!
//! Design:
//! - `locate.rs` resolves a logical extension name to a platform library path.
//! - `loader.rs` contains the unsafe dylib utilities (kept small & isolated)
//!   behind a seam so tests can substitute in-process modules.
//! - `entry.rs` resolves the entry symbol, runs the ABI handshake, and
//!   collects registrations made during init.
//! - `registry.rs` is the process-local capability table queried by SQL name
//!   resolution.
//! - `invoke.rs` marshals engine values across the C boundary and guards
//!   every call with a liveness check.
//! - `lifecycle.rs` owns the native handles and the load/unload state machine.
//! - `host.rs` is the facade one engine instance embeds.
//!
//! NOTE: loaded modules run native code in the host's trust domain. There is
//! no sandboxing here; failure isolation covers load/init errors, not
//! misbehaving thunks.

pub mod config;
pub mod errors;
pub mod host;
pub mod lifecycle;
pub mod loader;
pub mod locate;
pub mod registry;
pub mod value;

mod entry;
mod invoke;

pub use config::HostConfig;
pub use errors::{ExtError, Result};
pub use host::{ExtensionInfo, Host};
pub use lifecycle::{ExtensionHandle, LifecycleState};
pub use loader::{DlLoader, ModuleLoader, NativeModule};
pub use locate::shared_library_filename;
pub use registry::{CapabilityDescriptor, CapabilityKind};
pub use value::Value;
