//! Engine-instance facade consumed by the embedding layer.
//!
//! One [`Host`] owns one registry and one lifecycle manager, tied to one
//! engine instance; two embedded engines in the same process never share
//! extensions.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use silt_abi::ffi::VtabModule;
use silt_abi::SILT_ABI_VERSION;

use crate::config::HostConfig;
use crate::errors::{ExtError, Result};
use crate::invoke;
use crate::lifecycle::{ExtensionHandle, LifecycleManager, LifecycleState};
use crate::loader::{DlLoader, ModuleLoader};
use crate::registry::{CapabilityDescriptor, CapabilityKind, CapabilityRegistry};
use crate::value::Value;

/// Embedder-facing view of one loaded (or failed) extension.
#[derive(Debug, Clone, Serialize)]
pub struct ExtensionInfo {
    pub handle: ExtensionHandle,
    pub path: PathBuf,
    pub state: LifecycleState,
    /// Minimum host ABI the module reported (0 until init completes).
    pub module_abi: u32,
    pub loaded_at_ms: u64,
    pub capabilities: usize,
}

pub struct Host {
    config: HostConfig,
    loading_enabled: AtomicBool,
    registry: CapabilityRegistry,
    lifecycle: LifecycleManager,
}

impl Host {
    pub fn new(config: HostConfig) -> Self {
        Self::with_loader(config, Box::new(DlLoader), SILT_ABI_VERSION)
    }

    /// Embed with a custom loader and/or host ABI version (tests, static
    /// linking of built-in extensions).
    pub fn with_loader(config: HostConfig, loader: Box<dyn ModuleLoader>, host_version: u32) -> Self {
        let loading_enabled = AtomicBool::new(config.allow_loading);
        Self {
            config,
            loading_enabled,
            registry: CapabilityRegistry::new(),
            lifecycle: LifecycleManager::new(loader, host_version),
        }
    }

    /// Per-instance toggle. When off, `load_extension`
    /// fails fast without touching the filesystem.
    pub fn enable_extension_loading(&self, enabled: bool) {
        self.loading_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn extension_loading_enabled(&self) -> bool {
        self.loading_enabled.load(Ordering::SeqCst)
    }

    pub fn load_extension(
        &self,
        path_or_name: &str,
        entry_point: Option<&str>,
    ) -> Result<ExtensionHandle> {
        if !self.extension_loading_enabled() {
            return Err(ExtError::LoadingDisabled);
        }
        self.lifecycle
            .load(&self.registry, &self.config, path_or_name, entry_point)
    }

    /// Unload, waiting for in-flight calls against the module to drain.
    pub fn unload_extension(&self, handle: ExtensionHandle) -> Result<()> {
        self.lifecycle.unload(&self.registry, handle, true)
    }

    /// Non-blocking unload; reports `Busy` (and changes nothing) while calls
    /// are in flight.
    pub fn try_unload_extension(&self, handle: ExtensionHandle) -> Result<()> {
        self.lifecycle.unload(&self.registry, handle, false)
    }

    // ---------- SQL-side dispatch (used by the engine's name resolution) ----------

    /// Resolve a call site; the returned descriptor may be cached across
    /// statements (prepare time), every invocation re-checks liveness.
    pub fn resolve(
        &self,
        kind: CapabilityKind,
        name: &str,
        argc: usize,
    ) -> Result<Arc<CapabilityDescriptor>> {
        self.registry.lookup(kind, name, argc)
    }

    pub fn invoke_scalar(&self, desc: &CapabilityDescriptor, args: &[Value]) -> Result<Value> {
        invoke::call_scalar(&self.lifecycle, desc, args)
    }

    /// Resolve-and-call convenience for a scalar call site.
    pub fn call_scalar(&self, name: &str, args: &[Value]) -> Result<Value> {
        let desc = self.resolve(CapabilityKind::Scalar, name, args.len())?;
        self.invoke_scalar(&desc, args)
    }

    /// Drive an aggregate over the given input rows and return its final value.
    /// Zero input rows still run the init/fin cycle; the call site's argument
    /// count is unknowable from an empty input, so arity is checked per row.
    pub fn call_aggregate(&self, name: &str, rows: &[Vec<Value>]) -> Result<Value> {
        let desc = match rows.first() {
            Some(row) => self.resolve(CapabilityKind::Aggregate, name, row.len())?,
            None => self.registry.resolve(CapabilityKind::Aggregate, name)?,
        };
        invoke::call_aggregate(&self.lifecycle, &desc, rows)
    }

    /// Materialize every row of a table-valued function call.
    pub fn call_table_fn(&self, name: &str, args: &[Value]) -> Result<Vec<Vec<Value>>> {
        let desc = self.resolve(CapabilityKind::TableValued, name, args.len())?;
        invoke::call_table_fn(&self.lifecycle, &desc, args)
    }

    /// Resolve a virtual-table module for the engine's planner.
    pub fn lookup_module(&self, name: &str) -> Result<Arc<CapabilityDescriptor>> {
        self.registry.resolve(CapabilityKind::Module, name)
    }

    /// Hand the planner a module's vtable under the owner liveness guard:
    /// the vtab pointer is only valid inside `f`, and the call fails with
    /// `ExtensionUnloaded` once the owning extension is gone.
    pub fn with_module_vtab<T>(
        &self,
        desc: &CapabilityDescriptor,
        f: impl FnOnce(*const VtabModule) -> T,
    ) -> Result<T> {
        let _live = self.lifecycle.begin_call(desc.owner, &desc.name)?;
        let vtab = desc
            .module_vtab()
            .ok_or_else(|| ExtError::InvalidSignature {
                name: desc.name.clone(),
                reason: "capability is not a virtual-table module".to_string(),
            })?;
        Ok(f(vtab))
    }

    // ---------- introspection ----------

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn extension_state(&self, handle: ExtensionHandle) -> Option<LifecycleState> {
        self.lifecycle.state_of(handle)
    }

    pub fn extensions(&self) -> Vec<ExtensionInfo> {
        self.lifecycle
            .snapshot()
            .into_iter()
            .map(|v| ExtensionInfo {
                capabilities: self.registry.owned_by(v.handle),
                loaded_at_ms: v
                    .loaded_at
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0),
                handle: v.handle,
                path: v.path,
                state: v.state,
                module_abi: v.required_version,
            })
            .collect()
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.lifecycle.shutdown(&self.registry);
    }
}
