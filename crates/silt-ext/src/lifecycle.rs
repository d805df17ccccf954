//! Extension lifecycle: load → init → register → active → unload.
//!
//! The manager owns every native handle exclusively. Descriptors in the
//! registry only record the owning handle id; liveness is re-checked through
//! [`LifecycleManager::begin_call`] before any native dispatch, and unload
//! waits for in-flight calls to drain before the library is released.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::SystemTime;

use silt_abi::ENTRY_SYMBOL;

use crate::config::HostConfig;
use crate::entry::{resolve_and_init, RegistrationSink};
use crate::errors::{ExtError, Result};
use crate::loader::{ModuleLoader, NativeModule};
use crate::locate::locate_extension;
use crate::registry::{CapabilityDescriptor, CapabilityRegistry};

/// Opaque identifier for one loaded module. Stale handles fail cleanly
/// (`AlreadyUnloaded` / `ExtensionUnloaded`), they are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ExtensionHandle(u64);

impl ExtensionHandle {
    pub(crate) fn from_raw(id: u64) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unloaded,
    Loading,
    Initializing,
    Active,
    Unloading,
    Failed,
}

struct SlotInner {
    state: LifecycleState,
    /// The raw native handle; dropping it is the unload.
    module: Option<Box<dyn NativeModule>>,
    /// Kept so a ctx pointer stashed during init stays dereferenceable.
    sink: Option<Box<RegistrationSink>>,
    /// Minimum host ABI the module reported during the handshake.
    required_version: u32,
    inflight: usize,
}

struct Slot {
    path: PathBuf,
    loaded_at: SystemTime,
    inner: Mutex<SlotInner>,
    drained: Condvar,
}

/// Held by the invocation adapter for the duration of one native call; keeps
/// the owning module loaded until dropped.
pub(crate) struct CallGuard {
    slot: Arc<Slot>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        let mut inner = self.slot.inner.lock().unwrap();
        inner.inflight -= 1;
        if inner.inflight == 0 {
            self.slot.drained.notify_all();
        }
    }
}

/// Removes the canonical path from the in-progress set when a load attempt
/// finishes, successfully or not.
#[derive(Debug)]
struct InProgress<'a> {
    set: &'a Mutex<HashSet<PathBuf>>,
    path: PathBuf,
}

impl<'a> InProgress<'a> {
    fn claim(set: &'a Mutex<HashSet<PathBuf>>, path: PathBuf) -> Result<Self> {
        if !set.lock().unwrap().insert(path.clone()) {
            return Err(ExtError::LoadInProgress(path.display().to_string()));
        }
        Ok(Self { set, path })
    }
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.set.lock().unwrap().remove(&self.path);
    }
}

/// Read-only view of one slot for the host's introspection DTO.
pub(crate) struct SlotView {
    pub handle: ExtensionHandle,
    pub path: PathBuf,
    pub loaded_at: SystemTime,
    pub state: LifecycleState,
    pub required_version: u32,
}

pub struct LifecycleManager {
    host_version: u32,
    loader: Box<dyn ModuleLoader>,
    slots: Mutex<HashMap<u64, Arc<Slot>>>,
    in_progress: Mutex<HashSet<PathBuf>>,
    next_id: AtomicU64,
}

impl LifecycleManager {
    pub(crate) fn new(loader: Box<dyn ModuleLoader>, host_version: u32) -> Self {
        Self {
            host_version,
            loader,
            slots: Mutex::new(HashMap::new()),
            in_progress: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Locate, load, init, and commit one extension. Every failure leaves the
    /// registry untouched; the failed slot stays visible (state `Failed`)
    /// until cleaned up through [`Self::unload`].
    pub(crate) fn load(
        &self,
        registry: &CapabilityRegistry,
        cfg: &HostConfig,
        spec: &str,
        entry_override: Option<&str>,
    ) -> Result<ExtensionHandle> {
        let path = locate_extension(spec, cfg)?;
        let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
        let _claim = InProgress::claim(&self.in_progress, canonical)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = ExtensionHandle(id);
        let slot = Arc::new(Slot {
            path: path.clone(),
            loaded_at: SystemTime::now(),
            inner: Mutex::new(SlotInner {
                state: LifecycleState::Loading,
                module: None,
                sink: None,
                required_version: 0,
                inflight: 0,
            }),
            drained: Condvar::new(),
        });
        self.slots.lock().unwrap().insert(id, slot.clone());

        eprintln!("[ext] loading {}", path.display());
        let module = match self.loader.load(&path) {
            Ok(m) => m,
            Err(e) => return Err(self.fail(&slot, e)),
        };

        slot.inner.lock().unwrap().state = LifecycleState::Initializing;
        let symbol = entry_override.unwrap_or(ENTRY_SYMBOL);
        let outcome = match resolve_and_init(module.as_ref(), symbol, self.host_version) {
            Ok(o) => o,
            // dropping `module` here releases the native handle
            Err(e) => return Err(self.fail(&slot, e)),
        };

        let batch: Vec<CapabilityDescriptor> = outcome
            .pending
            .into_iter()
            .map(|p| CapabilityDescriptor {
                kind: p.imp.kind(),
                name: p.name,
                min_args: p.min_args,
                max_args: p.max_args,
                owner: handle,
                imp: p.imp,
            })
            .collect();
        let count = batch.len();
        if let Err(e) = registry.register_all(batch) {
            return Err(self.fail(&slot, e));
        }

        {
            let mut inner = slot.inner.lock().unwrap();
            inner.module = Some(module);
            inner.sink = Some(outcome.sink);
            inner.required_version = outcome.required_version;
            inner.state = LifecycleState::Active;
        }
        eprintln!(
            "[ext] {} active ({count} capabilities, module abi v{})",
            path.display(),
            outcome.required_version
        );
        Ok(handle)
    }

    fn fail(&self, slot: &Arc<Slot>, err: ExtError) -> ExtError {
        let mut inner = slot.inner.lock().unwrap();
        inner.state = LifecycleState::Failed;
        inner.module = None;
        inner.sink = None;
        eprintln!("[ext] load failed: {} ({err})", slot.path.display());
        err
    }

    /// Unload one extension: unregister its capabilities, then release the
    /// native handle. With `wait`, blocks until in-flight calls drain;
    /// without, reports `Busy` and changes nothing. Unloading a `Failed` slot
    /// is the cleanup transition back to `Unloaded`.
    pub(crate) fn unload(
        &self,
        registry: &CapabilityRegistry,
        handle: ExtensionHandle,
        wait: bool,
    ) -> Result<()> {
        let slot = self
            .slots
            .lock()
            .unwrap()
            .get(&handle.0)
            .cloned()
            .ok_or(ExtError::AlreadyUnloaded)?;

        {
            let mut inner = slot.inner.lock().unwrap();
            match inner.state {
                LifecycleState::Active => {
                    if !wait && inner.inflight > 0 {
                        return Err(ExtError::Busy(inner.inflight));
                    }
                    // no new call can begin once we leave Active
                    inner.state = LifecycleState::Unloading;
                }
                LifecycleState::Failed => {
                    inner.state = LifecycleState::Unloaded;
                    drop(inner);
                    self.slots.lock().unwrap().remove(&handle.0);
                    return Ok(());
                }
                LifecycleState::Loading | LifecycleState::Initializing => {
                    return Err(ExtError::Busy(0));
                }
                LifecycleState::Unloading | LifecycleState::Unloaded => {
                    return Err(ExtError::AlreadyUnloaded);
                }
            }
        }

        let removed = registry.unregister_all(handle);

        let mut inner = slot.inner.lock().unwrap();
        while inner.inflight > 0 {
            inner = slot.drained.wait(inner).unwrap();
        }
        inner.module = None;
        inner.sink = None;
        inner.state = LifecycleState::Unloaded;
        drop(inner);

        self.slots.lock().unwrap().remove(&handle.0);
        eprintln!(
            "[ext] unloaded {} ({removed} capabilities removed)",
            slot.path.display()
        );
        Ok(())
    }

    /// Liveness check. Succeeds only while the owner is `Active`, and pins
    /// the module loaded until the returned guard drops.
    pub(crate) fn begin_call(&self, owner: ExtensionHandle, capability: &str) -> Result<CallGuard> {
        let slot = self
            .slots
            .lock()
            .unwrap()
            .get(&owner.0)
            .cloned()
            .ok_or_else(|| ExtError::ExtensionUnloaded(capability.to_string()))?;

        let mut inner = slot.inner.lock().unwrap();
        if inner.state != LifecycleState::Active {
            return Err(ExtError::ExtensionUnloaded(capability.to_string()));
        }
        inner.inflight += 1;
        drop(inner);
        Ok(CallGuard { slot })
    }

    /// Host shutdown: drain and release everything still loaded.
    pub(crate) fn shutdown(&self, registry: &CapabilityRegistry) {
        let ids: Vec<u64> = self.slots.lock().unwrap().keys().copied().collect();
        for id in ids {
            if let Err(e) = self.unload(registry, ExtensionHandle(id), true) {
                eprintln!("[ext] shutdown: handle {id}: {e}");
            }
        }
    }

    pub(crate) fn state_of(&self, handle: ExtensionHandle) -> Option<LifecycleState> {
        let slot = self.slots.lock().unwrap().get(&handle.0).cloned()?;
        let state = slot.inner.lock().unwrap().state;
        Some(state)
    }

    pub(crate) fn snapshot(&self) -> Vec<SlotView> {
        let slots: Vec<(u64, Arc<Slot>)> = self
            .slots
            .lock()
            .unwrap()
            .iter()
            .map(|(id, s)| (*id, s.clone()))
            .collect();

        let mut views: Vec<SlotView> = slots
            .into_iter()
            .map(|(id, slot)| {
                let inner = slot.inner.lock().unwrap();
                SlotView {
                    handle: ExtensionHandle(id),
                    path: slot.path.clone(),
                    loaded_at: slot.loaded_at,
                    state: inner.state,
                    required_version: inner.required_version,
                }
            })
            .collect();
        views.sort_by_key(|v| v.handle.0);
        views
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_progress_claim_is_exclusive() {
        let set = Mutex::new(HashSet::new());
        let p = PathBuf::from("/tmp/libx.so");

        let first = InProgress::claim(&set, p.clone()).unwrap();
        let err = InProgress::claim(&set, p.clone()).unwrap_err();
        assert!(matches!(err, ExtError::LoadInProgress(_)));

        drop(first);
        // released on drop, a fresh attempt may proceed
        InProgress::claim(&set, p).unwrap();
    }

    #[test]
    fn stale_handle_reports_already_unloaded() {
        let mgr = LifecycleManager::new(Box::new(crate::loader::DlLoader), 1);
        let registry = CapabilityRegistry::new();
        let err = mgr
            .unload(&registry, ExtensionHandle::from_raw(99), true)
            .unwrap_err();
        assert!(matches!(err, ExtError::AlreadyUnloaded));
    }
}
