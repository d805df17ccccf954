//! Process-local capability table queried by SQL name resolution.
//!
//! One registry per engine instance (owned by the [`crate::Host`]), never a
//! process singleton, so multiple embedded engines do not share extensions.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use silt_abi::ffi::{
    AggFinalFn, AggInitFn, AggStepFn, FreeValueFn, ScalarFn, TableCloseFn, TableNextFn,
    TableOpenFn, VtabModule,
};

use crate::errors::{ExtError, Result};
use crate::lifecycle::ExtensionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CapabilityKind {
    Scalar,
    Aggregate,
    TableValued,
    Module,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CapabilityKind::Scalar => "scalar function",
            CapabilityKind::Aggregate => "aggregate function",
            CapabilityKind::TableValued => "table-valued function",
            CapabilityKind::Module => "virtual-table module",
        })
    }
}

/// The native side of one capability. Fn pointers are plain `Send + Sync`
/// data; the raw vtab pointer stays valid because the lifecycle manager
/// retains the owning library while any descriptor can still be reached.
#[derive(Debug)]
pub(crate) enum CapabilityImpl {
    Scalar {
        invoke: ScalarFn,
        free_result: Option<FreeValueFn>,
    },
    Aggregate {
        init: AggInitFn,
        step: AggStepFn,
        fin: AggFinalFn,
        free_result: Option<FreeValueFn>,
    },
    TableValued {
        n_cols: u32,
        open: TableOpenFn,
        next: TableNextFn,
        close: TableCloseFn,
        free_result: Option<FreeValueFn>,
    },
    Module {
        vtab: *const VtabModule,
    },
}

unsafe impl Send for CapabilityImpl {}
unsafe impl Sync for CapabilityImpl {}

impl CapabilityImpl {
    pub(crate) fn kind(&self) -> CapabilityKind {
        match self {
            CapabilityImpl::Scalar { .. } => CapabilityKind::Scalar,
            CapabilityImpl::Aggregate { .. } => CapabilityKind::Aggregate,
            CapabilityImpl::TableValued { .. } => CapabilityKind::TableValued,
            CapabilityImpl::Module { .. } => CapabilityKind::Module,
        }
    }
}

/// One registered capability. Holds the owning handle id (not the library
/// itself); the invocation adapter re-checks owner liveness before each call.
#[derive(Debug)]
pub struct CapabilityDescriptor {
    /// Name as registered (lookups fold case).
    pub name: String,
    pub kind: CapabilityKind,
    pub min_args: i32,
    /// `-1` = unbounded.
    pub max_args: i32,
    pub owner: ExtensionHandle,
    pub(crate) imp: CapabilityImpl,
}

impl CapabilityDescriptor {
    pub fn accepts_arity(&self, given: usize) -> bool {
        let given = given as i64;
        given >= self.min_args as i64 && (self.max_args == -1 || given <= self.max_args as i64)
    }

    /// Raw vtable pointer for `Module` descriptors. Only valid while the
    /// owner is loaded; the planner goes through `Host::with_module_vtab`,
    /// which holds the liveness guard for the duration of the access.
    pub(crate) fn module_vtab(&self) -> Option<*const VtabModule> {
        match self.imp {
            CapabilityImpl::Module { vtab } => Some(vtab),
            _ => None,
        }
    }
}

pub(crate) fn valid_bounds(min_args: i32, max_args: i32) -> bool {
    min_args >= 0 && (max_args == -1 || max_args >= min_args)
}

fn key(kind: CapabilityKind, name: &str) -> (CapabilityKind, String) {
    (kind, name.to_ascii_lowercase())
}

/// Mapping from `(kind, folded name)` to descriptor. Mutated only by a
/// successful init commit or by `unregister_all` during unload; concurrent
/// lookups see the pre- or post-mutation table, never a partial one.
pub struct CapabilityRegistry {
    inner: RwLock<HashMap<(CapabilityKind, String), Arc<CapabilityDescriptor>>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Commit one module's registrations atomically: the whole batch is
    /// validated against the table (and itself) before anything lands, so a
    /// failed load leaves the registry untouched.
    pub(crate) fn register_all(&self, batch: Vec<CapabilityDescriptor>) -> Result<()> {
        let mut map = self.inner.write().unwrap();

        let mut seen: HashSet<(CapabilityKind, String)> = HashSet::new();
        for desc in &batch {
            if !valid_bounds(desc.min_args, desc.max_args) {
                return Err(ExtError::InvalidSignature {
                    name: desc.name.clone(),
                    reason: format!("bad arity bounds {}..{}", desc.min_args, desc.max_args),
                });
            }
            let k = key(desc.kind, &desc.name);
            if map.contains_key(&k) || !seen.insert(k) {
                return Err(ExtError::NameConflict {
                    kind: desc.kind,
                    name: desc.name.clone(),
                });
            }
        }

        for desc in batch {
            let k = key(desc.kind, &desc.name);
            map.insert(k, Arc::new(desc));
        }
        Ok(())
    }

    /// Name resolution for a call site with `given` arguments. Arity is
    /// validated here, never by truncating or padding at dispatch.
    pub fn lookup(
        &self,
        kind: CapabilityKind,
        name: &str,
        given: usize,
    ) -> Result<Arc<CapabilityDescriptor>> {
        let desc = self.resolve(kind, name)?;
        if !desc.accepts_arity(given) {
            return Err(ExtError::ArityMismatch {
                name: desc.name.clone(),
                given,
                min: desc.min_args,
                max: desc.max_args,
            });
        }
        Ok(desc)
    }

    /// Name resolution without an arity check (virtual-table modules carry no
    /// call-site argument count).
    pub fn resolve(&self, kind: CapabilityKind, name: &str) -> Result<Arc<CapabilityDescriptor>> {
        let map = self.inner.read().unwrap();
        map.get(&key(kind, name))
            .cloned()
            .ok_or_else(|| ExtError::NotFound {
                kind,
                name: name.to_string(),
            })
    }

    /// Remove every descriptor owned by `owner`. Holds the write lock for the
    /// whole removal pass, so lookups see the full pre- or post-state.
    pub(crate) fn unregister_all(&self, owner: ExtensionHandle) -> usize {
        let mut map = self.inner.write().unwrap();
        let before = map.len();
        map.retain(|_, d| d.owner != owner);
        before - map.len()
    }

    pub fn owned_by(&self, owner: ExtensionHandle) -> usize {
        let map = self.inner.read().unwrap();
        map.values().filter(|d| d.owner == owner).count()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silt_abi::value::SiltValue;

    unsafe extern "C" fn noop_scalar(
        _argc: u32,
        _argv: *const SiltValue,
        out: *mut SiltValue,
    ) -> i32 {
        *out = SiltValue::null();
        silt_abi::ERR_OK
    }

    fn scalar(name: &str, owner: u64, min: i32, max: i32) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: name.to_string(),
            kind: CapabilityKind::Scalar,
            min_args: min,
            max_args: max,
            owner: ExtensionHandle::from_raw(owner),
            imp: CapabilityImpl::Scalar {
                invoke: noop_scalar,
                free_result: None,
            },
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let reg = CapabilityRegistry::new();
        reg.register_all(vec![scalar("Double_It", 1, 1, 1)]).unwrap();
        assert!(reg.lookup(CapabilityKind::Scalar, "DOUBLE_it", 1).is_ok());
    }

    #[test]
    fn duplicate_name_within_a_kind_is_a_conflict() {
        let reg = CapabilityRegistry::new();
        reg.register_all(vec![scalar("util", 1, 0, -1)]).unwrap();
        let err = reg
            .register_all(vec![scalar("UTIL", 2, 0, -1)])
            .unwrap_err();
        assert!(matches!(err, ExtError::NameConflict { .. }));
        // first registration remains active
        assert_eq!(reg.resolve(CapabilityKind::Scalar, "util").unwrap().owner,
                   ExtensionHandle::from_raw(1));
    }

    #[test]
    fn conflicting_batch_commits_nothing() {
        let reg = CapabilityRegistry::new();
        reg.register_all(vec![scalar("util", 1, 0, -1)]).unwrap();
        let err = reg
            .register_all(vec![scalar("fresh", 2, 0, -1), scalar("util", 2, 0, -1)])
            .unwrap_err();
        assert!(matches!(err, ExtError::NameConflict { .. }));
        assert!(reg.resolve(CapabilityKind::Scalar, "fresh").is_err());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn arity_is_validated_at_lookup() {
        let reg = CapabilityRegistry::new();
        reg.register_all(vec![scalar("pad", 1, 1, 2)]).unwrap();
        assert!(reg.lookup(CapabilityKind::Scalar, "pad", 2).is_ok());
        let err = reg.lookup(CapabilityKind::Scalar, "pad", 3).unwrap_err();
        assert!(matches!(err, ExtError::ArityMismatch { given: 3, .. }));
        let err = reg.lookup(CapabilityKind::Scalar, "pad", 0).unwrap_err();
        assert!(matches!(err, ExtError::ArityMismatch { .. }));
    }

    #[test]
    fn unbounded_arity_accepts_anything_above_min() {
        let reg = CapabilityRegistry::new();
        reg.register_all(vec![scalar("cat", 1, 1, -1)]).unwrap();
        assert!(reg.lookup(CapabilityKind::Scalar, "cat", 64).is_ok());
    }

    #[test]
    fn bad_bounds_are_an_invalid_signature() {
        let reg = CapabilityRegistry::new();
        let err = reg.register_all(vec![scalar("bad", 1, 3, 1)]).unwrap_err();
        assert!(matches!(err, ExtError::InvalidSignature { .. }));
    }

    #[test]
    fn unregister_all_removes_exactly_one_owner() {
        let reg = CapabilityRegistry::new();
        reg.register_all(vec![scalar("a", 1, 0, 0), scalar("b", 1, 0, 0)])
            .unwrap();
        reg.register_all(vec![scalar("c", 2, 0, 0)]).unwrap();

        assert_eq!(reg.unregister_all(ExtensionHandle::from_raw(1)), 2);
        assert!(reg.resolve(CapabilityKind::Scalar, "a").is_err());
        assert!(reg.resolve(CapabilityKind::Scalar, "c").is_ok());
    }
}
