//! Entry-point resolution, ABI handshake, and the init-time registration bridge.
//!
//! The module's entry point runs with an [`ExtensionApi`] whose `ctx` points
//! at a host-owned [`RegistrationSink`]. Registrations land in the sink, not
//! the registry; the lifecycle manager commits them only after init and the
//! version handshake both succeed, so no partial registration ever survives a
//! failed load.

use std::ffi::{c_char, c_void, CStr};

use silt_abi::ffi::{
    AggregateDef, ExtensionApi, ModuleDef, ScalarDef, TableFnDef, ERR_FAIL, ERR_OK, INIT_FAIL,
};

use crate::errors::{ExtError, Result};
use crate::loader::NativeModule;
use crate::registry::{valid_bounds, CapabilityImpl};

#[derive(Debug)]
pub(crate) struct PendingCapability {
    pub name: String,
    pub min_args: i32,
    pub max_args: i32,
    pub imp: CapabilityImpl,
}

/// Receives registrations while one init call runs. It stays alive (closed)
/// in the module's slot afterwards, so a stashed `ctx` pointer used late gets
/// a clean `ERR_FAIL` instead of a dangling read.
#[derive(Debug)]
pub(crate) struct RegistrationSink {
    open: bool,
    pending: Vec<PendingCapability>,
    error: Option<ExtError>,
}

impl RegistrationSink {
    fn reject(&mut self, name: &str, reason: String) {
        // first rejection wins; it fails the whole load at commit time
        if self.error.is_none() {
            self.error = Some(ExtError::InvalidSignature {
                name: name.to_string(),
                reason,
            });
        }
    }

    fn accept(
        &mut self,
        name_ptr: *const c_char,
        min_args: i32,
        max_args: i32,
        imp: CapabilityImpl,
    ) -> i32 {
        if !self.open {
            return ERR_FAIL;
        }
        let name = match def_name(name_ptr) {
            Ok(n) => n,
            Err(reason) => {
                self.reject("?", reason);
                return ERR_FAIL;
            }
        };
        if !valid_bounds(min_args, max_args) {
            self.reject(&name, format!("bad arity bounds {min_args}..{max_args}"));
            return ERR_FAIL;
        }
        self.pending.push(PendingCapability {
            name,
            min_args,
            max_args,
            imp,
        });
        ERR_OK
    }
}

fn def_name(ptr: *const c_char) -> std::result::Result<String, String> {
    if ptr.is_null() {
        return Err("null name".to_string());
    }
    let s = unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| "name is not UTF-8".to_string())?;
    if s.is_empty() {
        return Err("empty name".to_string());
    }
    if s.len() > 255 {
        return Err("name longer than 255 bytes".to_string());
    }
    Ok(s.to_string())
}

unsafe fn sink_mut<'a>(ctx: *mut c_void) -> Option<&'a mut RegistrationSink> {
    (ctx as *mut RegistrationSink).as_mut()
}

// ---------- C trampolines handed to the module ----------

unsafe extern "C" fn reg_scalar(ctx: *mut c_void, def: *const ScalarDef) -> i32 {
    let Some(sink) = sink_mut(ctx) else {
        return ERR_FAIL;
    };
    let Some(def) = def.as_ref() else {
        sink.reject("?", "null scalar definition".to_string());
        return ERR_FAIL;
    };
    sink.accept(
        def.name,
        def.min_args,
        def.max_args,
        CapabilityImpl::Scalar {
            invoke: def.invoke,
            free_result: def.free_result,
        },
    )
}

unsafe extern "C" fn reg_aggregate(ctx: *mut c_void, def: *const AggregateDef) -> i32 {
    let Some(sink) = sink_mut(ctx) else {
        return ERR_FAIL;
    };
    let Some(def) = def.as_ref() else {
        sink.reject("?", "null aggregate definition".to_string());
        return ERR_FAIL;
    };
    sink.accept(
        def.name,
        def.min_args,
        def.max_args,
        CapabilityImpl::Aggregate {
            init: def.init,
            step: def.step,
            fin: def.fin,
            free_result: def.free_result,
        },
    )
}

unsafe extern "C" fn reg_table_fn(ctx: *mut c_void, def: *const TableFnDef) -> i32 {
    let Some(sink) = sink_mut(ctx) else {
        return ERR_FAIL;
    };
    let Some(def) = def.as_ref() else {
        sink.reject("?", "null table function definition".to_string());
        return ERR_FAIL;
    };
    if def.n_cols == 0 {
        sink.reject("?", "table function declares zero columns".to_string());
        return ERR_FAIL;
    }
    sink.accept(
        def.name,
        def.min_args,
        def.max_args,
        CapabilityImpl::TableValued {
            n_cols: def.n_cols,
            open: def.open,
            next: def.next,
            close: def.close,
            free_result: def.free_result,
        },
    )
}

unsafe extern "C" fn reg_module(ctx: *mut c_void, def: *const ModuleDef) -> i32 {
    let Some(sink) = sink_mut(ctx) else {
        return ERR_FAIL;
    };
    let Some(def) = def.as_ref() else {
        sink.reject("?", "null module definition".to_string());
        return ERR_FAIL;
    };
    if def.module.is_null() {
        sink.reject("?", "null vtab module pointer".to_string());
        return ERR_FAIL;
    }
    // modules carry no call-site arity
    sink.accept(def.name, 0, -1, CapabilityImpl::Module { vtab: def.module })
}

#[derive(Debug)]
pub(crate) struct InitOutcome {
    /// Minimum host ABI the module declared during the handshake.
    pub required_version: u32,
    pub pending: Vec<PendingCapability>,
    /// Kept in the slot so late registration attempts stay memory-safe.
    pub sink: Box<RegistrationSink>,
}

/// Resolve the entry symbol, run init with a fresh sink, and enforce the
/// version handshake. On any failure the caller gets an error and the sink's
/// pending registrations are discarded unseen by the registry.
pub(crate) fn resolve_and_init(
    module: &dyn NativeModule,
    entry_symbol: &str,
    host_version: u32,
) -> Result<InitOutcome> {
    let entry = module.entry(entry_symbol).map_err(|e| match e {
        ExtError::SymbolNotFound(sym) => ExtError::NoEntryPoint(sym),
        other => other,
    })?;

    let mut sink = Box::new(RegistrationSink {
        open: true,
        pending: Vec::new(),
        error: None,
    });
    let api = ExtensionApi {
        ctx: sink.as_mut() as *mut RegistrationSink as *mut c_void,
        register_scalar: reg_scalar,
        register_aggregate: reg_aggregate,
        register_table_fn: reg_table_fn,
        register_module: reg_module,
    };

    let required = unsafe { entry(&api, host_version) };
    sink.open = false;

    if required == INIT_FAIL {
        return Err(ExtError::LoadError {
            reason: "entry point reported init failure".to_string(),
        });
    }
    if required > host_version {
        return Err(ExtError::IncompatibleVersion {
            required,
            actual: host_version,
        });
    }
    if let Some(err) = sink.error.take() {
        return Err(err);
    }

    let pending = std::mem::take(&mut sink.pending);
    Ok(InitOutcome {
        required_version: required,
        pending,
        sink,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use silt_abi::ffi::{ExtensionEntryFn, ScalarFn, SILT_ABI_VERSION};
    use silt_abi::value::SiltValue;
    use std::ffi::CString;

    struct FakeModule(Option<ExtensionEntryFn>);

    impl NativeModule for FakeModule {
        fn entry(&self, symbol: &str) -> Result<ExtensionEntryFn> {
            self.0
                .ok_or_else(|| ExtError::SymbolNotFound(symbol.to_string()))
        }
    }

    unsafe extern "C" fn identity(_argc: u32, argv: *const SiltValue, out: *mut SiltValue) -> i32 {
        *out = *argv;
        ERR_OK
    }

    fn scalar_def(name: &CString, min: i32, max: i32, invoke: ScalarFn) -> ScalarDef {
        ScalarDef {
            name: name.as_ptr(),
            min_args: min,
            max_args: max,
            invoke,
            free_result: None,
        }
    }

    unsafe extern "C" fn entry_register_one(api: *const ExtensionApi, host_version: u32) -> u32 {
        let api = &*api;
        let name = CString::new("ident").unwrap();
        let def = scalar_def(&name, 1, 1, identity);
        assert_eq!((api.register_scalar)(api.ctx, &def), ERR_OK);
        host_version
    }

    unsafe extern "C" fn entry_too_new(api: *const ExtensionApi, host_version: u32) -> u32 {
        let api = &*api;
        let name = CString::new("ghost").unwrap();
        let def = scalar_def(&name, 0, 0, identity);
        (api.register_scalar)(api.ctx, &def);
        host_version + 1
    }

    unsafe extern "C" fn entry_hard_fail(_api: *const ExtensionApi, _host_version: u32) -> u32 {
        INIT_FAIL
    }

    #[test]
    fn init_collects_registrations_and_version() {
        let module = FakeModule(Some(entry_register_one));
        let out = resolve_and_init(&module, "silt_extension_init", SILT_ABI_VERSION).unwrap();
        assert_eq!(out.required_version, SILT_ABI_VERSION);
        assert_eq!(out.pending.len(), 1);
        assert_eq!(out.pending[0].name, "ident");
    }

    #[test]
    fn missing_symbol_is_no_entry_point() {
        let module = FakeModule(None);
        let err =
            resolve_and_init(&module, "silt_extension_init", SILT_ABI_VERSION).unwrap_err();
        assert!(matches!(err, ExtError::NoEntryPoint(_)));
    }

    #[test]
    fn newer_module_is_rejected_with_nothing_kept() {
        let module = FakeModule(Some(entry_too_new));
        let err =
            resolve_and_init(&module, "silt_extension_init", SILT_ABI_VERSION).unwrap_err();
        match err {
            ExtError::IncompatibleVersion { required, actual } => {
                assert_eq!(required, SILT_ABI_VERSION + 1);
                assert_eq!(actual, SILT_ABI_VERSION);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn init_fail_sentinel_is_a_load_error() {
        let module = FakeModule(Some(entry_hard_fail));
        let err =
            resolve_and_init(&module, "silt_extension_init", SILT_ABI_VERSION).unwrap_err();
        assert!(matches!(err, ExtError::LoadError { .. }));
    }

    #[test]
    fn closed_sink_rejects_late_registration() {
        let mut sink = RegistrationSink {
            open: false,
            pending: Vec::new(),
            error: None,
        };
        let name = CString::new("late").unwrap();
        let def = scalar_def(&name, 0, 0, identity);
        let rc = unsafe {
            reg_scalar(
                &mut sink as *mut RegistrationSink as *mut c_void,
                &def,
            )
        };
        assert_eq!(rc, ERR_FAIL);
        assert!(sink.pending.is_empty());
    }

    #[test]
    fn invalid_definition_fails_the_load() {
        unsafe extern "C" fn entry_bad_bounds(api: *const ExtensionApi, host: u32) -> u32 {
            let api = &*api;
            let name = CString::new("bad").unwrap();
            let def = scalar_def(&name, 3, 1, identity);
            assert_eq!((api.register_scalar)(api.ctx, &def), ERR_FAIL);
            host
        }
        let module = FakeModule(Some(entry_bad_bounds));
        let err =
            resolve_and_init(&module, "silt_extension_init", SILT_ABI_VERSION).unwrap_err();
        assert!(matches!(err, ExtError::InvalidSignature { .. }));
    }
}
