//! Dylib loading, kept small & isolated behind a seam.
//!
//! Safety note:
//! - The entry fn pointer returned by [`NativeModule::entry`] is only valid
//!   while the module object is alive; the lifecycle manager retains the
//!   module for as long as anything can reach pointers into it.
//! - Any failure from the dynamic linker is captured and surfaced as
//!   [`ExtError::LoadError`], never propagated as a fault.

use std::path::Path;

use libloading::Library;
use silt_abi::ExtensionEntryFn;

use crate::errors::{ExtError, Result};

/// One loaded native module. The entry point is the only symbol the host ever
/// resolves by name; every other native pointer arrives through registration.
pub trait NativeModule: Send {
    /// Resolve the init entry point by exported symbol name.
    /// Fails with [`ExtError::SymbolNotFound`] if the export is absent.
    fn entry(&self, symbol: &str) -> Result<ExtensionEntryFn>;
}

impl std::fmt::Debug for dyn NativeModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn NativeModule")
    }
}

/// Seam over the platform's dynamic-linking facility. Production code uses
/// [`DlLoader`]; tests substitute in-process modules.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn NativeModule>>;
}

/// `dlopen`/`LoadLibrary`-backed loader.
pub struct DlLoader;

struct DlModule {
    lib: Library,
}

impl ModuleLoader for DlLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn NativeModule>> {
        let lib = unsafe { Library::new(path) }.map_err(|e| ExtError::LoadError {
            reason: format!("dlopen {}: {e}", path.display()),
        })?;
        Ok(Box::new(DlModule { lib }))
    }
}

impl NativeModule for DlModule {
    fn entry(&self, symbol: &str) -> Result<ExtensionEntryFn> {
        let sym: libloading::Symbol<ExtensionEntryFn> = unsafe {
            self.lib
                .get(symbol.as_bytes())
                .map_err(|_| ExtError::SymbolNotFound(symbol.to_string()))?
        };
        Ok(*sym)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_library_is_a_load_error_not_a_fault() {
        let tmp = tempfile::tempdir().unwrap();
        let bogus = tmp.path().join("notalib.so");
        std::fs::write(&bogus, b"this is not native code").unwrap();

        let err = DlLoader.load(&bogus).unwrap_err();
        assert!(matches!(err, ExtError::LoadError { .. }));
    }
}
