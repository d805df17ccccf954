//! Platform-specific resolution of a logical extension name to a library file.

use once_cell::sync::Lazy;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::config::{HostConfig, ENV_EXTENSION_DIR, ENV_EXTENSION_PATH};
use crate::errors::{ExtError, Result};

static DEFAULT_DIR: Lazy<PathBuf> = Lazy::new(crate::config::default_extensions_dir);

pub(crate) fn shared_lib_suffix() -> &'static str {
    if cfg!(target_os = "windows") {
        "dll"
    } else if cfg!(target_os = "macos") {
        "dylib"
    } else {
        "so"
    }
}

/// Canonical library file name for a logical extension name on this platform
/// (e.g. `mathx` -> `libmathx.so` / `libmathx.dylib` / `mathx.dll`).
pub fn shared_library_filename(name: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{name}.{}", shared_lib_suffix())
    } else {
        format!("lib{name}.{}", shared_lib_suffix())
    }
}

/// Names tried for one logical name, in order. A name already carrying the
/// platform suffix is taken literally.
fn candidate_names(name: &str) -> Vec<String> {
    let suffix = shared_lib_suffix();
    if name.ends_with(&format!(".{suffix}")) {
        return vec![name.to_string()];
    }
    let mut names = vec![format!("{name}.{suffix}")];
    if !cfg!(target_os = "windows") && !name.starts_with("lib") {
        names.push(format!("lib{name}.{suffix}"));
    }
    // Some packagers ship suffix-less binaries (the original clients load "js").
    names.push(name.to_string());
    names
}

fn readable_file(path: &Path) -> bool {
    path.is_file() && fs::File::open(path).is_ok()
}

/// Resolve `spec` (name or path, possibly suffix-less) to the first existing,
/// readable library file. Pure path resolution plus existence checks.
pub fn locate_extension(spec: &str, cfg: &HostConfig) -> Result<PathBuf> {
    if let Ok(p) = env::var(ENV_EXTENSION_PATH) {
        let p = PathBuf::from(p);
        if readable_file(&p) {
            eprintln!("[ext] {ENV_EXTENSION_PATH} = {}", p.display());
            return Ok(p);
        }
        eprintln!(
            "[ext] {ENV_EXTENSION_PATH} points to missing file: {}",
            p.display()
        );
    }

    let spec_path = Path::new(spec);
    let has_dir = spec_path.is_absolute()
        || spec_path
            .parent()
            .is_some_and(|p| !p.as_os_str().is_empty());

    // Explicit path: resolve against its own directory only.
    if has_dir {
        let dir = spec_path.parent().unwrap_or(Path::new("."));
        let file = spec_path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(spec);
        for name in candidate_names(file) {
            let candidate = dir.join(name);
            if readable_file(&candidate) {
                return Ok(candidate);
            }
        }
        return Err(ExtError::ExtensionNotFound(spec.to_string()));
    }

    // Bare name: cwd, env dir, configured dirs, then the user-level default.
    let mut search = vec![PathBuf::from(".")];
    if let Ok(d) = env::var(ENV_EXTENSION_DIR) {
        search.push(PathBuf::from(d));
    }
    search.extend(cfg.extension_dirs.iter().cloned());
    search.push(DEFAULT_DIR.clone());

    for dir in &search {
        for name in candidate_names(spec) {
            let candidate = dir.join(name);
            if readable_file(&candidate) {
                return Ok(candidate);
            }
        }
    }
    Err(ExtError::ExtensionNotFound(spec.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg_with(dir: &Path) -> HostConfig {
        HostConfig {
            extension_dirs: vec![dir.to_path_buf()],
            allow_loading: true,
        }
    }

    #[test]
    fn bare_name_resolves_in_configured_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join(shared_library_filename("mathx"));
        fs::write(&file, b"").unwrap();

        let found = locate_extension("mathx", &cfg_with(tmp.path())).unwrap();
        assert_eq!(found, file);
    }

    #[test]
    fn explicit_path_gets_the_platform_suffix_appended() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp
            .path()
            .join(format!("mathx.{}", shared_lib_suffix()));
        fs::write(&file, b"").unwrap();

        let spec = tmp.path().join("mathx");
        let found = locate_extension(spec.to_str().unwrap(), &HostConfig::default()).unwrap();
        assert_eq!(found, file);
    }

    #[test]
    fn suffixed_name_is_taken_literally() {
        let name = format!("mathx.{}", shared_lib_suffix());
        assert_eq!(candidate_names(&name), vec![name]);
    }

    #[test]
    fn missing_name_reports_extension_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = locate_extension("missing", &cfg_with(tmp.path())).unwrap_err();
        assert!(matches!(err, ExtError::ExtensionNotFound(n) if n == "missing"));
    }
}
