//! Host-level configuration handed to the subsystem at engine startup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Direct file override: if set and readable, wins over every search rule.
pub const ENV_EXTENSION_PATH: &str = "SILT_EXTENSION_PATH";
/// Extra search directory, tried before the configured and default dirs.
pub const ENV_EXTENSION_DIR: &str = "SILT_EXTENSION_DIR";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    /// Directories searched (in order) when a logical name is not a path.
    #[serde(default)]
    pub extension_dirs: Vec<PathBuf>,

    /// Initial state of the loading toggle. Off by default; embedders opt in,
    /// same as the sqlite-style clients this engine serves.
    #[serde(default)]
    pub allow_loading: bool,
}

/// ~/.local/share/Silt/extensions (or platform equivalent).
pub fn default_extensions_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("Silt")
        .join("extensions")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_to_loading_disabled() {
        let cfg: HostConfig = serde_json::from_str("{}").unwrap();
        assert!(!cfg.allow_loading);
        assert!(cfg.extension_dirs.is_empty());
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = HostConfig {
            extension_dirs: vec![PathBuf::from("/opt/silt/ext")],
            allow_loading: true,
        };
        let back: HostConfig = serde_json::from_str(&serde_json::to_string(&cfg).unwrap()).unwrap();
        assert!(back.allow_loading);
        assert_eq!(back.extension_dirs, cfg.extension_dirs);
    }
}
