//! Hub configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable overriding the plugin search paths
/// (colon-separated).
pub const ENV_PLUGIN_DIRS: &str = "HESTIA_PLUGIN_DIRS";
/// Environment variable overriding the storage path.
pub const ENV_STORAGE_PATH: &str = "HESTIA_STORAGE_PATH";

/// Configuration of the device orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Directories scanned for native plugin artifacts.
    #[serde(default = "default_plugin_dirs")]
    pub plugin_dirs: Vec<PathBuf>,

    /// Path of the redb store holding device and plugin configuration.
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
}

fn default_plugin_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/lib/hestia/plugins"),
        PathBuf::from("plugins"),
    ]
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/hestia.redb")
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            plugin_dirs: default_plugin_dirs(),
            storage_path: default_storage_path(),
        }
    }
}

impl HubConfig {
    /// Defaults with environment-variable overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dirs) = std::env::var(ENV_PLUGIN_DIRS) {
            config.plugin_dirs = dirs.split(':').map(PathBuf::from).collect();
        }
        if let Ok(path) = std::env::var(ENV_STORAGE_PATH) {
            config.storage_path = PathBuf::from(path);
        }
        config
    }

    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }

    pub fn with_plugin_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.plugin_dirs = dirs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HubConfig::default();
        assert!(!config.plugin_dirs.is_empty());
        assert_eq!(config.storage_path, PathBuf::from("data/hestia.redb"));
    }

    #[test]
    fn test_builders() {
        let config = HubConfig::default()
            .with_storage_path("/tmp/hub.redb")
            .with_plugin_dirs(vec![PathBuf::from("/opt/plugins")]);
        assert_eq!(config.storage_path, PathBuf::from("/tmp/hub.redb"));
        assert_eq!(config.plugin_dirs, vec![PathBuf::from("/opt/plugins")]);
    }
}
