//! Host configuration
//!
//! # Configuration Sources (in priority order)
//!
//! 1. Environment variable: `VOID_MODHOST_CONFIG=/path/to/modhost.toml`
//! 2. `modhost.toml` in the working directory
//! 3. Built-in defaults
//!
//! # Example Config File
//!
//! ```toml
//! [reclaim]
//! max_attempts = 10     # reclamation polls before giving up
//! poll_interval_ms = 0  # pause between polls, 0 = yield only
//!
//! [loader]
//! shadow_copy = true
//! shadow_dir = "target/modhost-shadow"
//!
//! [hot_reload]
//! enabled = true
//! debounce_ms = 500
//! watch_directories = ["scripts/bin"]
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a config file
pub const CONFIG_ENV_VAR: &str = "VOID_MODHOST_CONFIG";

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "modhost.toml";

/// Reclamation polling after a generation is retired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReclaimConfig {
    /// Maximum number of reclamation passes
    pub max_attempts: u32,
    /// Pause between passes in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            poll_interval_ms: 0,
        }
    }
}

impl ReclaimConfig {
    /// Attempts, never less than one
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Dynamic library loading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Load a private copy of each module file
    pub shadow_copy: bool,
    /// Where shadow copies go; defaults to a directory under the system temp dir
    pub shadow_dir: Option<PathBuf>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            shadow_copy: true,
            shadow_dir: None,
        }
    }
}

impl LoaderConfig {
    /// Effective shadow directory
    pub fn shadow_dir(&self) -> PathBuf {
        self.shadow_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("void-modhost"))
    }
}

/// File-watch driven reloading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotReloadConfig {
    /// Whether to watch module files at all
    pub enabled: bool,
    /// Wait for file changes to settle (milliseconds)
    pub debounce_ms: u64,
    /// Directories to watch for rebuilt modules
    pub watch_directories: Vec<PathBuf>,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 500,
            watch_directories: vec![PathBuf::from(".")],
        }
    }
}

impl HotReloadConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Complete host configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub reclaim: ReclaimConfig,
    pub loader: LoaderConfig,
    pub hot_reload: HotReloadConfig,
}

impl HostConfig {
    /// Parse from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load from a TOML file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from the environment variable, the default file, or defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            match Self::load_from_file(&path) {
                Ok(config) => {
                    log::info!("Loaded module host config from {}", path);
                    return config;
                }
                Err(e) => log::warn!("Ignoring {}={}: {}", CONFIG_ENV_VAR, path, e),
            }
        }

        if Path::new(DEFAULT_CONFIG_FILE).exists() {
            match Self::load_from_file(DEFAULT_CONFIG_FILE) {
                Ok(config) => {
                    log::info!("Loaded module host config from {}", DEFAULT_CONFIG_FILE);
                    return config;
                }
                Err(e) => log::warn!("Ignoring {}: {}", DEFAULT_CONFIG_FILE, e),
            }
        }

        log::debug!("Using default module host config");
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.reclaim.max_attempts, 10);
        assert_eq!(config.reclaim.poll_interval(), Duration::ZERO);
        assert!(config.loader.shadow_copy);
        assert_eq!(config.hot_reload.debounce(), Duration::from_millis(500));
    }

    #[test]
    fn test_config_parsing() {
        let toml = r#"
            [reclaim]
            max_attempts = 3

            [hot_reload]
            enabled = false
        "#;

        let config = HostConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.reclaim.max_attempts, 3);
        assert_eq!(config.reclaim.poll_interval_ms, 0);
        assert!(!config.hot_reload.enabled);
        assert_eq!(config.hot_reload.debounce_ms, 500);
        assert_eq!(config.loader, LoaderConfig::default());
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let config = HostConfig::from_toml_str("[reclaim]\nmax_attempts = 0\n").unwrap();
        assert_eq!(config.reclaim.attempts(), 1);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            HostConfig::from_toml_str("[reclaim]\nmax_attempts = \"many\"\n"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            HostConfig::load_from_file("/definitely/not/here.toml"),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[loader]\nshadow_copy = false\nshadow_dir = \"shadows\"").unwrap();

        let config = HostConfig::load_from_file(file.path()).unwrap();
        assert!(!config.loader.shadow_copy);
        assert_eq!(config.loader.shadow_dir(), PathBuf::from("shadows"));
    }
}
