//! Configuration management for the Schema Registry
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (registry.toml)
//! - Environment variables (SCHEMA_REGISTRY__*)
//!
//! ## Example config file (registry.toml):
//! ```toml
//! [compatibility]
//! default_level = "BACKWARD"
//! default_mode = "READWRITE"
//!
//! [storage]
//! backend = "sqlite"
//! path = "./registry.db"
//! busy_timeout_ms = 5000
//! read_pool_size = 4
//!
//! [registration]
//! max_append_attempts = 32
//! request_timeout_ms = 2000
//!
//! [cache]
//! enabled = true
//! capacity = 1000
//! ttl_secs = 300
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::compatibility::CompatibilityMode;
use crate::mode::WriteMode;

/// Main configuration for the schema registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Process-wide fallbacks for config and mode
    #[serde(default)]
    pub compatibility: CompatibilityConfig,

    /// Storage backend settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Registration behavior
    #[serde(default)]
    pub registration: RegistrationConfig,

    /// Read cache settings
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Defaults applied when storage holds no override
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityConfig {
    #[serde(default)]
    pub default_level: CompatibilityMode,

    #[serde(default)]
    pub default_mode: WriteMode,
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Database file (sqlite only)
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    /// How long a writer waits for the database lock
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Read-only connections opened next to the writer (sqlite only)
    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: usize,
}

/// Registration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Optimistic append retries before giving up with `WriteContention`
    #[serde(default = "default_max_append_attempts")]
    pub max_append_attempts: u32,

    /// Deadline applied to writes that do not carry their own
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

/// Immutable process-wide fallbacks handed to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryDefaults {
    pub compatibility: CompatibilityMode,
    pub mode: WriteMode,
    pub max_append_attempts: u32,
    pub request_timeout: Option<Duration>,
}

impl Default for RegistryDefaults {
    fn default() -> Self {
        Self {
            compatibility: CompatibilityMode::default(),
            mode: WriteMode::default(),
            max_append_attempts: default_max_append_attempts(),
            request_timeout: None,
        }
    }
}

// Default value functions
fn default_storage_path() -> PathBuf {
    PathBuf::from("registry.db")
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_read_pool_size() -> usize {
    4
}

fn default_max_append_attempts() -> u32 {
    32
}

fn default_true() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    1_000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for CompatibilityConfig {
    fn default() -> Self {
        Self {
            default_level: CompatibilityMode::Backward,
            default_mode: WriteMode::ReadWrite,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: default_storage_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            read_pool_size: default_read_pool_size(),
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            max_append_attempts: default_max_append_attempts(),
            request_timeout_ms: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl RegistryConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = ["registry.toml", ".registry.toml", "config/registry.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "schema-registry") {
            let xdg_config = config_dir.config_dir().join("registry.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (SCHEMA_REGISTRY__*)
        builder = builder.add_source(
            Environment::with_prefix("SCHEMA_REGISTRY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// The orchestrator's immutable defaults
    pub fn defaults(&self) -> RegistryDefaults {
        RegistryDefaults {
            compatibility: self.compatibility.default_level,
            mode: self.compatibility.default_mode,
            max_append_attempts: self.registration.max_append_attempts.max(1),
            request_timeout: self.registration.request_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Get the storage path (resolves relative paths)
    pub fn storage_path(&self) -> PathBuf {
        if self.storage.path.is_absolute() {
            self.storage.path.clone()
        } else {
            std::env::current_dir().unwrap_or_default().join(&self.storage.path)
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.busy_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.compatibility.default_level, CompatibilityMode::Backward);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.registration.max_append_attempts, 32);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_serialize_config() {
        let config = RegistryConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[compatibility]"));
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("default_level = \"BACKWARD\""));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[compatibility]\ndefault_level = \"FULL_TRANSITIVE\"\n\n[storage]\nbackend = \"sqlite\"\n\n[registration]\nrequest_timeout_ms = 250\n",
        )
        .unwrap();

        let config = RegistryConfig::load_from(path.to_str()).unwrap();
        assert_eq!(config.compatibility.default_level, CompatibilityMode::FullTransitive);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);

        let defaults = config.defaults();
        assert_eq!(defaults.request_timeout, Some(Duration::from_millis(250)));
        assert_eq!(defaults.mode, WriteMode::ReadWrite);
        assert_eq!(defaults.max_append_attempts, 32);
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.toml");
        let mut config = RegistryConfig::default();
        config.cache.capacity = 7;
        config.save(path.to_str().unwrap()).unwrap();

        let loaded = RegistryConfig::load_from(path.to_str()).unwrap();
        assert_eq!(loaded.cache.capacity, 7);
    }
}
