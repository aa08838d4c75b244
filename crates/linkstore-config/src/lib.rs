//! # linkstore-config
//!
//! Configuration management for Linkstore.
//!
//! Loads configuration from:
//! 1. `~/.linkstore/config.toml` (global)
//! 2. `.linkstore/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod path;
pub mod testing;

use linkstore_cas::{HashAlgorithm, StoreOptions, DEFAULT_BLOCK_STORE};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Environment variable overriding `storage.root`.
pub const ENV_ROOT: &str = "LINKSTORE_ROOT";
/// Environment variable overriding `dedup.hash`.
pub const ENV_HASH: &str = "LINKSTORE_HASH";

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub dedup: DedupConfig,
    pub gc: GcConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let mut config = Self::load_from(global.as_deref(), Path::new(".linkstore/config.toml"))?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load and merge the global and project files, without environment
    /// overrides. Missing files are skipped.
    pub fn load_from(global: Option<&Path>, project: &Path) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();
        for path in global.into_iter().chain(std::iter::once(project)) {
            if !path.exists() {
                continue;
            }
            debug!("Loading config from {:?}", path);
            let contents = std::fs::read_to_string(path)?;
            let table: toml::Table = toml::from_str(&contents).map_err(|source| ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            })?;
            merge_tables(&mut merged, table);
        }
        let config: Config =
            toml::Value::Table(merged)
                .try_into()
                .map_err(|source| ConfigError::Toml {
                    path: project.to_path_buf(),
                    source,
                })?;
        config.validate()?;
        Ok(config)
    }

    /// Global config path: ~/.linkstore/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".linkstore/config.toml"))
    }

    /// Apply `LINKSTORE_*` overrides, looking variables up through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(root) = lookup(ENV_ROOT) {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(hash) = lookup(ENV_HASH) {
            self.dedup.hash = hash.parse().map_err(|e| ConfigError::Invalid {
                key: ENV_HASH.to_string(),
                message: format!("{e}"),
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.dedup.race_retries == 0 {
            return Err(ConfigError::Invalid {
                key: "dedup.race_retries".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.dedup.probe_size == 0 {
            return Err(ConfigError::Invalid {
                key: "dedup.probe_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Backend root with `~` expanded.
    pub fn backend_root(&self) -> PathBuf {
        path::expand_home(&self.storage.root)
    }

    /// Options for `linkstore_cas::DedupStore`.
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            block_store: self.storage.block_store.clone(),
            hash: self.dedup.hash,
            race_retries: self.dedup.race_retries,
            probe_size: self.dedup.probe_size,
            parallel_gc: self.gc.parallel,
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        Config::default().to_toml()
    }

    pub fn to_toml(&self) -> String {
        // Plain structs of strings, integers and booleans always serialize.
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

/// Recursive merge: tables merge key by key, anything else is replaced.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_table)), toml::Value::Table(overlay_table)) => {
                merge_tables(base_table, overlay_table);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory the local backend is rooted at
    pub root: PathBuf,
    /// Logical key of the block store inside the backend
    pub block_store: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("~/.linkstore/data"),
            block_store: DEFAULT_BLOCK_STORE.to_string(),
        }
    }
}

/// Deduplication configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Deduplicate CLI writes unless `--no-dedup` is given
    pub default: bool,
    /// Content hash: sha256 or blake3
    pub hash: HashAlgorithm,
    /// Bound on recreate-and-retry loops under concurrent collection
    pub race_retries: u32,
    /// Bytes of random data written by the capability probe
    pub probe_size: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        let options = StoreOptions::default();
        Self {
            default: false,
            hash: options.hash,
            race_retries: options.race_retries,
            probe_size: options.probe_size,
        }
    }
}

/// Garbage collector configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Sweep directory entries on the rayon pool
    pub parallel: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self { parallel: true }
    }
}
