//! # Configuration
//!
//! Everything the stores need from the outside world: where the two backing
//! documents and the tarball directory live, how long a cached document may
//! be served before it is reloaded, search limits, the public base URL used
//! to build tarball links, the optional upstream registry and the password
//! hashing cost.
//!
//! Configuration is JSON. Every section and field is optional in a file;
//! missing values fall back to the embedded `config.json` defaults.
//!
//! ```rust,no_run
//! # use registry_store::config::Config;
//! let config = Config::load_or_default("registry.json")?;
//! config.validate()?;
//! # Ok::<(), registry_store::error::StoreError>(())
//! ```

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

/// Backing file locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Catalog document (package name to package document)
    pub metadata_path: PathBuf,
    /// User list document
    pub users_path: PathBuf,
    /// Root directory of version archives
    pub tarball_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            metadata_path: PathBuf::from("data/metadata.json"),
            users_path: PathBuf::from("data/users.json"),
            tarball_dir: PathBuf::from("data/tarballs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Staleness window in milliseconds
    pub stale_after_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 5 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub max_results: usize,
    /// Highest fuzzy score still counted as a match (0 = exact only)
    pub threshold: f64,
    pub distance: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 100,
            threshold: 0.6,
            distance: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Public URL prefix for tarball links, without a trailing slash
    pub base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4873".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub enabled: bool,
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "https://registry.npmjs.org".to_string(),
            timeout_secs: 30,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub pbkdf2_iterations: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: crate::credentials::DEFAULT_ITERATIONS,
        }
    }
}

impl Config {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)?;
        let config = serde_json::from_str(&config_str)
            .map_err(|e| StoreError::Config(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Place all backing files under `dir`.
    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        self.storage.metadata_path = dir.join("metadata.json");
        self.storage.users_path = dir.join("users.json");
        self.storage.tarball_dir = dir.join("tarballs");
        self
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.cache.stale_after_ms)
    }

    pub fn validate(&self) -> StoreResult<()> {
        let storage = &self.storage;
        for (field, path) in [
            ("storage.metadata_path", &storage.metadata_path),
            ("storage.users_path", &storage.users_path),
            ("storage.tarball_dir", &storage.tarball_dir),
        ] {
            if path.as_os_str().is_empty() {
                return Err(StoreError::Config(format!("{} must not be empty", field)));
            }
        }
        if storage.metadata_path == storage.users_path {
            return Err(StoreError::Config(
                "storage.metadata_path and storage.users_path must differ".to_string(),
            ));
        }
        if self.search.max_results == 0 {
            return Err(StoreError::Config(
                "search.max_results must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.search.threshold) {
            return Err(StoreError::Config(
                "search.threshold must be between 0 and 1".to_string(),
            ));
        }
        if self.security.pbkdf2_iterations == 0 {
            return Err(StoreError::Config(
                "security.pbkdf2_iterations must be positive".to_string(),
            ));
        }
        if self.upstream.enabled && self.upstream.url.is_empty() {
            return Err(StoreError::Config(
                "upstream.url is required when upstream is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        serde_json::from_str(include_str!("../config.json"))
            .expect("Failed to parse embedded config.json")
    }
}
