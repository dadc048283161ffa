//! Mount configuration for the filesystem adapter.

use std::path::Path;

use davmount_cache::{CacheConfig, ConfigError};
use serde::{Deserialize, Serialize};

/// Default maximum size of a single file buffer.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 4_294_967_295;

/// Default node count used for volume size reporting.
pub const DEFAULT_MAX_FILE_NODES: u64 = 500_000;

/// Default kernel metadata cache hint in milliseconds.
pub const DEFAULT_METADATA_FRESHNESS_MS: u32 = 1_000;

/// Metadata cache hint meaning "never expire".
pub const METADATA_FRESHNESS_FOREVER: u32 = u32::MAX;

/// When modified content is uploaded to the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Upload the whole file after every write.
    WriteThrough,
    /// Keep writes local until flush, cleanup or close.
    #[default]
    WriteBack,
}

/// Configuration for a mounted repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Repository path the volume root maps to, e.g. `/dav/documents`.
    pub repository_root: String,

    /// Server host name, used for the network volume prefix.
    pub authority: String,

    pub flush_mode: FlushMode,

    /// Largest file buffer the adapter will allocate.
    pub max_file_size: u64,

    /// Only used to report volume size.
    pub max_file_nodes: u64,

    /// How long the host may cache file metadata, in milliseconds.
    pub metadata_freshness: u32,

    pub volume_label: String,

    pub cache: CacheConfig,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            repository_root: "/".into(),
            authority: "localhost".into(),
            flush_mode: FlushMode::default(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_file_nodes: DEFAULT_MAX_FILE_NODES,
            metadata_freshness: DEFAULT_METADATA_FRESHNESS_MS,
            volume_label: "davFS".into(),
            cache: CacheConfig::default(),
        }
    }
}

impl MountConfig {
    /// Creates a configuration for `repository_root` on `authority`.
    pub fn new(repository_root: impl Into<String>, authority: impl Into<String>) -> Self {
        Self {
            repository_root: repository_root.into(),
            authority: authority.into(),
            ..Self::default()
        }
    }

    /// Loads a configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn flush_mode(mut self, mode: FlushMode) -> Self {
        self.flush_mode = mode;
        self
    }

    #[must_use]
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    #[must_use]
    pub fn max_file_nodes(mut self, nodes: u64) -> Self {
        self.max_file_nodes = nodes;
        self
    }

    #[must_use]
    pub fn metadata_freshness(mut self, millis: u32) -> Self {
        self.metadata_freshness = millis;
        self
    }

    #[must_use]
    pub fn volume_label(mut self, label: impl Into<String>) -> Self {
        self.volume_label = label.into();
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.repository_root.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "repository_root must be absolute, got {:?}",
                self.repository_root
            )));
        }
        if self.authority.is_empty() {
            return Err(ConfigError::Invalid("authority must not be empty".into()));
        }
        if self.max_file_size == 0 {
            return Err(ConfigError::Invalid("max_file_size must be non-zero".into()));
        }
        self.cache.validate()
    }
}
