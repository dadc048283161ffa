//! Cache configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default lifetime of positive and negative entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

/// Default number of background refresh workers.
pub const DEFAULT_REFRESH_WORKERS: usize = 4;

/// Default depth of the refresh queue.
pub const DEFAULT_REFRESH_QUEUE_DEPTH: usize = 64;

/// An in-flight refresh older than this is treated as leaked.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(60);

/// How long a caller waits on another caller's fetch of the same path.
pub const DEFAULT_RESERVATION_WAIT: Duration = Duration::from_secs(30);

/// Whether the node cache retains anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    #[default]
    Enabled,
    /// Every lookup answers `Unknown` and listings always hit the repository.
    Disabled,
}

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Node cache and refresh settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub mode: CacheMode,

    /// Staleness bound for folder listings and lifetime of missing markers.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Schedule background enumeration of unparsed sub-folders seen in a listing.
    pub preload_folders: bool,

    pub refresh_workers: usize,

    pub refresh_queue_depth: usize,

    #[serde(with = "humantime_serde")]
    pub refresh_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub reservation_wait: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::Enabled,
            ttl: DEFAULT_TTL,
            preload_folders: true,
            refresh_workers: DEFAULT_REFRESH_WORKERS,
            refresh_queue_depth: DEFAULT_REFRESH_QUEUE_DEPTH,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            reservation_wait: DEFAULT_RESERVATION_WAIT,
        }
    }
}

impl CacheConfig {
    /// Configuration with caching turned off.
    pub fn disabled() -> Self {
        Self {
            mode: CacheMode::Disabled,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn preload_folders(mut self, enabled: bool) -> Self {
        self.preload_folders = enabled;
        self
    }

    #[must_use]
    pub fn refresh_workers(mut self, workers: usize) -> Self {
        self.refresh_workers = workers;
        self
    }

    #[must_use]
    pub fn refresh_queue_depth(mut self, depth: usize) -> Self {
        self.refresh_queue_depth = depth;
        self
    }

    #[must_use]
    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    #[must_use]
    pub fn reservation_wait(mut self, wait: Duration) -> Self {
        self.reservation_wait = wait;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.mode == CacheMode::Enabled
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_workers == 0 {
            return Err(ConfigError::Invalid(
                "refresh_workers must be at least 1".into(),
            ));
        }
        if self.refresh_queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "refresh_queue_depth must be at least 1".into(),
            ));
        }
        if self.refresh_timeout.is_zero() {
            return Err(ConfigError::Invalid("refresh_timeout must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(5));
        assert!(config.is_enabled());
        assert!(config.preload_folders);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = CacheConfig::default()
            .ttl(Duration::from_millis(200))
            .preload_folders(false)
            .refresh_workers(1);
        assert_eq!(config.ttl, Duration::from_millis(200));
        assert!(!config.preload_folders);
        assert_eq!(config.refresh_workers, 1);
        assert!(!CacheConfig::disabled().is_enabled());
    }

    #[test]
    fn test_deserialize_humantime() {
        let config: CacheConfig =
            serde_json::from_str(r#"{ "mode": "disabled", "ttl": "750ms", "refresh_timeout": "2m" }"#)
                .unwrap();
        assert_eq!(config.mode, CacheMode::Disabled);
        assert_eq!(config.ttl, Duration::from_millis(750));
        assert_eq!(config.refresh_timeout, Duration::from_secs(120));
        assert_eq!(config.refresh_workers, DEFAULT_REFRESH_WORKERS);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        assert!(matches!(
            CacheConfig::default().refresh_workers(0).validate(),
            Err(ConfigError::Invalid(_))
        ));
    }
}
