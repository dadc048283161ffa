//! Errors raised while starting the cache service.

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to spawn refresh worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
