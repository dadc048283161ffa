//! The cache service.
//!
//! [`CacheManager`] ties the node cache, the refresh coordinator and the
//! repository client together behind an explicit lifecycle: [`open`] starts
//! the refresh workers, [`close`] cancels outstanding refreshes, joins the
//! workers and empties the cache. The filesystem adapter holds the manager
//! by reference for the lifetime of a mount.
//!
//! [`open`]: CacheManager::open
//! [`close`]: CacheManager::close

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, trace, warn};

use crate::cache::{FlightOutcome, NodeCache, Reservation};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::node::{Node, NodeRef};
use crate::path::{self, PathMapper};
use crate::refresh::{RefreshCoordinator, Scheduled};
use crate::repository::{RemoteItem, RepoError, RepoResult, Repository, fetch_item};
use crate::stats::CacheStats;

/// Outcome of resolving a path.
#[derive(Debug, Clone)]
pub enum Resolved {
    Found(NodeRef),
    Absent,
}

/// State shared with background refresh jobs.
pub(crate) struct Inner {
    pub(crate) cache: NodeCache,
    pub(crate) repository: Arc<dyn Repository>,
    pub(crate) config: CacheConfig,
}

impl Inner {
    /// Lists the children of the collection at `repository_path`, dropping
    /// the self entry some servers include.
    pub(crate) fn enumerate(&self, repository_path: &str) -> RepoResult<Vec<RemoteItem>> {
        let own = repository_path.trim_end_matches('/');
        let items = self.repository.list(repository_path)?;
        Ok(items
            .into_iter()
            .filter(|item| item.path.trim_end_matches('/') != own)
            .collect())
    }
}

/// Cache service: node cache, refresh workers and repository access.
pub struct CacheManager {
    pub(crate) inner: Arc<Inner>,
    pub(crate) refresher: RefreshCoordinator,
}

impl CacheManager {
    /// Validates `config` and starts the refresh workers.
    pub fn open(
        config: CacheConfig,
        mapper: PathMapper,
        repository: Arc<dyn Repository>,
    ) -> Result<Self, CacheError> {
        config.validate()?;
        let refresher = RefreshCoordinator::start(
            config.refresh_workers,
            config.refresh_queue_depth,
            config.refresh_timeout,
        )?;
        info!(
            repository_root = mapper.repository_root(),
            mode = ?config.mode,
            ttl_ms = config.ttl.as_millis(),
            preload = config.preload_folders,
            "cache opened"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                cache: NodeCache::new(&config, mapper),
                repository,
                config,
            }),
            refresher,
        })
    }

    /// Cancels pending refreshes, joins the workers and drops every node.
    pub fn close(&self) {
        self.refresher.close();
        self.inner.cache.clear();
        info!("cache closed");
    }

    pub fn is_open(&self) -> bool {
        !self.refresher.is_cancelled()
    }

    pub fn cache(&self) -> &NodeCache {
        &self.inner.cache
    }

    pub fn repository(&self) -> &dyn Repository {
        self.inner.repository.as_ref()
    }

    pub fn mapper(&self) -> &PathMapper {
        self.inner.cache.mapper()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> &CacheStats {
        self.inner.cache.stats()
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    /// Resolves `path` through the cache, fetching from the repository at
    /// most once per path across concurrent callers.
    ///
    /// A confirmed absence records a missing marker. Repository failures
    /// release the reservation without recording anything.
    pub fn resolve(&self, path: &str) -> RepoResult<Resolved> {
        let cache = &self.inner.cache;
        match cache.reserve(path) {
            Reservation::Found(node) => {
                trace!(path, "resolved from cache");
                Ok(Resolved::Found(node))
            }
            Reservation::KnownMissing => {
                trace!(path, "resolved from missing marker");
                Ok(Resolved::Absent)
            }
            Reservation::Waiter(flight) => {
                trace!(path, "waiting on in-flight fetch");
                match flight.wait(self.inner.config.reservation_wait) {
                    Some(FlightOutcome::Found(node)) => Ok(Resolved::Found(node)),
                    Some(FlightOutcome::Absent) => Ok(Resolved::Absent),
                    Some(FlightOutcome::Failed(error)) => Err(error),
                    None => Err(RepoError::Unreachable {
                        message: format!("timed out waiting for in-flight fetch of {path}"),
                    }),
                }
            }
            Reservation::Leader(guard) => match self.fetch_node(path) {
                Ok(Some(node)) => {
                    debug!(path, "resolved from repository");
                    Ok(Resolved::Found(guard.fulfil(node)))
                }
                Ok(None) => {
                    debug!(path, "confirmed absent");
                    guard.absent();
                    Ok(Resolved::Absent)
                }
                Err(error) => {
                    guard.fail(error.clone());
                    Err(error)
                }
            },
        }
    }

    /// Fetches metadata for `path` from the repository without touching the
    /// cache. `Ok(None)` means the repository confirmed it absent.
    pub fn fetch_node(&self, path: &str) -> RepoResult<Option<Node>> {
        let repository_path = self.mapper().to_repository(path);
        let item = if path::is_root(path) {
            match self.inner.repository.get_folder(&repository_path) {
                Ok(item) => Some(item),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            }
        } else {
            fetch_item(self.inner.repository.as_ref(), &repository_path)?
        };
        Ok(item.map(|item| self.inner.cache.node_from_remote(path, &item)))
    }

    /// Queues a background re-enumeration of the folder at `path`.
    ///
    /// Returns false when a refresh is already in flight, the queue is full,
    /// or the cache has been closed.
    pub fn schedule_refresh(&self, path: &str) -> bool {
        if !self.inner.cache.is_enabled() {
            return false;
        }
        let inner = Arc::clone(&self.inner);
        let cancelled = self.refresher.cancellation();
        let target = path.to_string();
        match self
            .refresher
            .schedule(path, move || refresh_folder(&inner, &target, &cancelled))
        {
            Scheduled::Accepted => {
                self.stats().record_refresh_scheduled();
                true
            }
            Scheduled::Dropped => {
                self.stats().record_refresh_dropped();
                false
            }
            Scheduled::AlreadyInFlight | Scheduled::Closed => false,
        }
    }
}

/// Re-enumerates a cached folder and reconciles its children.
///
/// Failures leave `is_parsed` and `last_refresh` untouched so the next
/// foreground access retries.
fn refresh_folder(inner: &Inner, path: &str, cancelled: &AtomicBool) {
    let Some(folder) = inner.cache.get(path) else {
        trace!(path, "folder left the cache before refresh");
        return;
    };
    let repository_path = folder.repository_path();
    match inner.enumerate(&repository_path) {
        Ok(items) => {
            if cancelled.load(Ordering::Acquire) {
                return;
            }
            match inner.cache.reconcile(&folder, &items, false) {
                Some(children) => {
                    inner.cache.stats().record_refresh_completed();
                    debug!(path, children = children.len(), "background refresh complete");
                }
                None => trace!(path, "folder replaced during refresh"),
            }
        }
        Err(error) => {
            inner.cache.stats().record_refresh_failed();
            warn!(path, %error, "background refresh failed");
        }
    }
}
