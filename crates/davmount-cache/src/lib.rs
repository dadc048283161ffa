//! Metadata cache for WebDAV-backed volumes.
//!
//! This crate holds everything a filesystem adapter needs to answer host
//! callbacks without a network round trip per call, while staying coherent
//! with a remote document repository.
//!
//! # Components
//!
//! - [`NodeCache`] - Nodes keyed by local path, missing-entry markers, and
//!   per-path reservations that keep concurrent callers from issuing
//!   duplicate fetches
//! - [`RefreshCoordinator`] - Bounded worker pool that refreshes each folder
//!   at most once at a time
//! - [`CacheManager`] - The cache service: lifecycle, path resolution,
//!   background refresh and directory listing
//! - [`Repository`] - Blocking boundary to the remote repository, with
//!   [`MemoryRepository`] as an in-process implementation
//! - [`PathMapper`] - Translation between mounted paths and repository paths
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use davmount_cache::{CacheConfig, CacheManager, MemoryRepository, PathMapper, Resolved};
//!
//! let repo = Arc::new(MemoryRepository::new("/dav"));
//! repo.add_file("/dav/notes/today.txt", b"hello");
//!
//! let manager = CacheManager::open(CacheConfig::default(), PathMapper::new("/dav"), repo)?;
//! let Resolved::Found(notes) = manager.resolve("/notes")? else {
//!     unreachable!();
//! };
//! let listing = manager.get_folder_content(&notes, None)?;
//! assert_eq!(listing.names(), vec![".", "..", "today.txt"]);
//! manager.close();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cache;
pub mod config;
mod error;
pub mod listing;
mod manager;
pub mod memory;
pub mod node;
pub mod path;
pub mod refresh;
pub mod repository;
pub mod stats;

pub use cache::{FlightOutcome, Lookup, NodeCache, Reservation, ReservationGuard};
pub use config::{CacheConfig, CacheMode, ConfigError, DEFAULT_TTL};
pub use error::CacheError;
pub use listing::{DirEntry, FolderContent, PARENT_ENTRY, SELF_ENTRY};
pub use manager::{CacheManager, Resolved};
pub use memory::{MemoryRepository, RepoOp};
pub use node::{FileInfo, Node, NodeRef, NodeState, attributes};
pub use path::PathMapper;
pub use refresh::{RefreshCoordinator, Scheduled};
pub use repository::{RemoteItem, RepoError, RepoResult, Repository, fetch_item};
pub use stats::{CacheStats, CacheStatsSnapshot};
