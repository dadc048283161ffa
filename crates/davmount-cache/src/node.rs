//! Cached filesystem entries.
//!
//! A [`Node`] is the unit of caching: metadata for one file or folder plus,
//! for files that have been read or written, the full content buffer.
//! Nodes are shared as [`NodeRef`] so that concurrent handles on the same
//! path see one buffer.
//!
//! # Locking
//!
//! Node state sits behind its own `RwLock`. When both are needed the cache
//! lock is always taken first, then the node lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::Serialize;

use crate::path;
use crate::repository::RemoteItem;

/// File attribute flags reported to the host runtime.
pub mod attributes {
    pub const READONLY: u32 = 0x0000_0001;
    pub const HIDDEN: u32 = 0x0000_0002;
    pub const DIRECTORY: u32 = 0x0000_0010;
    pub const ARCHIVE: u32 = 0x0000_0020;
    pub const NORMAL: u32 = 0x0000_0080;
}

/// Bytes per sector exposed to the host.
pub const SECTOR_SIZE: u64 = 4096;

/// Sectors per allocation unit.
pub const SECTORS_PER_ALLOCATION_UNIT: u64 = 1;

/// Allocation granularity for file buffers.
pub const ALLOCATION_UNIT: u64 = SECTOR_SIZE * SECTORS_PER_ALLOCATION_UNIT;

/// Owner/group BUILTIN\Administrators, full access for SYSTEM, Administrators
/// and Everyone. The repository has no ACLs, so every node reports this.
pub const DEFAULT_SECURITY_DESCRIPTOR: &str = "O:BAG:BAD:P(A;;FA;;;SY)(A;;FA;;;BA)(A;;FA;;;WD)";

/// Seconds between 1601-01-01 and the Unix epoch.
const FILETIME_UNIX_OFFSET_SECS: i64 = 11_644_473_600;

/// Rounds `size` up to the allocation unit.
#[inline]
pub fn round_allocation(size: u64) -> u64 {
    size.div_ceil(ALLOCATION_UNIT) * ALLOCATION_UNIT
}

/// Converts a timestamp to 100ns ticks since 1601 (FILETIME).
pub fn to_filetime(time: DateTime<Utc>) -> u64 {
    let secs = time.timestamp() + FILETIME_UNIX_OFFSET_SECS;
    let ticks = i128::from(secs) * 10_000_000 + i128::from(time.timestamp_subsec_nanos() / 100);
    u64::try_from(ticks.max(0)).unwrap_or(u64::MAX)
}

/// Converts FILETIME ticks back to a UTC timestamp.
pub fn from_filetime(ticks: u64) -> DateTime<Utc> {
    let ticks = i64::try_from(ticks).unwrap_or(i64::MAX);
    let secs = ticks / 10_000_000 - FILETIME_UNIX_OFFSET_SECS;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let nanos = ((ticks % 10_000_000) * 100) as u32;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Current time as FILETIME ticks.
pub fn filetime_now() -> u64 {
    to_filetime(Utc::now())
}

/// Per-entry metadata in the shape the host runtime expects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub file_attributes: u32,
    pub allocation_size: u64,
    pub file_size: u64,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub change_time: u64,
}

impl FileInfo {
    /// Metadata for a freshly created entry stamped with the current time.
    pub fn new(file_attributes: u32) -> Self {
        let now = filetime_now();
        Self {
            file_attributes,
            allocation_size: 0,
            file_size: 0,
            creation_time: now,
            last_access_time: now,
            last_write_time: now,
            change_time: now,
        }
    }

    /// Metadata derived from a remote item.
    pub fn from_remote(item: &RemoteItem) -> Self {
        let created = to_filetime(item.created);
        let modified = to_filetime(item.modified);
        if item.is_collection {
            Self {
                file_attributes: attributes::DIRECTORY,
                allocation_size: 0,
                file_size: 0,
                creation_time: created,
                last_access_time: modified,
                last_write_time: modified,
                change_time: modified,
            }
        } else {
            Self {
                file_attributes: attributes::ARCHIVE,
                allocation_size: round_allocation(item.content_length),
                file_size: item.content_length,
                creation_time: created,
                last_access_time: modified,
                last_write_time: modified,
                change_time: modified,
            }
        }
    }

    #[inline]
    pub fn is_directory(&self) -> bool {
        self.file_attributes & attributes::DIRECTORY != 0
    }
}

/// Mutable portion of a [`Node`].
#[derive(Debug, Clone)]
pub struct NodeState {
    /// Canonical path in the mounted namespace; the cache key.
    pub local_path: String,
    /// Corresponding path in the repository.
    pub repository_path: String,
    /// Leaf component of `local_path` (empty for the root).
    pub name: String,
    pub info: FileInfo,
    pub security_descriptor: Vec<u8>,
    /// Children have been fully enumerated at least once.
    pub is_parsed: bool,
    /// Last successful child enumeration.
    pub last_refresh: Option<Instant>,
    /// Full file content once read or staged for write. The vector length is
    /// the logical file size.
    pub content: Option<Vec<u8>>,
    /// `content` holds writes not yet uploaded.
    pub has_unflushed_data: bool,
    /// The remote entry was deleted; nothing may be uploaded for it again.
    pub deleted: bool,
}

/// A cached filesystem entry.
#[derive(Debug)]
pub struct Node {
    state: RwLock<NodeState>,
    open_count: AtomicI64,
}

/// Shared handle to a cached node.
pub type NodeRef = Arc<Node>;

impl Node {
    /// Creates a node for `local_path` with the given metadata.
    pub fn new(local_path: &str, repository_path: String, info: FileInfo) -> Self {
        let local_path = path::normalize(local_path);
        Self {
            state: RwLock::new(NodeState {
                name: path::name(&local_path).to_string(),
                local_path,
                repository_path,
                info,
                security_descriptor: DEFAULT_SECURITY_DESCRIPTOR.as_bytes().to_vec(),
                is_parsed: false,
                last_refresh: None,
                content: None,
                has_unflushed_data: false,
                deleted: false,
            }),
            open_count: AtomicI64::new(0),
        }
    }

    /// Creates a node from remote metadata, mounted at `local_path`.
    pub fn from_remote(local_path: &str, repository_path: String, item: &RemoteItem) -> Self {
        Self::new(local_path, repository_path, FileInfo::from_remote(item))
    }

    /// Read access to the node state.
    pub fn state(&self) -> RwLockReadGuard<'_, NodeState> {
        self.state.read()
    }

    /// Write access to the node state.
    pub fn state_mut(&self) -> RwLockWriteGuard<'_, NodeState> {
        self.state.write()
    }

    pub fn local_path(&self) -> String {
        self.state.read().local_path.clone()
    }

    pub fn repository_path(&self) -> String {
        self.state.read().repository_path.clone()
    }

    pub fn name(&self) -> String {
        self.state.read().name.clone()
    }

    pub fn info(&self) -> FileInfo {
        self.state.read().info
    }

    pub fn is_directory(&self) -> bool {
        self.state.read().info.is_directory()
    }

    pub fn is_parsed(&self) -> bool {
        self.state.read().is_parsed
    }

    pub fn has_unflushed_data(&self) -> bool {
        self.state.read().has_unflushed_data
    }

    pub fn is_deleted(&self) -> bool {
        self.state.read().deleted
    }

    /// Records that the remote entry is gone. Drops buffered content so open
    /// handles have nothing left to upload.
    pub fn mark_deleted(&self) {
        let mut state = self.state.write();
        state.deleted = true;
        state.content = None;
        state.has_unflushed_data = false;
    }

    /// True when the last enumeration is older than `ttl` (or never happened).
    pub fn is_stale(&self, ttl: std::time::Duration) -> bool {
        self.state
            .read()
            .last_refresh
            .is_none_or(|at| at.elapsed() > ttl)
    }

    /// Records a complete enumeration of this node's children.
    pub fn mark_parsed(&self) {
        let mut state = self.state.write();
        state.is_parsed = true;
        state.last_refresh = Some(Instant::now());
    }

    /// Moves the node to a new location. All other fields are preserved.
    pub fn relocate(&self, local_path: &str, repository_path: String) {
        let local_path = path::normalize(local_path);
        let mut state = self.state.write();
        state.name = path::name(&local_path).to_string();
        state.local_path = local_path;
        state.repository_path = repository_path;
    }

    /// Replaces metadata with fresh remote values unless the node is in use.
    ///
    /// Returns false if the node has open handles or unflushed data.
    pub fn refresh_from(&self, item: &RemoteItem) -> bool {
        if self.open_count() > 0 {
            return false;
        }
        let mut state = self.state.write();
        if state.has_unflushed_data {
            return false;
        }
        let fresh = FileInfo::from_remote(item);
        if state.info.is_directory() == fresh.is_directory() && state.info != fresh {
            state.info = fresh;
            state.content = None;
        }
        true
    }

    pub fn open_count(&self) -> i64 {
        self.open_count.load(Ordering::Acquire)
    }

    /// Registers an open handle; returns the new count.
    pub fn increment_open(&self) -> i64 {
        self.open_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Releases an open handle; never drops below zero.
    pub fn decrement_open(&self) -> i64 {
        let previous = self
            .open_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some((count - 1).max(0))
            })
            .unwrap_or(0);
        (previous - 1).max(0)
    }
}
