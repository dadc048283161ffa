//! Directory listing.
//!
//! [`CacheManager::get_folder_content`] answers a directory read from the
//! cache when the folder has been enumerated before, and from the repository
//! otherwise. Results always carry a synthetic `.` (and `..` below the
//! root), are sorted by name with ordinal comparison, and are paginated by
//! marker: only entries strictly after the marker are returned, and an
//! unknown marker yields an empty page.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::manager::CacheManager;
use crate::node::NodeRef;
use crate::path;
use crate::repository::{RemoteItem, RepoResult};

/// Name of the synthetic self entry.
pub const SELF_ENTRY: &str = ".";

/// Name of the synthetic parent entry.
pub const PARENT_ENTRY: &str = "..";

/// One entry of a directory listing.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub node: NodeRef,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, node: NodeRef) -> Self {
        Self {
            name: name.into(),
            node,
        }
    }

    /// True for `.` and `..`.
    pub fn is_synthetic(&self) -> bool {
        self.name == SELF_ENTRY || self.name == PARENT_ENTRY
    }
}

/// A page of directory entries.
#[derive(Debug, Clone, Default)]
pub struct FolderContent {
    pub entries: Vec<DirEntry>,
    /// The cached listing was stale and a background refresh was requested.
    pub refresh_needed: bool,
}

impl FolderContent {
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }
}

impl CacheManager {
    /// Lists `folder`, resuming after `marker` when one is given.
    pub fn get_folder_content(
        &self,
        folder: &NodeRef,
        marker: Option<&str>,
    ) -> RepoResult<FolderContent> {
        let folder_path = folder.local_path();
        let cache = self.cache();
        let mut refresh_needed = false;

        let mut entries: Vec<DirEntry> = if !cache.is_enabled() {
            self.enumerate_detached(folder)?
        } else if !folder.is_parsed() {
            trace!(path = %folder_path, "enumerating unparsed folder");
            let items = self.inner.enumerate(&folder.repository_path())?;
            match cache.reconcile(folder, &items, true) {
                Some(children) => children
                    .into_iter()
                    .map(|node| DirEntry::new(node.name(), node))
                    .collect(),
                // The folder is not the cached node for its path; answer
                // without caching.
                None => self.detached_entries(&folder_path, &items),
            }
        } else {
            if folder.is_stale(cache.ttl()) {
                refresh_needed = true;
                self.schedule_refresh(&folder_path);
            }
            cache
                .immediate_children(&folder_path)
                .into_iter()
                .map(|node| DirEntry::new(node.name(), node))
                .collect()
        };

        entries.push(DirEntry::new(SELF_ENTRY, Arc::clone(folder)));
        if let Some(parent) = self.parent_entry(&folder_path) {
            entries.push(DirEntry::new(PARENT_ENTRY, parent));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let entries = paginate(entries, marker);

        if cache.is_enabled() && self.config().preload_folders {
            for entry in entries.iter().filter(|e| !e.is_synthetic()) {
                if entry.node.is_directory() && !entry.node.is_parsed() {
                    self.schedule_refresh(&entry.node.local_path());
                }
            }
        }

        debug!(
            path = %folder_path,
            marker,
            returned = entries.len(),
            refresh_needed,
            "folder content"
        );
        Ok(FolderContent {
            entries,
            refresh_needed,
        })
    }

    fn enumerate_detached(&self, folder: &NodeRef) -> RepoResult<Vec<DirEntry>> {
        let items = self.inner.enumerate(&folder.repository_path())?;
        Ok(self.detached_entries(&folder.local_path(), &items))
    }

    fn detached_entries(&self, folder_path: &str, items: &[RemoteItem]) -> Vec<DirEntry> {
        items
            .iter()
            .filter(|item| !item.name.is_empty() && item.name != SELF_ENTRY && item.name != PARENT_ENTRY)
            .map(|item| {
                let local = path::join(folder_path, &item.name);
                let node = Arc::new(self.cache().node_from_remote(&local, item));
                DirEntry::new(item.name.clone(), node)
            })
            .collect()
    }

    /// The parent of a non-root folder, from the cache or fetched on demand.
    /// Fetch errors are ignored.
    fn parent_entry(&self, folder_path: &str) -> Option<NodeRef> {
        let parent_path = path::parent(folder_path)?;
        if let Some(parent) = self.cache().get(parent_path) {
            return Some(parent);
        }
        match self.fetch_node(parent_path) {
            Ok(Some(node)) => Some(self.cache().insert_if_absent(node)),
            Ok(None) => None,
            Err(error) => {
                trace!(path = parent_path, %error, "parent entry unavailable");
                None
            }
        }
    }
}

/// Entries strictly after `marker` in an already sorted listing.
pub fn paginate(entries: Vec<DirEntry>, marker: Option<&str>) -> Vec<DirEntry> {
    let Some(marker) = marker else {
        return entries;
    };
    match entries.iter().position(|e| e.name == marker) {
        Some(idx) => entries.into_iter().skip(idx + 1).collect(),
        None => Vec::new(),
    }
}
