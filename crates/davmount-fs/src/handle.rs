//! Per-open file context.

use std::collections::VecDeque;

use davmount_cache::{FileInfo, NodeRef};
use parking_lot::Mutex;
use serde::Serialize;

/// One directory entry as handed to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirListing {
    pub name: String,
    pub info: FileInfo,
}

/// Remaining entries of an enumeration in progress.
#[derive(Debug, Default)]
pub(crate) struct DirCursor {
    entries: VecDeque<DirListing>,
}

impl DirCursor {
    pub(crate) fn new(entries: impl IntoIterator<Item = DirListing>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub(crate) fn advance(&mut self) -> Option<DirListing> {
        self.entries.pop_front()
    }
}

/// Context for one open of a file or folder.
///
/// Handles on the same path share one node, and therefore one content
/// buffer. The handle owns its enumeration cursor.
#[derive(Debug)]
pub struct FileHandle {
    node: NodeRef,
    normalized_name: String,
    pub(crate) cursor: Mutex<Option<DirCursor>>,
}

impl FileHandle {
    pub(crate) fn new(node: NodeRef) -> Self {
        let normalized_name = node.local_path();
        Self {
            node,
            normalized_name,
            cursor: Mutex::new(None),
        }
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    /// Path as it was resolved when the handle was opened.
    pub fn normalized_name(&self) -> &str {
        &self.normalized_name
    }

    pub fn info(&self) -> FileInfo {
        self.node.info()
    }

    pub fn is_directory(&self) -> bool {
        self.node.is_directory()
    }

    /// True while a directory enumeration has entries left to return.
    pub fn is_enumerating(&self) -> bool {
        self.cursor.lock().is_some()
    }
}
