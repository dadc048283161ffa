//! Filesystem callbacks over the node cache.
//!
//! [`DavFs`] is what the host runtime drives. Every callback is synchronous:
//! repository calls block the calling thread, and cache bookkeeping happens
//! before or after them, never across them.
//!
//! # Content flow
//!
//! File content is downloaded in full on first read or write and kept in the
//! node. Writes land in that buffer; [`FlushMode`] decides whether the whole
//! buffer is uploaded after each write or when the handle is flushed,
//! cleaned up or closed. An upload that fails evicts the node, since its
//! metadata no longer matches the repository.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use davmount_cache::node::{filetime_now, round_allocation};
use davmount_cache::{
    CacheManager, CacheStatsSnapshot, FileInfo, Node, NodeRef, PathMapper, Repository, Resolved,
    attributes, path,
};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{Span, debug, field, info, instrument, trace, warn};

use crate::config::{FlushMode, MountConfig};
use crate::content::ContentBuffer;
use crate::error::{FsError, FsResult, MountError};
use crate::handle::{DirCursor, DirListing, FileHandle};
use crate::pattern;
use crate::volume::{VolumeInfo, VolumeParams};

/// Flags passed to [`DavFs::cleanup`].
pub mod cleanup {
    pub const DELETE: u32 = 0x01;
    pub const SET_ALLOCATION_SIZE: u32 = 0x02;
    pub const SET_ARCHIVE_BIT: u32 = 0x10;
    pub const SET_LAST_ACCESS_TIME: u32 = 0x20;
    pub const SET_LAST_WRITE_TIME: u32 = 0x40;
    pub const SET_CHANGE_TIME: u32 = 0x80;

    /// Flags after which pending data is uploaded in write-back mode.
    pub(crate) const FLUSH_TRIGGERS: u32 = SET_ALLOCATION_SIZE | SET_ARCHIVE_BIT | SET_LAST_WRITE_TIME;
}

/// Attribute value meaning "leave unchanged" in [`DavFs::set_basic_info`].
pub const KEEP_ATTRIBUTES: u32 = u32::MAX;

/// Attributes and security descriptor of a path, for access checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityInfo {
    pub file_attributes: u32,
    pub security_descriptor: Vec<u8>,
}

/// Outcome of a write callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReply {
    pub bytes_transferred: u64,
    pub info: FileInfo,
}

/// The mounted volume.
pub struct DavFs {
    manager: CacheManager,
    config: MountConfig,
    params: VolumeParams,
    volume_label: RwLock<String>,
    next_op: AtomicU64,
}

impl DavFs {
    /// Validates `config`, checks that the repository root can be listed and
    /// opens the cache.
    pub fn mount(config: MountConfig, repository: Arc<dyn Repository>) -> Result<Self, MountError> {
        config.validate()?;
        let mapper = PathMapper::new(&config.repository_root);
        let root = mapper.repository_root().to_string();
        if let Err(source) = repository.list(&root) {
            warn!(root = %root, error = %source, "connection test failed");
            return Err(MountError::Unreachable { root, source });
        }

        let manager = CacheManager::open(config.cache.clone(), mapper, repository)?;
        let params = VolumeParams::new(&config, Utc::now());
        info!(
            root = %root,
            prefix = %params.prefix,
            flush_mode = ?config.flush_mode,
            "volume mounted"
        );
        Ok(Self {
            manager,
            volume_label: RwLock::new(config.volume_label.clone()),
            config,
            params,
            next_op: AtomicU64::new(1),
        })
    }

    /// Stops background refreshes and drops the cache.
    pub fn unmount(&self) {
        self.manager.close();
        info!(root = self.manager.mapper().repository_root(), "volume unmounted");
    }

    pub fn is_mounted(&self) -> bool {
        self.manager.is_open()
    }

    pub fn manager(&self) -> &CacheManager {
        &self.manager
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.manager.stats().snapshot()
    }

    fn next_op(&self) -> u64 {
        self.next_op.fetch_add(1, Ordering::Relaxed)
    }

    fn max_file_size(&self) -> u64 {
        self.config.max_file_size
    }

    // -- volume -----------------------------------------------------------

    pub fn volume_params(&self) -> &VolumeParams {
        &self.params
    }

    pub fn volume_info(&self) -> VolumeInfo {
        VolumeInfo::new(&self.config, &self.volume_label.read())
    }

    pub fn set_volume_label(&self, label: &str) -> VolumeInfo {
        *self.volume_label.write() = label.to_string();
        self.volume_info()
    }

    // -- lookup -----------------------------------------------------------

    /// Finds the node for `path`, fetching it from the repository when the
    /// cache knows nothing about it.
    #[instrument(level = "debug", skip_all, fields(op = self.next_op(), path = %path, status = field::Empty))]
    pub fn resolve(&self, path: &str) -> FsResult<NodeRef> {
        finish(self.resolve_node(path))
    }

    #[instrument(level = "debug", skip_all, fields(op = self.next_op(), path = %path, status = field::Empty))]
    pub fn get_security_by_name(&self, path: &str) -> FsResult<SecurityInfo> {
        finish(self.resolve_node(path).map(|node| {
            let state = node.state();
            SecurityInfo {
                file_attributes: state.info.file_attributes,
                security_descriptor: state.security_descriptor.clone(),
            }
        }))
    }

    #[instrument(level = "debug", skip_all, fields(op = self.next_op(), path = %path, status = field::Empty))]
    pub fn open(&self, path: &str) -> FsResult<FileHandle> {
        finish(self.resolve_node(path).map(|node| {
            let count = node.increment_open();
            trace!(handles = count, "opened");
            FileHandle::new(node)
        }))
    }

    fn resolve_node(&self, path: &str) -> FsResult<NodeRef> {
        let path = path::normalize(path);
        match self.manager.resolve(&path) {
            Ok(Resolved::Found(node)) => Ok(node),
            Ok(Resolved::Absent) => Err(FsError::NotFound(path)),
            Err(e) => Err(FsError::from_lookup(&e)),
        }
    }

    // -- create -----------------------------------------------------------

    /// Creates an empty file, or a folder when `file_attributes` carries the
    /// directory bit, and opens it.
    #[instrument(level = "debug", skip_all, fields(op = self.next_op(), path = %path, status = field::Empty))]
    pub fn create(
        &self,
        path: &str,
        file_attributes: u32,
        allocation_size: u64,
    ) -> FsResult<FileHandle> {
        finish(self.create_node(path, file_attributes, allocation_size))
    }

    fn create_node(&self, path: &str, file_attributes: u32, allocation_size: u64) -> FsResult<FileHandle> {
        let path = path::normalize(path);
        let Some(parent) = path::parent(&path) else {
            return Err(FsError::NameCollision(path));
        };
        let is_directory = file_attributes & attributes::DIRECTORY != 0;
        if !is_directory && allocation_size > self.max_file_size() {
            return Err(FsError::DiskFull {
                max: self.max_file_size(),
            });
        }

        match self.manager.resolve(&path) {
            Ok(Resolved::Found(_)) => return Err(FsError::NameCollision(path)),
            Ok(Resolved::Absent) => {}
            Err(e) => return Err(FsError::from_probe(&e)),
        }

        let repository = self.manager.repository();
        let repository_parent = self.manager.mapper().to_repository(parent);
        let name = path::name(&path);
        let created = if is_directory {
            repository.create_dir(&repository_parent, name)
        } else {
            repository.upload(&repository_parent, &[], name)
        };
        match created {
            Ok(true) => {}
            Ok(false) => return Err(FsError::CannotCreate(path)),
            Err(e) => return Err(FsError::from_create(&e)),
        }

        let node = match self.manager.fetch_node(&path) {
            Ok(Some(node)) => node,
            Ok(None) => return Err(FsError::CannotCreate(path)),
            Err(e) => return Err(FsError::from_create(&e)),
        };
        let node = self.manager.cache().insert(node);
        if !is_directory {
            let mut state = node.state_mut();
            state.content = Some(Vec::new());
            ContentBuffer::new(&mut state, self.max_file_size()).set_allocation_size(allocation_size)?;
        }
        let count = node.increment_open();
        debug!(directory = is_directory, handles = count, "created");
        Ok(FileHandle::new(node))
    }

    /// Truncates an open file to zero length, resetting its allocation and
    /// attributes.
    #[instrument(level = "debug", skip_all, fields(op = self.next_op(), path = %handle.normalized_name(), status = field::Empty))]
    pub fn overwrite(
        &self,
        handle: &FileHandle,
        file_attributes: u32,
        replace_attributes: bool,
        allocation_size: u64,
    ) -> FsResult<FileInfo> {
        let node = handle.node();
        let result = (|| -> FsResult<FileInfo> {
            {
                let mut state = node.state_mut();
                state.content = Some(Vec::new());
                state.info.file_size = 0;
                ContentBuffer::new(&mut state, self.max_file_size()).set_allocation_size(allocation_size)?;

                let archived = file_attributes | attributes::ARCHIVE;
                if replace_attributes {
                    state.info.file_attributes = archived;
                } else {
                    state.info.file_attributes |= archived;
                }
                let now = filetime_now();
                state.info.last_access_time = now;
                state.info.last_write_time = now;
                state.info.change_time = now;
            }
            self.commit_content(node)?;
            Ok(node.info())
        })();
        finish(result)
    }

    // -- content ----------------------------------------------------------

    /// Reads up to `length` bytes at `offset`, downloading the file on first
    /// access.
    #[instrument(level = "debug", skip_all, fields(op = self.next_op(), path = %handle.normalized_name(), offset = offset, length = length, status = field::Empty))]
    pub fn read(&self, handle: &FileHandle, offset: u64, length: u64) -> FsResult<Vec<u8>> {
        let node = handle.node();
        let result = self.load_content(node).and_then(|()| {
            let mut state = node.state_mut();
            ContentBuffer::new(&mut state, self.max_file_size()).read(offset, length)
        });
        finish(result)
    }

    /// Writes `data` at `offset` (or at the end with `write_to_end`).
    ///
    /// A `constrained` write is clipped to the current size and never grows
    /// the file.
    #[instrument(level = "debug", skip_all, fields(op = self.next_op(), path = %handle.normalized_name(), offset, length = data.len(), status = field::Empty))]
    pub fn write(
        &self,
        handle: &FileHandle,
        offset: u64,
        data: &[u8],
        write_to_end: bool,
        constrained: bool,
    ) -> FsResult<WriteReply> {
        let node = handle.node();
        let result = (|| -> FsResult<WriteReply> {
            self.load_content(node)?;
            let written = {
                let mut state = node.state_mut();
                ContentBuffer::new(&mut state, self.max_file_size()).write(
                    offset,
                    data,
                    write_to_end,
                    constrained,
                )?
            };
            if written.transferred > 0 || !constrained {
                self.commit_content(node)?;
            }
            trace!(at = written.offset, transferred = written.transferred, "written");
            Ok(WriteReply {
                bytes_transferred: written.transferred,
                info: node.info(),
            })
        })();
        finish(result)
    }

    /// Changes the logical size, or the allocation size with `is_allocation`.
    #[instrument(level = "debug", skip_all, fields(op = self.next_op(), path = %handle.normalized_name(), new_size = new_size, is_allocation = is_allocation, status = field::Empty))]
    pub fn set_size(&self, handle: &FileHandle, new_size: u64, is_allocation: bool) -> FsResult<FileInfo> {
        let node = handle.node();
        let result = (|| -> FsResult<FileInfo> {
            self.load_content(node)?;
            let resized = {
                let mut state = node.state_mut();
                let mut buffer = ContentBuffer::new(&mut state, self.max_file_size());
                let before = buffer.len();
                buffer.set_size(new_size, is_allocation)?;
                buffer.len() != before
            };
            if resized {
                self.commit_content(node)?;
            }
            Ok(node.info())
        })();
        finish(result)
    }

    /// Uploads pending data in write-back mode.
    #[instrument(level = "debug", skip_all, fields(op = self.next_op(), path = %handle.normalized_name(), status = field::Empty))]
    pub fn flush(&self, handle: &FileHandle) -> FsResult<FileInfo> {
        let node = handle.node();
        let result = if self.config.flush_mode == FlushMode::WriteBack && node.has_unflushed_data() {
            self.upload_or_evict(node).map(|()| node.info())
        } else {
            Ok(node.info())
        };
        finish(result)
    }

    /// Downloads the full content unless the node already holds it.
    fn load_content(&self, node: &Node) -> FsResult<()> {
        if node.is_directory() {
            return Err(FsError::IoError(format!("{} is a directory", node.local_path())));
        }
        if node.state().content.is_some() {
            return Ok(());
        }
        let repository_path = node.repository_path();
        let bytes = self
            .manager
            .repository()
            .download(&repository_path)
            .map_err(|e| FsError::from_download(&e))?;
        let mut state = node.state_mut();
        if state.content.is_none() {
            trace!(bytes = bytes.len(), "content loaded");
            state.info.file_size = bytes.len() as u64;
            state.info.allocation_size = round_allocation(state.info.file_size);
            state.content = Some(bytes);
        }
        Ok(())
    }

    /// Propagates a content change according to the flush mode.
    fn commit_content(&self, node: &Node) -> FsResult<()> {
        match self.config.flush_mode {
            FlushMode::WriteThrough => self.upload_or_evict(node),
            FlushMode::WriteBack => {
                node.state_mut().has_unflushed_data = true;
                Ok(())
            }
        }
    }

    fn upload_or_evict(&self, node: &Node) -> FsResult<()> {
        self.upload(node).inspect_err(|error| {
            warn!(path = %node.local_path(), %error, "upload failed, evicting node");
            self.manager.cache().invalidate(node);
        })
    }

    /// Write-back upload for cleanup and close, which cannot report errors.
    fn write_back(&self, node: &Node) {
        if let Err(error) = self.upload_or_evict(node) {
            trace!(%error, "write-back failure already handled");
        }
    }

    /// Uploads the whole buffer, replacing the remote document.
    fn upload(&self, node: &Node) -> FsResult<()> {
        let (repository_path, bytes) = {
            let state = node.state();
            if state.deleted {
                trace!(path = %state.local_path, "skipping upload of deleted node");
                return Ok(());
            }
            let Some(content) = state.content.as_ref() else {
                return Ok(());
            };
            (state.repository_path.clone(), content.clone())
        };
        let mapper = self.manager.mapper();
        let parent = mapper.repository_parent(&repository_path);
        let name = mapper.repository_name(&repository_path);

        match self.manager.repository().upload(&parent, &bytes, name) {
            Ok(true) => {
                let mut state = node.state_mut();
                // A concurrent write after the snapshot keeps the flag set.
                if state.content.as_deref() == Some(bytes.as_slice()) {
                    state.has_unflushed_data = false;
                }
                debug!(path = %repository_path, bytes = bytes.len(), "uploaded");
                Ok(())
            }
            Ok(false) => Err(FsError::IoError(format!("upload of {repository_path} rejected"))),
            Err(e) => Err(FsError::from_upload(&e)),
        }
    }

    // -- metadata ---------------------------------------------------------

    pub fn get_file_info(&self, handle: &FileHandle) -> FileInfo {
        handle.info()
    }

    pub fn get_security(&self, handle: &FileHandle) -> Vec<u8> {
        handle.node().state().security_descriptor.clone()
    }

    /// Updates attributes and timestamps locally; the repository cannot
    /// store them. [`KEEP_ATTRIBUTES`] and zero times leave a field as is.
    pub fn set_basic_info(
        &self,
        handle: &FileHandle,
        file_attributes: u32,
        creation_time: u64,
        last_access_time: u64,
        last_write_time: u64,
        change_time: u64,
    ) -> FileInfo {
        let mut state = handle.node().state_mut();
        let info = &mut state.info;
        if file_attributes != KEEP_ATTRIBUTES {
            info.file_attributes = file_attributes;
        }
        for (slot, value) in [
            (&mut info.creation_time, creation_time),
            (&mut info.last_access_time, last_access_time),
            (&mut info.last_write_time, last_write_time),
            (&mut info.change_time, change_time),
        ] {
            if value != 0 {
                *slot = value;
            }
        }
        *info
    }

    /// Deletion is decided by the repository at cleanup time.
    pub fn can_delete(&self, _handle: &FileHandle) -> FsResult<()> {
        Ok(())
    }

    // -- rename -----------------------------------------------------------

    /// Moves the handle's node from `path` to `new_path`.
    ///
    /// Cached descendants of a folder follow it.
    #[instrument(level = "debug", skip_all, fields(op = self.next_op(), path = %path, new_path = %new_path, status = field::Empty))]
    pub fn rename(
        &self,
        handle: &FileHandle,
        path: &str,
        new_path: &str,
        replace_if_exists: bool,
    ) -> FsResult<()> {
        finish(self.rename_node(handle.node(), path, new_path, replace_if_exists))
    }

    fn rename_node(&self, node: &NodeRef, path: &str, new_path: &str, replace: bool) -> FsResult<()> {
        let old = path::normalize(path);
        let new = path::normalize(new_path);
        if old == new {
            return Ok(());
        }
        if path::is_root(&old) || path::is_root(&new) {
            return Err(FsError::AccessDenied(old));
        }

        match self.manager.resolve(&new) {
            Ok(Resolved::Found(_)) if !replace => return Err(FsError::NameCollision(new)),
            Ok(_) => {}
            Err(e) => return Err(FsError::from_probe(&e)),
        }

        let mapper = self.manager.mapper();
        let source = mapper.to_repository(&old);
        let destination = mapper.to_repository(&new);
        let repository = self.manager.repository();
        let moved = if node.is_directory() {
            repository.move_folder(&source, &destination)
        } else {
            repository.move_file(&source, &destination)
        };
        match moved {
            Ok(true) => {}
            Ok(false) => return Err(FsError::AccessDenied(old)),
            Err(e) => return Err(FsError::from_move(&e)),
        }

        self.manager.cache().relocate(node, &new);
        debug!(from = %old, to = %new, "renamed");
        Ok(())
    }

    // -- close ------------------------------------------------------------

    /// Handles the last-handle-closed notification for `handle`.
    ///
    /// Deletes the entry when `DELETE` is set; otherwise applies the
    /// attribute flags and, in write-back mode, uploads pending data. The
    /// volume root is left alone. Failures are logged.
    #[instrument(level = "debug", skip_all, fields(op = self.next_op(), path = %handle.normalized_name(), flags = flags))]
    pub fn cleanup(&self, handle: &FileHandle, flags: u32) {
        let node = handle.node();
        if path::is_root(&node.local_path()) {
            return;
        }
        let is_directory = node.is_directory();

        if flags & cleanup::SET_ALLOCATION_SIZE != 0 && !is_directory {
            let mut state = node.state_mut();
            if state.content.is_some() {
                let allocation = round_allocation(state.info.file_size).min(self.max_file_size());
                if let Err(error) =
                    ContentBuffer::new(&mut state, self.max_file_size()).set_allocation_size(allocation)
                {
                    warn!(%error, "allocation adjustment failed");
                }
            }
        }

        if flags & cleanup::DELETE != 0 {
            self.delete(node);
            return;
        }

        {
            let mut state = node.state_mut();
            if flags & cleanup::SET_ARCHIVE_BIT != 0 && !is_directory {
                state.info.file_attributes |= attributes::ARCHIVE;
            }
            let now = filetime_now();
            if flags & cleanup::SET_LAST_ACCESS_TIME != 0 {
                state.info.last_access_time = now;
            }
            if flags & cleanup::SET_LAST_WRITE_TIME != 0 {
                state.info.last_write_time = now;
            }
            if flags & cleanup::SET_CHANGE_TIME != 0 {
                state.info.change_time = now;
            }
        }

        if self.config.flush_mode == FlushMode::WriteBack
            && flags & cleanup::FLUSH_TRIGGERS != 0
            && node.has_unflushed_data()
        {
            self.write_back(node);
        }
    }

    fn delete(&self, node: &NodeRef) {
        let repository_path = node.repository_path();
        let repository = self.manager.repository();
        let deleted = if node.is_directory() {
            repository.delete_folder(&repository_path)
        } else {
            repository.delete_file(&repository_path)
        };
        match deleted {
            Ok(()) => {
                node.mark_deleted();
                let local = node.local_path();
                let removed = self.manager.cache().remove(node);
                self.manager.cache().mark_missing(&local);
                debug!(path = %local, removed, "deleted");
            }
            Err(error) => warn!(path = %repository_path, %error, "delete failed"),
        }
    }

    /// Releases `handle`. Pending data is uploaded in write-back mode; an
    /// upload failure evicts the node and is otherwise only logged.
    #[instrument(level = "debug", skip_all, fields(op = self.next_op(), path = %handle.normalized_name()))]
    pub fn close(&self, handle: FileHandle) {
        let node = handle.node();
        let remaining = node.decrement_open();
        if self.config.flush_mode == FlushMode::WriteBack && node.has_unflushed_data() {
            self.write_back(node);
        }
        trace!(handles = remaining, "closed");
    }

    // -- enumeration ------------------------------------------------------

    /// Returns the next entry of the folder behind `handle`.
    ///
    /// The first call builds the listing (entries after `marker`, filtered by
    /// `pattern`) and stores it in the handle; later calls advance through it.
    /// `None` ends the enumeration and resets the handle for the next one.
    #[instrument(level = "trace", skip_all, fields(op = self.next_op(), path = %handle.normalized_name()))]
    pub fn list_directory(
        &self,
        handle: &FileHandle,
        pattern: Option<&str>,
        marker: Option<&str>,
    ) -> Option<DirListing> {
        let mut cursor = handle.cursor.lock();
        if cursor.is_none() {
            match self.build_listing(handle, pattern, marker) {
                Ok(entries) => *cursor = Some(DirCursor::new(entries)),
                Err(error) => {
                    warn!(%error, "directory listing failed");
                    return None;
                }
            }
        }
        let next = cursor.as_mut().and_then(DirCursor::advance);
        if next.is_none() {
            *cursor = None;
        }
        next
    }

    /// The whole listing in one call, without touching the handle's cursor.
    #[instrument(level = "debug", skip_all, fields(op = self.next_op(), path = %handle.normalized_name(), status = field::Empty))]
    pub fn read_directory(
        &self,
        handle: &FileHandle,
        pattern: Option<&str>,
        marker: Option<&str>,
    ) -> FsResult<Vec<DirListing>> {
        finish(self.build_listing(handle, pattern, marker))
    }

    fn build_listing(
        &self,
        handle: &FileHandle,
        pattern: Option<&str>,
        marker: Option<&str>,
    ) -> FsResult<Vec<DirListing>> {
        let folder = handle.node();
        if !folder.is_directory() {
            return Err(FsError::NotFound(folder.local_path()));
        }
        let content = self
            .manager
            .get_folder_content(folder, marker)
            .map_err(|e| FsError::from_lookup(&e))?;
        Ok(content
            .entries
            .into_iter()
            .filter(|entry| entry.is_synthetic() || pattern::matches(pattern, &entry.name))
            .map(|entry| DirListing {
                info: entry.node.info(),
                name: entry.name,
            })
            .collect())
    }
}

/// Records the outcome on the current callback span.
fn finish<T>(result: FsResult<T>) -> FsResult<T> {
    let span = Span::current();
    match &result {
        Ok(_) => {
            span.record("status", "success");
        }
        Err(error) => {
            span.record("status", field::display(format!("{:#010x}", error.status())));
            debug!(%error, "callback failed");
        }
    }
    result
}
