//! In-memory repository.
//!
//! Behaves like a small WebDAV server held in a `BTreeMap`: collections and
//! documents keyed by repository path. Used by the test suites and by the
//! command-line inspector to exercise cache policy without a network.
//!
//! Every call is counted per operation so single-flight behavior can be
//! asserted, and failures can be injected either globally (offline mode) or
//! one call at a time.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::repository::{RemoteItem, RepoError, RepoResult, Repository};

/// Repository operations, used to count calls and target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepoOp {
    List,
    GetFile,
    GetFolder,
    Upload,
    CreateDir,
    DeleteFile,
    DeleteFolder,
    MoveFile,
    MoveFolder,
    Download,
}

impl RepoOp {
    const ALL: [RepoOp; 10] = [
        RepoOp::List,
        RepoOp::GetFile,
        RepoOp::GetFolder,
        RepoOp::Upload,
        RepoOp::CreateDir,
        RepoOp::DeleteFile,
        RepoOp::DeleteFolder,
        RepoOp::MoveFile,
        RepoOp::MoveFolder,
        RepoOp::Download,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone)]
struct Entry {
    is_collection: bool,
    data: Vec<u8>,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
}

impl Entry {
    fn collection() -> Self {
        let now = Utc::now();
        Self {
            is_collection: true,
            data: Vec::new(),
            created: now,
            modified: now,
        }
    }

    fn document(data: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            is_collection: false,
            data,
            created: now,
            modified: now,
        }
    }
}

/// A thread-safe in-memory [`Repository`].
pub struct MemoryRepository {
    root: String,
    entries: Mutex<BTreeMap<String, Entry>>,
    calls: [AtomicUsize; RepoOp::ALL.len()],
    offline: AtomicBool,
    latency_ms: AtomicU64,
    injected: Mutex<HashMap<RepoOp, RepoError>>,
}

impl MemoryRepository {
    /// Creates an empty repository whose root collection is `root`.
    pub fn new(root: &str) -> Self {
        let root = normalize(root);
        let mut entries = BTreeMap::new();
        entries.insert(root.clone(), Entry::collection());
        Self {
            root,
            entries: Mutex::new(entries),
            calls: Default::default(),
            offline: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            injected: Mutex::new(HashMap::new()),
        }
    }

    /// The root collection path.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Adds a collection (and any missing ancestors).
    pub fn add_folder(&self, path: &str) {
        let path = normalize(path);
        let mut entries = self.entries.lock();
        ensure_ancestors(&mut entries, &path);
        entries.entry(path).or_insert_with(Entry::collection);
    }

    /// Adds or replaces a document (creating missing ancestors).
    pub fn add_file(&self, path: &str, data: &[u8]) {
        let path = normalize(path);
        let mut entries = self.entries.lock();
        ensure_ancestors(&mut entries, &path);
        entries.insert(path, Entry::document(data.to_vec()));
    }

    /// Removes an entry and everything below it, bypassing call accounting.
    pub fn remove(&self, path: &str) -> bool {
        let path = normalize(path);
        let mut entries = self.entries.lock();
        remove_subtree(&mut entries, &path)
    }

    /// Returns true if an entry exists at `path`.
    pub fn exists(&self, path: &str) -> bool {
        self.entries.lock().contains_key(&normalize(path))
    }

    /// Returns the stored content of a document.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .get(&normalize(path))
            .filter(|e| !e.is_collection)
            .map(|e| e.data.clone())
    }

    /// Number of calls made for `op`.
    pub fn calls(&self, op: RepoOp) -> usize {
        self.calls[op.index()].load(Ordering::SeqCst)
    }

    /// Total number of calls across all operations.
    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| c.load(Ordering::SeqCst)).sum()
    }

    /// Resets every call counter to zero.
    pub fn reset_calls(&self) {
        for counter in &self.calls {
            counter.store(0, Ordering::SeqCst);
        }
    }

    /// While offline every call fails with [`RepoError::Unreachable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Adds a fixed delay to every call.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Makes the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: RepoOp, error: RepoError) {
        self.injected.lock().insert(op, error);
    }

    fn begin(&self, op: RepoOp) -> RepoResult<()> {
        self.calls[op.index()].fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            std::thread::sleep(Duration::from_millis(latency));
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(RepoError::Unreachable {
                message: "repository is offline".to_string(),
            });
        }
        if let Some(error) = self.injected.lock().remove(&op) {
            return Err(error);
        }
        Ok(())
    }

    fn item(path: &str, entry: &Entry) -> RemoteItem {
        RemoteItem {
            path: path.to_string(),
            name: leaf(path).to_string(),
            is_collection: entry.is_collection,
            content_length: entry.data.len() as u64,
            created: entry.created,
            modified: entry.modified,
        }
    }

    fn require_collection(entries: &BTreeMap<String, Entry>, path: &str) -> RepoResult<()> {
        match entries.get(path) {
            Some(entry) if entry.is_collection => Ok(()),
            _ => Err(RepoError::Conflict {
                path: path.to_string(),
            }),
        }
    }

    fn move_entry(&self, op: RepoOp, source: &str, destination: &str) -> RepoResult<bool> {
        self.begin(op)?;
        let source = normalize(source);
        let destination = normalize(destination);
        let mut entries = self.entries.lock();

        let want_collection = op == RepoOp::MoveFolder;
        match entries.get(&source) {
            Some(entry) if entry.is_collection == want_collection => {}
            _ => return Err(RepoError::NotFound { path: source }),
        }
        if source == destination {
            return Ok(true);
        }
        if destination.starts_with(&format!("{source}/")) {
            return Ok(false);
        }
        Self::require_collection(&entries, &parent_of(&destination))?;

        remove_subtree(&mut entries, &destination);
        let prefix = format!("{source}/");
        let moved: Vec<String> = entries
            .keys()
            .filter(|k| **k == source || k.starts_with(&prefix))
            .cloned()
            .collect();
        let now = Utc::now();
        for key in moved {
            if let Some(mut entry) = entries.remove(&key) {
                entry.modified = now;
                let new_key = format!("{destination}{}", &key[source.len()..]);
                entries.insert(new_key, entry);
            }
        }
        Ok(true)
    }
}

impl Repository for MemoryRepository {
    fn list(&self, folder_path: &str) -> RepoResult<Vec<RemoteItem>> {
        self.begin(RepoOp::List)?;
        let folder = normalize(folder_path);
        let entries = self.entries.lock();
        match entries.get(&folder) {
            Some(entry) if entry.is_collection => {}
            _ => return Err(RepoError::NotFound { path: folder }),
        }
        Ok(entries
            .iter()
            .filter(|(path, _)| **path != folder && parent_of(path) == folder)
            .map(|(path, entry)| Self::item(path, entry))
            .collect())
    }

    fn get_file(&self, path: &str) -> RepoResult<RemoteItem> {
        self.begin(RepoOp::GetFile)?;
        let path = normalize(path);
        let entries = self.entries.lock();
        match entries.get(&path) {
            Some(entry) if !entry.is_collection => Ok(Self::item(&path, entry)),
            _ => Err(RepoError::NotFound { path }),
        }
    }

    fn get_folder(&self, path: &str) -> RepoResult<RemoteItem> {
        self.begin(RepoOp::GetFolder)?;
        let path = normalize(path);
        let entries = self.entries.lock();
        match entries.get(&path) {
            Some(entry) if entry.is_collection => Ok(Self::item(&path, entry)),
            _ => Err(RepoError::NotFound { path }),
        }
    }

    fn upload(&self, parent_path: &str, data: &[u8], name: &str) -> RepoResult<bool> {
        self.begin(RepoOp::Upload)?;
        let parent = normalize(parent_path);
        let path = child_of(&parent, name);
        let mut entries = self.entries.lock();
        Self::require_collection(&entries, &parent)?;
        match entries.get_mut(&path) {
            Some(entry) if entry.is_collection => Err(RepoError::Conflict { path }),
            Some(entry) => {
                entry.data = data.to_vec();
                entry.modified = Utc::now();
                Ok(true)
            }
            None => {
                entries.insert(path, Entry::document(data.to_vec()));
                Ok(true)
            }
        }
    }

    fn create_dir(&self, parent_path: &str, name: &str) -> RepoResult<bool> {
        self.begin(RepoOp::CreateDir)?;
        let parent = normalize(parent_path);
        let path = child_of(&parent, name);
        let mut entries = self.entries.lock();
        Self::require_collection(&entries, &parent)?;
        if entries.contains_key(&path) {
            return Err(RepoError::Protocol {
                status: Some(405),
                message: format!("{path} already exists"),
            });
        }
        entries.insert(path, Entry::collection());
        Ok(true)
    }

    fn delete_file(&self, path: &str) -> RepoResult<()> {
        self.begin(RepoOp::DeleteFile)?;
        let path = normalize(path);
        let mut entries = self.entries.lock();
        match entries.get(&path) {
            Some(entry) if !entry.is_collection => {
                entries.remove(&path);
                Ok(())
            }
            _ => Err(RepoError::NotFound { path }),
        }
    }

    fn delete_folder(&self, path: &str) -> RepoResult<()> {
        self.begin(RepoOp::DeleteFolder)?;
        let path = normalize(path);
        if path == self.root {
            return Err(RepoError::Forbidden { path });
        }
        let mut entries = self.entries.lock();
        match entries.get(&path) {
            Some(entry) if entry.is_collection => {
                remove_subtree(&mut entries, &path);
                Ok(())
            }
            _ => Err(RepoError::NotFound { path }),
        }
    }

    fn move_file(&self, source: &str, destination: &str) -> RepoResult<bool> {
        self.move_entry(RepoOp::MoveFile, source, destination)
    }

    fn move_folder(&self, source: &str, destination: &str) -> RepoResult<bool> {
        self.move_entry(RepoOp::MoveFolder, source, destination)
    }

    fn download(&self, path: &str) -> RepoResult<Vec<u8>> {
        self.begin(RepoOp::Download)?;
        let path = normalize(path);
        let entries = self.entries.lock();
        match entries.get(&path) {
            Some(entry) if !entry.is_collection => Ok(entry.data.clone()),
            _ => Err(RepoError::NotFound { path }),
        }
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

fn child_of(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn leaf(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn ensure_ancestors(entries: &mut BTreeMap<String, Entry>, path: &str) {
    let mut current = parent_of(path);
    while current != "/" {
        entries
            .entry(current.clone())
            .or_insert_with(Entry::collection);
        current = parent_of(&current);
    }
}

fn remove_subtree(entries: &mut BTreeMap<String, Entry>, path: &str) -> bool {
    let prefix = format!("{path}/");
    let doomed: Vec<String> = entries
        .keys()
        .filter(|k| k.starts_with(&prefix))
        .cloned()
        .collect();
    for key in doomed {
        entries.remove(&key);
    }
    entries.remove(path).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_immediate_children() {
        let repo = MemoryRepository::new("/dav/");
        repo.add_file("/dav/a.txt", b"a");
        repo.add_file("/dav/sub/b.txt", b"b");

        let mut names: Vec<String> = repo
            .list("/dav")
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "sub"]);
        assert_eq!(repo.calls(RepoOp::List), 1);
    }

    #[test]
    fn test_upload_requires_parent() {
        let repo = MemoryRepository::new("/dav");
        assert!(matches!(
            repo.upload("/dav/missing", b"x", "f.txt"),
            Err(RepoError::Conflict { .. })
        ));
        assert!(repo.upload("/dav", b"x", "f.txt").unwrap());
        assert_eq!(repo.contents("/dav/f.txt"), Some(b"x".to_vec()));
    }

    #[test]
    fn test_create_dir_existing_fails() {
        let repo = MemoryRepository::new("/dav");
        assert!(repo.create_dir("/dav", "docs").unwrap());
        assert!(matches!(
            repo.create_dir("/dav", "docs"),
            Err(RepoError::Protocol {
                status: Some(405),
                ..
            })
        ));
    }

    #[test]
    fn test_move_folder_moves_subtree() {
        let repo = MemoryRepository::new("/dav");
        repo.add_file("/dav/A/x", b"x");
        repo.add_file("/dav/A/y/z", b"z");

        assert!(repo.move_folder("/dav/A", "/dav/B").unwrap());
        assert!(!repo.exists("/dav/A"));
        assert!(!repo.exists("/dav/A/x"));
        assert_eq!(repo.contents("/dav/B/y/z"), Some(b"z".to_vec()));
    }

    #[test]
    fn test_move_into_itself_declined() {
        let repo = MemoryRepository::new("/dav");
        repo.add_folder("/dav/A");
        assert!(!repo.move_folder("/dav/A", "/dav/A/inner").unwrap());
    }

    #[test]
    fn test_delete_folder_removes_subtree() {
        let repo = MemoryRepository::new("/dav");
        repo.add_file("/dav/A/x", b"x");
        repo.delete_folder("/dav/A").unwrap();
        assert!(!repo.exists("/dav/A/x"));
        assert!(repo.delete_folder("/dav").is_err());
    }

    #[test]
    fn test_injected_failure_is_one_shot() {
        let repo = MemoryRepository::new("/dav");
        repo.add_file("/dav/a.txt", b"a");
        repo.fail_next(
            RepoOp::Download,
            RepoError::Unreachable {
                message: "boom".into(),
            },
        );
        assert!(repo.download("/dav/a.txt").is_err());
        assert_eq!(repo.download("/dav/a.txt").unwrap(), b"a");
        assert_eq!(repo.calls(RepoOp::Download), 2);
    }

    #[test]
    fn test_offline() {
        let repo = MemoryRepository::new("/dav");
        repo.set_offline(true);
        assert!(matches!(
            repo.list("/dav"),
            Err(RepoError::Unreachable { .. })
        ));
        repo.set_offline(false);
        assert!(repo.list("/dav").unwrap().is_empty());
    }
}
