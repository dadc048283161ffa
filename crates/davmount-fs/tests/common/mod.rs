//! Common test utilities for adapter integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use davmount_cache::{CacheConfig, MemoryRepository};
use davmount_fs::{DavFs, FileHandle, FlushMode, MountConfig};

pub const ROOT: &str = "/dav/docs";

static TRACING: Once = Once::new();

/// Routes adapter logs to the test writer; `RUST_LOG` selects the level.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A mounted adapter over an in-memory repository rooted at [`ROOT`].
pub struct TestMount {
    pub repo: Arc<MemoryRepository>,
    pub fs: DavFs,
}

impl TestMount {
    pub fn new(flush_mode: FlushMode) -> Self {
        Self::with_cache(flush_mode, CacheConfig::default().preload_folders(false))
    }

    pub fn write_back() -> Self {
        Self::new(FlushMode::WriteBack)
    }

    pub fn write_through() -> Self {
        Self::new(FlushMode::WriteThrough)
    }

    pub fn with_cache(flush_mode: FlushMode, cache: CacheConfig) -> Self {
        init_tracing();
        let repo = Arc::new(MemoryRepository::new(ROOT));
        let config = MountConfig::new(ROOT, "files.example.org")
            .flush_mode(flush_mode)
            .cache(cache);
        let fs = DavFs::mount(config, repo.clone()).expect("mount failed");
        Self { repo, fs }
    }

    /// A mount whose cache entries expire after `ttl`.
    pub fn with_ttl(flush_mode: FlushMode, ttl: Duration) -> Self {
        Self::with_cache(
            flush_mode,
            CacheConfig::default().preload_folders(false).ttl(ttl),
        )
    }

    /// Repository path for a mounted path.
    pub fn remote(&self, local: &str) -> String {
        format!("{ROOT}{local}")
    }

    pub fn add_file(&self, local: &str, data: &[u8]) {
        self.repo.add_file(&self.remote(local), data);
    }

    pub fn add_folder(&self, local: &str) {
        self.repo.add_folder(&self.remote(local));
    }

    pub fn remote_contents(&self, local: &str) -> Option<Vec<u8>> {
        self.repo.contents(&self.remote(local))
    }

    pub fn remote_exists(&self, local: &str) -> bool {
        self.repo.exists(&self.remote(local))
    }

    /// Reads the whole file through a fresh handle.
    pub fn read_all(&self, local: &str) -> Vec<u8> {
        let handle = self.fs.open(local).expect("open failed");
        let size = handle.info().file_size.max(1);
        let data = match self.fs.read(&handle, 0, size) {
            Ok(data) => data,
            Err(davmount_fs::FsError::EndOfFile) => Vec::new(),
            Err(e) => panic!("read of {local} failed: {e}"),
        };
        self.fs.close(handle);
        data
    }

    /// Entry names of a full enumeration, drained through the handle cursor.
    pub fn list_names(&self, handle: &FileHandle, pattern: Option<&str>) -> Vec<String> {
        let mut names = Vec::new();
        while let Some(entry) = self.fs.list_directory(handle, pattern, None) {
            names.push(entry.name);
        }
        names
    }
}

impl Drop for TestMount {
    fn drop(&mut self) {
        if self.fs.is_mounted() {
            self.fs.unmount();
        }
    }
}
