//! Mounting a local directory tree as an in-memory repository.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument};

use davmount_cache::{CacheConfig, MemoryRepository, path};
use davmount_fs::{DavFs, MountConfig};

/// Mount options extracted from the global CLI flags.
#[derive(Clone, Default)]
pub struct SourceOptions {
    pub config: Option<PathBuf>,
    pub no_cache: bool,
}

impl SourceOptions {
    fn mount_config(&self) -> Result<MountConfig> {
        let mut config = match &self.config {
            Some(file) => MountConfig::from_json_file(file)
                .with_context(|| format!("Failed to load config: {}", file.display()))?,
            None => MountConfig::new("/dav", "localhost"),
        };
        if self.no_cache {
            config = config.cache(CacheConfig::disabled());
        }
        Ok(config)
    }
}

/// Copies `source` into a fresh repository and mounts it.
#[instrument(level = "info", skip_all, fields(source = %source.display()))]
pub fn mount(source: &Path, options: &SourceOptions) -> Result<DavFs> {
    if !source.exists() {
        bail!("Source path does not exist: {}", source.display());
    }
    if !source.is_dir() {
        bail!("Source path is not a directory: {}", source.display());
    }

    let config = options.mount_config()?;
    let repo = MemoryRepository::new(&config.repository_root);
    let entries = seed(&repo, source, &config.repository_root)?;
    info!(entries, root = %config.repository_root, "repository seeded");

    DavFs::mount(config, Arc::new(repo)).context("Failed to mount volume")
}

/// Adds every file and directory below `dir` to `repo` under `remote`.
///
/// Returns the number of entries added. Symlinks and names that are not
/// valid UTF-8 are skipped.
pub fn seed(repo: &MemoryRepository, dir: &Path, remote: &str) -> Result<usize> {
    let mut count = 0;
    let entries = fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            debug!(path = %entry.path().display(), "skipping non-UTF-8 name");
            continue;
        };
        let remote_path = path::join(remote, name);
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            repo.add_folder(&remote_path);
            count += 1 + seed(repo, &entry.path(), &remote_path)?;
        } else if file_type.is_file() {
            let data = fs::read(entry.path())
                .with_context(|| format!("Failed to read {}", entry.path().display()))?;
            repo.add_file(&remote_path, &data);
            count += 1;
        } else {
            debug!(path = %entry.path().display(), "skipping special file");
        }
    }
    Ok(count)
}
