pub mod cat;
pub mod ls;
pub mod stat;
pub mod stats;
pub mod tree;

use anyhow::{Context, Result};
use davmount_cache::{PARENT_ENTRY, SELF_ENTRY};
use davmount_fs::{DavFs, DirListing};

/// Listing of the folder at `path`, `.` and `..` included, resuming after
/// `marker` when one is given.
pub fn list(
    fs: &DavFs,
    path: &str,
    pattern: Option<&str>,
    marker: Option<&str>,
) -> Result<Vec<DirListing>> {
    let handle = fs
        .open(path)
        .with_context(|| format!("Failed to open {path}"))?;
    let listing = fs.read_directory(&handle, pattern, marker);
    fs.close(handle);
    listing.with_context(|| format!("Failed to list {path}"))
}

/// True for the `.` and `..` entries.
pub fn is_synthetic(entry: &DirListing) -> bool {
    entry.name == SELF_ENTRY || entry.name == PARENT_ENTRY
}
