//! Boundary to the remote document repository.
//!
//! The repository client performs the actual network calls. Every method
//! blocks the calling thread until the remote answers; timeouts are the
//! client's own concern and surface here as [`RepoError::Unreachable`].
//!
//! All paths crossing this boundary are repository paths (see
//! [`PathMapper`](crate::PathMapper)).

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::trace;

/// Metadata for one remote document or collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    /// Repository path of the item.
    pub path: String,
    /// Leaf name as exposed in the mounted namespace.
    pub name: String,
    /// True for collections (folders).
    pub is_collection: bool,
    /// Content length in bytes (0 for collections).
    pub content_length: u64,
    /// Creation time reported by the server.
    pub created: DateTime<Utc>,
    /// Last modification time reported by the server.
    pub modified: DateTime<Utc>,
}

/// Failure conditions raised by a repository client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepoError {
    /// The remote confirms the path does not exist.
    #[error("not found: {path}")]
    NotFound { path: String },

    /// The remote rejected the request because of a conflicting state.
    #[error("conflict on {path}")]
    Conflict { path: String },

    /// The remote refused the operation for permission reasons.
    #[error("access forbidden: {path}")]
    Forbidden { path: String },

    /// The remote could not be reached at the transport level.
    #[error("repository unreachable: {message}")]
    Unreachable { message: String },

    /// Any other protocol-level failure.
    #[error("protocol error (status {status:?}): {message}")]
    Protocol { status: Option<u16>, message: String },
}

impl RepoError {
    /// Classifies an HTTP status returned for `path`.
    pub fn from_status(status: u16, path: &str) -> Self {
        match status {
            404 | 410 => RepoError::NotFound {
                path: path.to_string(),
            },
            409 | 412 | 423 => RepoError::Conflict {
                path: path.to_string(),
            },
            401 | 403 => RepoError::Forbidden {
                path: path.to_string(),
            },
            502..=504 => RepoError::Unreachable {
                message: format!("gateway returned {status} for {path}"),
            },
            _ => RepoError::Protocol {
                status: Some(status),
                message: path.to_string(),
            },
        }
    }

    /// Returns true for a confirmed non-existence.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepoError::NotFound { .. })
    }
}

/// Result type for repository calls.
pub type RepoResult<T> = Result<T, RepoError>;

/// Blocking client for the remote document repository.
pub trait Repository: Send + Sync {
    /// Lists the immediate children of a collection.
    fn list(&self, folder_path: &str) -> RepoResult<Vec<RemoteItem>>;

    /// Fetches metadata for a document.
    fn get_file(&self, path: &str) -> RepoResult<RemoteItem>;

    /// Fetches metadata for a collection.
    fn get_folder(&self, path: &str) -> RepoResult<RemoteItem>;

    /// Uploads `data` as `name` inside `parent_path`, replacing any existing
    /// document. Returns false if the server declined without an error.
    fn upload(&self, parent_path: &str, data: &[u8], name: &str) -> RepoResult<bool>;

    /// Creates collection `name` inside `parent_path`.
    fn create_dir(&self, parent_path: &str, name: &str) -> RepoResult<bool>;

    fn delete_file(&self, path: &str) -> RepoResult<()>;

    fn delete_folder(&self, path: &str) -> RepoResult<()>;

    fn move_file(&self, source: &str, destination: &str) -> RepoResult<bool>;

    fn move_folder(&self, source: &str, destination: &str) -> RepoResult<bool>;

    /// Downloads the full content of a document.
    fn download(&self, path: &str) -> RepoResult<Vec<u8>>;
}

/// Fetches metadata for `path` without knowing whether it is a document or
/// a collection.
///
/// A dot in the last segment suggests a document, so that kind is tried
/// first; a not-found answer retries as the other kind. `Ok(None)` means
/// both kinds were confirmed absent.
pub fn fetch_item(repository: &dyn Repository, path: &str) -> RepoResult<Option<RemoteItem>> {
    let leaf = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    let looks_like_file = leaf.contains('.');

    let (first, second): (FetchFn, FetchFn) = if looks_like_file {
        (get_file, get_folder)
    } else {
        (get_folder, get_file)
    };

    match first(repository, path) {
        Ok(item) => Ok(Some(item)),
        Err(e) if e.is_not_found() => {
            trace!(path, "first guess not found, retrying as the other kind");
            match second(repository, path) {
                Ok(item) => Ok(Some(item)),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

type FetchFn = fn(&dyn Repository, &str) -> RepoResult<RemoteItem>;

fn get_file(repository: &dyn Repository, path: &str) -> RepoResult<RemoteItem> {
    repository.get_file(path)
}

fn get_folder(repository: &dyn Repository, path: &str) -> RepoResult<RemoteItem> {
    repository.get_folder(path)
}
