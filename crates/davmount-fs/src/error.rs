//! Error taxonomy for filesystem callbacks.
//!
//! Every callback reports one [`FsError`]. The host runtime wants an
//! NTSTATUS-style code ([`FsError::status`]); POSIX-style hosts get an errno
//! ([`FsError::to_errno`]).
//!
//! Repository failures are mapped per call site: the same remote condition
//! means different things during a lookup, a create, a write-through upload
//! or a move, so each has its own conversion below.

use davmount_cache::{CacheError, ConfigError, RepoError};
use thiserror::Error;

/// Host status codes.
pub struct FsStatus;

#[allow(clippy::cast_possible_wrap)]
impl FsStatus {
    pub const SUCCESS: i32 = 0;
    pub const END_OF_FILE: i32 = 0xC000_0011_u32 as i32;
    pub const INVALID_DEVICE_REQUEST: i32 = 0xC000_0010_u32 as i32;
    pub const ACCESS_DENIED: i32 = 0xC000_0022_u32 as i32;
    pub const OBJECT_NAME_NOT_FOUND: i32 = 0xC000_0034_u32 as i32;
    pub const OBJECT_NAME_COLLISION: i32 = 0xC000_0035_u32 as i32;
    pub const DISK_FULL: i32 = 0xC000_007F_u32 as i32;
    pub const INSUFFICIENT_RESOURCES: i32 = 0xC000_009A_u32 as i32;
    pub const UNEXPECTED_IO_ERROR: i32 = 0xC000_00E9_u32 as i32;
    pub const NETWORK_UNREACHABLE: i32 = 0xC000_023C_u32 as i32;
    pub const CANNOT_MAKE: i32 = 0xC000_02EA_u32 as i32;
}

/// Errors returned by [`DavFs`](crate::DavFs) callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("name collision: {0}")]
    NameCollision(String),

    #[error("repository unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("cannot create: {0}")]
    CannotCreate(String),

    /// Buffer growth beyond the configured maximum file size.
    #[error("file would exceed {max} bytes")]
    DiskFull { max: u64 },

    #[error("cannot allocate {requested} bytes")]
    InsufficientResources { requested: u64 },

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("operation not supported")]
    Unsupported,

    #[error("end of file")]
    EndOfFile,
}

impl FsError {
    /// Host status code for this error.
    pub fn status(&self) -> i32 {
        match self {
            FsError::NotFound(_) => FsStatus::OBJECT_NAME_NOT_FOUND,
            FsError::NameCollision(_) => FsStatus::OBJECT_NAME_COLLISION,
            FsError::NetworkUnreachable(_) => FsStatus::NETWORK_UNREACHABLE,
            FsError::AccessDenied(_) => FsStatus::ACCESS_DENIED,
            FsError::CannotCreate(_) => FsStatus::CANNOT_MAKE,
            FsError::DiskFull { .. } => FsStatus::DISK_FULL,
            FsError::InsufficientResources { .. } => FsStatus::INSUFFICIENT_RESOURCES,
            FsError::IoError(_) => FsStatus::UNEXPECTED_IO_ERROR,
            FsError::Unsupported => FsStatus::INVALID_DEVICE_REQUEST,
            FsError::EndOfFile => FsStatus::END_OF_FILE,
        }
    }

    /// Converts this error to a libc error code.
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::NameCollision(_) => libc::EEXIST,
            FsError::NetworkUnreachable(_) => libc::ENETUNREACH,
            FsError::AccessDenied(_) => libc::EACCES,
            FsError::CannotCreate(_) | FsError::IoError(_) => libc::EIO,
            FsError::DiskFull { .. } => libc::ENOSPC,
            FsError::InsufficientResources { .. } => libc::ENOMEM,
            FsError::Unsupported => libc::ENOTSUP,
            // Reads past the end are short reads, not failures.
            FsError::EndOfFile => 0,
        }
    }

    /// Mapping for lookups (resolve, open, get_security_by_name).
    pub fn from_lookup(error: &RepoError) -> Self {
        match error {
            RepoError::Unreachable { message } => FsError::NetworkUnreachable(message.clone()),
            RepoError::Forbidden { path } => FsError::AccessDenied(path.clone()),
            other => FsError::NotFound(other.to_string()),
        }
    }

    /// Mapping for file upload and folder creation.
    ///
    /// A conflict is reported as access denied: existence was checked before
    /// the request, so a conflict means the parent rejected it.
    pub fn from_create(error: &RepoError) -> Self {
        match error {
            RepoError::Conflict { path } | RepoError::Forbidden { path } => {
                FsError::AccessDenied(path.clone())
            }
            RepoError::Unreachable { message } => FsError::NetworkUnreachable(message.clone()),
            other => FsError::CannotCreate(other.to_string()),
        }
    }

    /// Mapping for content uploads after a write or flush.
    pub fn from_upload(error: &RepoError) -> Self {
        match error {
            RepoError::Conflict { path } | RepoError::Forbidden { path } => {
                FsError::AccessDenied(path.clone())
            }
            RepoError::Unreachable { message } => FsError::NetworkUnreachable(message.clone()),
            other => FsError::IoError(other.to_string()),
        }
    }

    /// Mapping for content downloads.
    pub fn from_download(error: &RepoError) -> Self {
        match error {
            RepoError::NotFound { path } => FsError::NotFound(path.clone()),
            RepoError::Forbidden { path } => FsError::AccessDenied(path.clone()),
            other => FsError::NetworkUnreachable(other.to_string()),
        }
    }

    /// Mapping for the existence probe that precedes create and rename.
    pub fn from_probe(error: &RepoError) -> Self {
        match error {
            RepoError::Unreachable { message } => FsError::NetworkUnreachable(message.clone()),
            other => FsError::CannotCreate(other.to_string()),
        }
    }

    /// Mapping for remote moves.
    pub fn from_move(error: &RepoError) -> Self {
        match error {
            RepoError::Unreachable { message } => FsError::NetworkUnreachable(message.clone()),
            other => FsError::AccessDenied(other.to_string()),
        }
    }
}

/// Result type for filesystem callbacks.
pub type FsResult<T> = Result<T, FsError>;

/// Errors that prevent a volume from mounting.
#[derive(Debug, Error)]
pub enum MountError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to start cache: {0}")]
    Cache(#[from] CacheError),

    #[error("cannot reach repository root {root}: {source}")]
    Unreachable {
        root: String,
        #[source]
        source: RepoError,
    },
}

impl MountError {
    /// Host status code for this error.
    pub fn status(&self) -> i32 {
        match self {
            MountError::Unreachable { .. } => FsStatus::NETWORK_UNREACHABLE,
            MountError::Config(_) | MountError::Cache(_) => FsStatus::INVALID_DEVICE_REQUEST,
        }
    }
}
