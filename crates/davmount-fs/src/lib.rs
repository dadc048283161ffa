//! Filesystem adapter for WebDAV-backed volumes.
//!
//! [`DavFs`] implements the callbacks a user-mode filesystem host drives
//! (create, open, read, write, rename, cleanup, close, directory
//! enumeration) on top of the `davmount-cache` metadata cache. Metadata is
//! answered from the cache; content is buffered per node and uploaded whole,
//! either after each write or when the handle is flushed, cleaned up or
//! closed.
//!
//! # Modules
//!
//! - [`adapter`] - The callbacks and the mount lifecycle
//! - [`content`] - In-memory file buffer with size and allocation rules
//! - [`config`] - Mount configuration
//! - [`error`] - Callback errors and host status codes
//! - [`handle`] - Per-open context and enumeration cursor
//! - [`volume`] - Volume parameters and size reporting
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use davmount_cache::MemoryRepository;
//! use davmount_fs::{DavFs, MountConfig};
//!
//! let repo = Arc::new(MemoryRepository::new("/dav"));
//! repo.add_file("/dav/hello.txt", b"hello");
//!
//! let fs = DavFs::mount(MountConfig::new("/dav", "files.example.org"), repo)?;
//! let handle = fs.open("/hello.txt")?;
//! assert_eq!(fs.read(&handle, 0, 64)?, b"hello");
//! fs.close(handle);
//! fs.unmount();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod adapter;
pub mod config;
pub mod content;
pub mod error;
pub mod handle;
pub mod pattern;
pub mod volume;

pub use adapter::{DavFs, KEEP_ATTRIBUTES, SecurityInfo, WriteReply, cleanup};
pub use config::{FlushMode, MountConfig};
pub use content::{ContentBuffer, Written};
pub use error::{FsError, FsResult, FsStatus, MountError};
pub use handle::{DirListing, FileHandle};
pub use volume::{VolumeInfo, VolumeParams};
