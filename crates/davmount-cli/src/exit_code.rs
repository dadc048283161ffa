//! Exit codes for the CLI.
//!
//! These follow common Unix conventions and provide meaningful
//! status information for scripting and automation.

/// Successful execution
pub const SUCCESS: u8 = 0;

/// General/unspecified error
pub const GENERAL_ERROR: u8 = 1;

/// Permission denied by the repository or the local filesystem
pub const PERMISSION_DENIED: u8 = 5;

/// The volume could not be mounted
pub const MOUNT_FAILED: u8 = 6;

/// File or directory not found (within the volume or the source tree)
pub const NOT_FOUND: u8 = 7;
