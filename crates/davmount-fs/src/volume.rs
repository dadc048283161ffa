//! Volume parameters reported to the host at mount time.

use chrono::{DateTime, Utc};
use davmount_cache::node::{SECTOR_SIZE, SECTORS_PER_ALLOCATION_UNIT, to_filetime};
use serde::Serialize;

use crate::config::MountConfig;

/// File-system name shown by the host.
pub const FILE_SYSTEM_NAME: &str = "davFS";

/// FILETIME ticks per second.
const TICKS_PER_SECOND: u64 = 10_000_000;

/// Static volume description handed to the host runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeParams {
    pub sector_size: u16,
    pub sectors_per_allocation_unit: u16,
    pub case_sensitive_search: bool,
    pub case_preserved_names: bool,
    pub unicode_on_disk: bool,
    pub persistent_acls: bool,
    pub reparse_points: bool,
    pub named_streams: bool,
    pub post_cleanup_when_modified_only: bool,
    /// Metadata cache hint in milliseconds; `u32::MAX` never expires.
    pub file_info_timeout: u32,
    pub file_system_name: String,
    /// Network prefix, `\<authority>\dav`.
    pub prefix: String,
    pub volume_creation_time: u64,
    pub volume_serial_number: u32,
}

impl VolumeParams {
    /// Parameters for a volume mounted at `mounted_at`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(config: &MountConfig, mounted_at: DateTime<Utc>) -> Self {
        let creation = to_filetime(mounted_at);
        let serial = (creation / TICKS_PER_SECOND) as u32;
        Self {
            sector_size: SECTOR_SIZE as u16,
            sectors_per_allocation_unit: SECTORS_PER_ALLOCATION_UNIT as u16,
            case_sensitive_search: false,
            case_preserved_names: true,
            unicode_on_disk: true,
            persistent_acls: false,
            reparse_points: false,
            named_streams: false,
            post_cleanup_when_modified_only: true,
            file_info_timeout: config.metadata_freshness,
            file_system_name: FILE_SYSTEM_NAME.into(),
            prefix: format!(r"\{}\dav", config.authority),
            volume_creation_time: creation,
            volume_serial_number: serial,
        }
    }
}

/// Size and label of the volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeInfo {
    pub total_size: u64,
    pub free_size: u64,
    pub volume_label: String,
}

impl VolumeInfo {
    /// The repository has no quota, so the volume reports a nominal
    /// `max_file_nodes * max_file_size` as both total and free.
    pub fn new(config: &MountConfig, label: &str) -> Self {
        let size = config.max_file_nodes.saturating_mul(config.max_file_size);
        Self {
            total_size: size,
            free_size: size,
            volume_label: label.to_string(),
        }
    }
}
