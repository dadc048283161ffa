//! List command - list directory contents through the adapter.
//!
//! # Examples
//!
//! ```bash
//! # List the volume root
//! davmount ls ./site
//!
//! # List with details
//! davmount ls ./site -l /documents
//!
//! # Filter with a wildcard and output JSON
//! davmount ls ./site --pattern '*.pdf' --json /documents | jq '.entries[].name'
//! ```

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use serde::Serialize;
use tracing::instrument;

use davmount_cache::path;
use davmount_fs::{DavFs, DirListing};

use super::{is_synthetic, list};
use crate::output::{create_table, format_entry_type, format_filetime, format_size};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Path within the volume (default: root)
    #[arg(default_value = "/")]
    pub path: String,

    /// Show detailed information
    #[arg(short, long)]
    pub long: bool,

    /// Include the `.` and `..` entries
    #[arg(short, long)]
    pub all: bool,

    /// Only show names matching this wildcard (`*`, `?`)
    #[arg(short, long)]
    pub pattern: Option<String>,

    /// Resume after this entry name
    #[arg(long)]
    pub marker: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// JSON output format for ls command
#[derive(Serialize)]
struct LsOutput {
    path: String,
    entries: Vec<EntryInfo>,
}

#[derive(Serialize)]
struct EntryInfo {
    name: String,
    #[serde(rename = "type")]
    entry_type: &'static str,
    size: u64,
    modified: String,
}

impl From<&DirListing> for EntryInfo {
    fn from(entry: &DirListing) -> Self {
        let is_dir = entry.info.is_directory();
        Self {
            name: entry.name.clone(),
            entry_type: if is_dir { "directory" } else { "file" },
            size: entry.info.file_size,
            modified: format_filetime(entry.info.last_write_time),
        }
    }
}

#[instrument(level = "info", name = "cmd::ls", skip_all, fields(path = %args.path))]
pub fn execute(fs: &DavFs, args: &Args) -> Result<()> {
    let path = path::normalize(&args.path);
    let entries = collect_entries(fs, &path, args)?;

    if args.json {
        let output = LsOutput {
            path,
            entries: entries.iter().map(EntryInfo::from).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if args.long {
        print_long_format(&entries);
    } else {
        for entry in &entries {
            let suffix = if entry.info.is_directory() && !is_synthetic(entry) { "/" } else { "" };
            println!("{}{suffix}", entry.name);
        }
    }
    Ok(())
}

fn collect_entries(fs: &DavFs, path: &str, args: &Args) -> Result<Vec<DirListing>> {
    let handle = fs
        .open(path)
        .with_context(|| format!("Failed to open {path}"))?;
    let is_dir = handle.is_directory();
    let info = handle.info();
    fs.close(handle);

    // A file lists as itself.
    if !is_dir {
        return Ok(vec![DirListing {
            name: path::name(path).to_string(),
            info,
        }]);
    }

    let mut entries = list(fs, path, args.pattern.as_deref(), args.marker.as_deref())?;
    if !args.all {
        entries.retain(|entry| !is_synthetic(entry));
    }
    Ok(entries)
}

fn print_long_format(entries: &[DirListing]) {
    let mut table = create_table();
    table.set_header(vec!["Type", "Size", "Modified", "Name"]);
    for entry in entries {
        let is_dir = entry.info.is_directory();
        let size = if is_dir {
            "-".to_string()
        } else {
            format_size(entry.info.file_size)
        };
        table.add_row(vec![
            format_entry_type(is_dir).to_string(),
            size,
            format_filetime(entry.info.last_write_time),
            entry.name.clone(),
        ]);
    }
    println!("{table}");
}
