//! Stat command - show the cached metadata of one entry.

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use serde::Serialize;
use tracing::instrument;

use davmount_cache::{FileInfo, attributes, path};
use davmount_fs::DavFs;

use crate::output::{create_table, format_filetime, format_size};

#[derive(ClapArgs)]
pub struct Args {
    /// Path within the volume
    pub path: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StatOutput {
    path: String,
    repository_path: String,
    info: FileInfo,
    security_descriptor: String,
}

#[instrument(level = "info", name = "cmd::stat", skip_all, fields(path = %args.path))]
pub fn execute(fs: &DavFs, args: &Args) -> Result<()> {
    let path = path::normalize(&args.path);
    let security = fs
        .get_security_by_name(&path)
        .with_context(|| format!("Failed to stat {path}"))?;
    let handle = fs.open(&path)?;
    let output = StatOutput {
        repository_path: handle.node().repository_path(),
        info: fs.get_file_info(&handle),
        security_descriptor: String::from_utf8_lossy(&security.security_descriptor).into_owned(),
        path,
    };
    fs.close(handle);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let info = &output.info;
    let mut table = create_table();
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec!["Path".to_string(), output.path.clone()]);
    table.add_row(vec!["Repository path".to_string(), output.repository_path.clone()]);
    table.add_row(vec!["Attributes".to_string(), format_attributes(info.file_attributes)]);
    table.add_row(vec![
        "Size".to_string(),
        format!("{} ({} bytes)", format_size(info.file_size), info.file_size),
    ]);
    table.add_row(vec!["Allocation".to_string(), info.allocation_size.to_string()]);
    table.add_row(vec!["Created".to_string(), format_filetime(info.creation_time)]);
    table.add_row(vec!["Accessed".to_string(), format_filetime(info.last_access_time)]);
    table.add_row(vec!["Modified".to_string(), format_filetime(info.last_write_time)]);
    table.add_row(vec!["Changed".to_string(), format_filetime(info.change_time)]);
    table.add_row(vec!["Security".to_string(), output.security_descriptor.clone()]);
    println!("{table}");
    Ok(())
}

fn format_attributes(value: u32) -> String {
    let names: Vec<&str> = [
        (attributes::READONLY, "readonly"),
        (attributes::HIDDEN, "hidden"),
        (attributes::DIRECTORY, "directory"),
        (attributes::ARCHIVE, "archive"),
        (attributes::NORMAL, "normal"),
    ]
    .into_iter()
    .filter(|(bit, _)| value & bit != 0)
    .map(|(_, name)| name)
    .collect();
    format!("{value:#06x} {}", names.join(","))
}
