//! Stats command - walk the volume and report cache behaviour.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tracing::instrument;

use davmount_cache::{CacheStatsSnapshot, path};
use davmount_fs::{DavFs, VolumeInfo};

use super::{is_synthetic, list};
use crate::output::{create_table, format_size};

#[derive(Args, Clone)]
pub struct StatsArgs {
    /// Folder to walk (default: root)
    #[arg(default_value = "/")]
    pub path: String,

    /// Number of full walks before reporting
    #[arg(short, long, default_value = "2")]
    pub passes: u32,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Serialize)]
struct StatsOutput {
    entries: usize,
    cached_nodes: usize,
    stats: CacheStatsSnapshot,
    volume: VolumeInfo,
}

#[instrument(level = "info", name = "cmd::stats", skip_all, fields(path = %args.path))]
pub fn run(fs: &DavFs, args: &StatsArgs) -> Result<()> {
    let root = path::normalize(&args.path);
    let mut entries = 0;
    for _ in 0..args.passes.max(1) {
        entries = walk(fs, &root)?;
    }

    let output = StatsOutput {
        entries,
        cached_nodes: fs.manager().cache().len(),
        stats: fs.stats(),
        volume: fs.volume_info(),
    };

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Table => print_table(&output),
    }
    Ok(())
}

/// Lists every folder below `dir` and returns the number of entries seen.
fn walk(fs: &DavFs, dir: &str) -> Result<usize> {
    let mut count = 0;
    for entry in list(fs, dir, None, None)? {
        if is_synthetic(&entry) {
            continue;
        }
        count += 1;
        if entry.info.is_directory() {
            count += walk(fs, &path::join(dir, &entry.name))?;
        }
    }
    Ok(count)
}

fn print_table(output: &StatsOutput) {
    let stats = &output.stats;
    let mut table = create_table();
    table.set_header(vec!["Metric", "Value"]);
    let rows = [
        ("Entries walked", output.entries.to_string()),
        ("Cached nodes", output.cached_nodes.to_string()),
        ("Hits", stats.hits.to_string()),
        ("Misses", stats.misses.to_string()),
        ("Negative hits", stats.negative_hits.to_string()),
        ("Pending hits", stats.pending_hits.to_string()),
        ("Hit rate", format!("{:.1}%", stats.hit_rate * 100.0)),
        ("Inserts", stats.inserts.to_string()),
        ("Evictions", stats.evictions.to_string()),
        (
            "Refreshes",
            format!(
                "{} scheduled, {} completed, {} failed, {} dropped",
                stats.refreshes_scheduled,
                stats.refreshes_completed,
                stats.refreshes_failed,
                stats.refreshes_dropped
            ),
        ),
        ("Volume label", output.volume.volume_label.clone()),
        ("Volume size", format_size(output.volume.total_size)),
    ];
    for (metric, value) in rows {
        table.add_row(vec![metric.to_string(), value]);
    }
    println!("{table}");
}
