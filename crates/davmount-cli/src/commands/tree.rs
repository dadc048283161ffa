//! Tree command - recursive listing through the adapter.

use anyhow::Result;
use clap::Args as ClapArgs;
use tracing::instrument;

use davmount_cache::path;
use davmount_fs::DavFs;

use super::{is_synthetic, list};

#[derive(ClapArgs)]
pub struct Args {
    /// Folder to start from (default: root)
    #[arg(default_value = "/")]
    pub path: String,

    /// Maximum depth to descend
    #[arg(short = 'L', long)]
    pub depth: Option<usize>,
}

#[derive(Default)]
struct Counts {
    directories: usize,
    files: usize,
}

#[instrument(level = "info", name = "cmd::tree", skip_all, fields(path = %args.path))]
pub fn execute(fs: &DavFs, args: &Args) -> Result<()> {
    let root = path::normalize(&args.path);
    println!("{root}");
    let mut counts = Counts::default();
    print_level(fs, &root, "", 1, args.depth, &mut counts)?;
    println!("\n{} directories, {} files", counts.directories, counts.files);
    Ok(())
}

fn print_level(
    fs: &DavFs,
    dir: &str,
    prefix: &str,
    depth: usize,
    max_depth: Option<usize>,
    counts: &mut Counts,
) -> Result<()> {
    let entries: Vec<_> = list(fs, dir, None, None)?
        .into_iter()
        .filter(|entry| !is_synthetic(entry))
        .collect();

    for (i, entry) in entries.iter().enumerate() {
        let last = i + 1 == entries.len();
        let (branch, indent) = if last { ("└── ", "    ") } else { ("├── ", "│   ") };
        println!("{prefix}{branch}{}", entry.name);

        if entry.info.is_directory() {
            counts.directories += 1;
            if max_depth.is_none_or(|max| depth < max) {
                let child = path::join(dir, &entry.name);
                print_level(fs, &child, &format!("{prefix}{indent}"), depth + 1, max_depth, counts)?;
            }
        } else {
            counts.files += 1;
        }
    }
    Ok(())
}
