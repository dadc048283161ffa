use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::instrument;

use davmount_cache::path;
use davmount_fs::{DavFs, FsError};

/// Bytes requested per read callback.
const CHUNK: u64 = 64 * 1024;

#[derive(ClapArgs)]
pub struct Args {
    /// File path within the volume
    pub file: String,
}

#[instrument(level = "info", name = "cmd::cat", skip_all, fields(file = %args.file))]
pub fn execute(fs: &DavFs, args: &Args) -> Result<()> {
    let path = path::normalize(&args.file);
    let handle = fs
        .open(&path)
        .with_context(|| format!("Failed to open {path}"))?;

    let mut stdout = io::stdout().lock();
    let mut offset = 0;
    let result = loop {
        match fs.read(&handle, offset, CHUNK) {
            Ok(chunk) => {
                offset += chunk.len() as u64;
                if let Err(e) = stdout.write_all(&chunk) {
                    break Err(e.into());
                }
            }
            Err(FsError::EndOfFile) => break Ok(()),
            Err(e) => break Err(anyhow::Error::new(e).context(format!("Failed to read {path}"))),
        }
    };
    fs.close(handle);
    result?;
    stdout.flush()?;
    Ok(())
}
