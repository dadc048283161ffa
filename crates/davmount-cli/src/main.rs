#![deny(unsafe_code)]

mod commands;
mod exit_code;
mod output;
mod source;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use davmount_fs::{DavFs, FsError, MountError};

use crate::commands::{cat, ls, stat, stats, tree};
use crate::source::SourceOptions;

/// Inspect a davmount volume offline, backed by a local directory tree
#[derive(Parser)]
#[command(name = "davmount")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # List a folder as the adapter sees it
    davmount ls ./site /documents

    # Print a file through the read callback
    davmount cat ./site /documents/notes.txt

    # Walk the tree twice and report cache hit rates
    davmount stats ./site --format json

    # Use a mount configuration and trace every callback
    RUST_LOG=davmount_fs=debug davmount --config mount.json tree ./site
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Mount configuration file (JSON)
    #[arg(long, value_name = "FILE", env = "DAVMOUNT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Bypass the metadata cache
    #[arg(long, global = true)]
    no_cache: bool,

    #[command(subcommand)]
    command: Commands,
}

impl From<&Cli> for SourceOptions {
    fn from(cli: &Cli) -> Self {
        Self {
            config: cli.config.clone(),
            no_cache: cli.no_cache,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List directory contents
    Ls(SourceCommand<ls::Args>),

    /// Show metadata of a file or folder
    Stat(SourceCommand<stat::Args>),

    /// Read and output file contents
    Cat(SourceCommand<cat::Args>),

    /// Show directory tree
    Tree(SourceCommand<tree::Args>),

    /// Walk the volume and show cache statistics
    Stats(SourceCommand<stats::StatsArgs>),
}

/// Wrapper for commands that operate on a mounted source tree
#[derive(Parser, Clone)]
pub struct SourceCommand<T: clap::Args> {
    /// Local directory served as the repository
    #[arg(value_name = "SOURCE")]
    pub source: PathBuf,

    #[command(flatten)]
    pub args: T,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            let code = categorize_error(&e);

            let args: Vec<String> = std::env::args().collect();
            let is_quiet = args.iter().any(|a| a == "-q" || a == "--quiet");
            if !is_quiet {
                eprintln!("Error: {e:#}");
            }

            ExitCode::from(code)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if !cli.quiet {
        setup_tracing(cli.verbose);
    }

    let options = SourceOptions::from(&cli);
    match cli.command {
        Commands::Ls(cmd) => execute_source_command(&cmd, &options, ls::execute),
        Commands::Stat(cmd) => execute_source_command(&cmd, &options, stat::execute),
        Commands::Cat(cmd) => execute_source_command(&cmd, &options, cat::execute),
        Commands::Tree(cmd) => execute_source_command(&cmd, &options, tree::execute),
        Commands::Stats(cmd) => execute_source_command(&cmd, &options, stats::run),
    }
}

/// Mounts the command's source tree, runs `f` and unmounts.
fn execute_source_command<T, F>(cmd: &SourceCommand<T>, options: &SourceOptions, f: F) -> Result<()>
where
    T: clap::Args,
    F: FnOnce(&DavFs, &T) -> Result<()>,
{
    let fs = source::mount(&cmd.source, options)?;
    let result = f(&fs, &cmd.args);
    fs.unmount();
    result
}

/// Set up tracing/logging based on verbosity level
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

/// Categorize an error into an exit code using typed error downcasting
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(fs_err) = cause.downcast_ref::<FsError>() {
            match fs_err {
                FsError::NotFound(_) => return exit_code::NOT_FOUND,
                FsError::AccessDenied(_) => return exit_code::PERMISSION_DENIED,
                _ => {}
            }
        }

        if cause.downcast_ref::<MountError>().is_some() {
            return exit_code::MOUNT_FAILED;
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::PermissionDenied => return exit_code::PERMISSION_DENIED,
                io::ErrorKind::NotFound => return exit_code::NOT_FOUND,
                _ => {}
            }
        }
    }

    exit_code::GENERAL_ERROR
}
