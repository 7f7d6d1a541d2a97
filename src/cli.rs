//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// Durable download jobs with digest verification and retries.
///
/// Jobs are stored in SQLite and survive restarts: `dlkeeper run` resumes
/// every job that had not finished.
#[derive(Parser, Debug)]
#[command(name = "dlkeeper")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/dlkeeper/config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, value_name = "PATH", global = true)]
    pub database: Option<PathBuf>,

    /// Root directory for downloaded files
    #[arg(long, value_name = "DIR", global = true)]
    pub work_dir: Option<PathBuf>,

    /// Also append logs to this file
    #[arg(long, value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit a URL with its expected MD5 or SHA-256 digest
    Submit(SubmitArgs),
    /// Show one job by id, URL, or digest
    Status(StatusArgs),
    /// List all jobs, unfinished first
    List(ListArgs),
    /// Resume every unfinished job and wait for them
    Run,
}

/// Arguments for `submit`.
#[derive(ClapArgs, Debug)]
pub struct SubmitArgs {
    /// URL to download
    pub url: String,

    /// Expected digest: 32 hex chars (MD5) or 64 (SHA-256), optional `md5:`/`sha256:` prefix
    pub digest: String,

    /// Record the job and exit; `dlkeeper run` downloads it later
    #[arg(long)]
    pub detach: bool,
}

/// Arguments for `status`.
#[derive(ClapArgs, Debug)]
pub struct StatusArgs {
    /// Job id, source URL, or expected digest
    pub job: String,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `list`.
#[derive(ClapArgs, Debug)]
pub struct ListArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}
