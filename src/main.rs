//! CLI entry point for dlkeeper.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use dlkeeper::config::{self, Overrides};
use dlkeeper::Settings;
use tracing::debug;

mod app;
mod cli;
mod commands;

use app::AppContext;
use cli::{Args, Command};

/// How the process should exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    Success,
    Failure,
    Interrupted,
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::Failure => ExitCode::from(1),
            ProcessExit::Interrupted => ExitCode::from(130),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    match run(args).await {
        Ok(exit) => exit.into(),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> Result<ProcessExit> {
    let loaded = config::load_config(args.config.as_deref())?;
    let overrides = Overrides {
        database_path: args.database.clone(),
        work_dir: args.work_dir.clone(),
        log_file: args.log_file.clone(),
    };
    let settings = Settings::resolve(loaded.config.as_ref(), &overrides);

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config > info
    let level = app::logging::default_level(args.quiet, args.verbose, settings.log_level);
    app::logging::init_tracing(level, settings.log_file.as_deref())?;

    debug!(?args, config_path = ?loaded.path, "CLI arguments parsed");

    let ctx = AppContext::build(settings).await?;
    match &args.command {
        Command::Submit(submit) => commands::run_submit_command(&ctx, submit, args.quiet).await,
        Command::Status(status) => commands::run_status_command(&ctx, status).await,
        Command::List(list) => commands::run_list_command(&ctx, list).await,
        Command::Run => commands::run_recovery_command(&ctx).await,
    }
}
