//! Status and list command handlers.

use std::fmt::Write as _;

use anyhow::Result;
use dlkeeper::{Job, JobLookup, JobState, ServiceError};
use serde::Serialize;

use crate::ProcessExit;
use crate::app::AppContext;
use crate::cli::{ListArgs, StatusArgs};

const URL_COLUMN_WIDTH: usize = 60;

#[derive(Serialize)]
struct JobView<'a> {
    #[serde(flatten)]
    job: &'a Job,
    state: JobState,
}

impl<'a> From<&'a Job> for JobView<'a> {
    fn from(job: &'a Job) -> Self {
        Self {
            job,
            state: job.state(),
        }
    }
}

pub(crate) async fn run_status_command(ctx: &AppContext, args: &StatusArgs) -> Result<ProcessExit> {
    let job = match ctx.service.status(JobLookup::parse(&args.job)).await {
        Ok(job) => job,
        Err(ServiceError::NotFound(lookup)) => {
            eprintln!("no job matches {lookup}");
            return Ok(ProcessExit::Failure);
        }
        Err(e) => return Err(e.into()),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&JobView::from(&job))?);
    } else {
        print!("{}", render_job(&job, ctx.settings.max_attempts));
    }
    Ok(ProcessExit::Success)
}

pub(crate) async fn run_list_command(ctx: &AppContext, args: &ListArgs) -> Result<ProcessExit> {
    let jobs = ctx.service.list_status().await?;

    if args.json {
        let views: Vec<JobView<'_>> = jobs.iter().map(JobView::from).collect();
        println!("{}", serde_json::to_string_pretty(&views)?);
    } else if jobs.is_empty() {
        println!("No jobs.");
    } else {
        print!("{}", render_table(&jobs));
    }
    Ok(ProcessExit::Success)
}

fn render_job(job: &Job, max_attempts: i64) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "id:        {}", job.id);
    let _ = writeln!(out, "url:       {}", job.url);
    let _ = writeln!(out, "digest:    {}", job.expected_digest);
    let _ = writeln!(out, "state:     {}", job.state());
    if let Some(progress) = job.live_progress() {
        let _ = writeln!(out, "progress:  {progress}%");
    }
    let _ = writeln!(out, "attempts:  {}/{max_attempts}", job.attempts);
    if let Some(resolution) = job.resolution.as_deref() {
        let _ = writeln!(out, "resolution: {resolution}");
    }
    if let Some(bitrate) = job.bitrate.as_deref() {
        let _ = writeln!(out, "bitrate:   {bitrate}");
    }
    let _ = writeln!(out, "created:   {}", job.created_at);
    if let Some(completed_at) = job.completed_at.as_deref() {
        let _ = writeln!(out, "completed: {completed_at}");
    }
    if let Some(error) = job.error_text() {
        let _ = writeln!(out, "error:     {error}");
    }
    out
}

fn render_table(jobs: &[Job]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:>6}  {:<9}  {:>4}  {:>5}  URL", "ID", "STATE", "PROG", "TRIES");
    for job in jobs {
        let progress = job
            .live_progress()
            .map_or_else(|| "-".to_string(), |p| format!("{p}%"));
        let _ = writeln!(
            out,
            "{:>6}  {:<9}  {:>4}  {:>5}  {}",
            job.id,
            job.state().as_str(),
            progress,
            job.attempts,
            truncate(&job.url, URL_COLUMN_WIDTH)
        );
    }
    out
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let kept: String = value.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}
