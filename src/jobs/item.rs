//! Job row type and macro-state definitions.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Macro-state of a job, derived from `done_at` and `ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Not yet terminal; a worker owns or will own it.
    Active,
    /// Digest verified, terminal.
    Succeeded,
    /// Retry ceiling exhausted, terminal.
    Failed,
}

impl JobState {
    /// Returns the display label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Returns true for `Succeeded` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One tracked request to fetch and verify a single remote file.
///
/// Field names are the domain names; the `#[sqlx(rename)]` attributes map them
/// onto the legacy `files` columns.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Job {
    /// Unique identifier.
    pub id: i64,
    /// Source location.
    pub url: String,
    /// Normalized lowercase hex digest the finished file must match.
    #[sqlx(rename = "md5")]
    pub expected_digest: String,
    /// Number of failed attempts so far.
    #[sqlx(rename = "tries")]
    pub attempts: i64,
    /// Set once, after digest verification passes.
    #[sqlx(rename = "ok")]
    pub succeeded: bool,
    /// Advisory transfer progress, 0..=100.
    pub progress: i64,
    /// Media bitrate reported by the prober.
    pub bitrate: Option<String>,
    /// Media resolution (`WxH`) reported by the prober.
    pub resolution: Option<String>,
    /// Creation timestamp (UTC, SQLite text).
    pub created_at: String,
    /// Terminal timestamp; `None` while active.
    #[sqlx(rename = "done_at")]
    pub completed_at: Option<String>,
    /// Most recent attempt failure; empty after success.
    #[sqlx(rename = "error")]
    pub last_error: Option<String>,
}

impl Job {
    /// Returns the macro-state encoded by `completed_at` and `succeeded`.
    #[must_use]
    pub fn state(&self) -> JobState {
        match (&self.completed_at, self.succeeded) {
            (None, _) => JobState::Active,
            (Some(_), true) => JobState::Succeeded,
            (Some(_), false) => JobState::Failed,
        }
    }

    /// Returns true while no terminal write has happened.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.completed_at.is_none()
    }

    /// Progress for display; `None` once terminal, where the value is stale.
    #[must_use]
    pub fn live_progress(&self) -> Option<i64> {
        self.is_active().then_some(self.progress)
    }

    /// Last error, ignoring the empty string written on success.
    #[must_use]
    pub fn error_text(&self) -> Option<&str> {
        self.last_error.as_deref().filter(|text| !text.is_empty())
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Job {{ id: {}, url: {}, state: {}, attempts: {} }}",
            self.id,
            self.url,
            self.state(),
            self.attempts
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(completed_at: Option<&str>, succeeded: bool) -> Job {
        Job {
            id: 7,
            url: "https://example.com/video.mp4".to_string(),
            expected_digest: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            attempts: 1,
            succeeded,
            progress: 40,
            bitrate: None,
            resolution: None,
            created_at: "2026-01-01 00:00:00.000".to_string(),
            completed_at: completed_at.map(str::to_string),
            last_error: Some(String::new()),
        }
    }

    #[test]
    fn test_job_state_active_when_not_completed() {
        let job = job(None, false);
        assert_eq!(job.state(), JobState::Active);
        assert!(job.is_active());
        assert_eq!(job.live_progress(), Some(40));
    }

    #[test]
    fn test_job_state_succeeded_and_failed() {
        assert_eq!(
            job(Some("2026-01-01 00:01:00"), true).state(),
            JobState::Succeeded
        );
        let failed = job(Some("2026-01-01 00:01:00"), false);
        assert_eq!(failed.state(), JobState::Failed);
        assert!(failed.state().is_terminal());
        assert_eq!(failed.live_progress(), None);
    }

    #[test]
    fn test_job_error_text_ignores_empty_string() {
        let mut job = job(None, false);
        assert_eq!(job.error_text(), None);
        job.last_error = Some("timeout".to_string());
        assert_eq!(job.error_text(), Some("timeout"));
    }

    #[test]
    fn test_job_display_includes_state() {
        let text = job(None, false).to_string();
        assert!(text.contains("id: 7"));
        assert!(text.contains("active"));
    }

    #[test]
    fn test_job_state_serializes_snake_case() {
        let json = serde_json::to_string(&JobState::Succeeded).unwrap_or_default();
        assert_eq!(json, "\"succeeded\"");
    }
}
