//! Repository seam for job persistence.
//!
//! The controller, supervisor and facade depend on this trait rather than on
//! [`JobStore`] directly, so tests can substitute a store that fails on demand.

use async_trait::async_trait;

use super::{Job, JobStore, Result};

/// Data-access contract for job state.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Inserts a new active job.
    async fn insert(&self, url: &str, digest: &str) -> Result<i64>;

    /// Loads a job by id.
    async fn get(&self, id: i64) -> Result<Job>;

    /// Newest job matching either the URL or the digest.
    async fn find_by_url_or_digest(&self, url: &str, digest: &str) -> Result<Option<Job>>;

    /// Active or succeeded job owning exactly this pair.
    async fn find_live(&self, url: &str, digest: &str) -> Result<Option<Job>>;

    /// All jobs in status-view order.
    async fn list_all(&self) -> Result<Vec<Job>>;

    /// Stores advisory progress.
    async fn update_progress(&self, id: i64, percent: i64) -> Result<()>;

    /// Records a failed attempt below the ceiling; returns the new attempt count.
    async fn record_attempt_failure(
        &self,
        id: i64,
        error: &str,
        max_attempts: i64,
    ) -> Result<i64>;

    /// Terminal failure write.
    async fn mark_terminal_failure(&self, id: i64) -> Result<()>;

    /// Terminal success write.
    async fn mark_success(
        &self,
        id: i64,
        bitrate: Option<&str>,
        resolution: Option<&str>,
    ) -> Result<()>;
}

#[async_trait]
impl JobRepository for JobStore {
    async fn insert(&self, url: &str, digest: &str) -> Result<i64> {
        JobStore::insert(self, url, digest).await
    }

    async fn get(&self, id: i64) -> Result<Job> {
        JobStore::get(self, id).await
    }

    async fn find_by_url_or_digest(&self, url: &str, digest: &str) -> Result<Option<Job>> {
        JobStore::find_by_url_or_digest(self, url, digest).await
    }

    async fn find_live(&self, url: &str, digest: &str) -> Result<Option<Job>> {
        JobStore::find_live(self, url, digest).await
    }

    async fn list_all(&self) -> Result<Vec<Job>> {
        JobStore::list_all(self).await
    }

    async fn update_progress(&self, id: i64, percent: i64) -> Result<()> {
        JobStore::update_progress(self, id, percent).await
    }

    async fn record_attempt_failure(&self, id: i64, error: &str, max_attempts: i64) -> Result<i64> {
        JobStore::record_attempt_failure(self, id, error, max_attempts).await
    }

    async fn mark_terminal_failure(&self, id: i64) -> Result<()> {
        JobStore::mark_terminal_failure(self, id).await
    }

    async fn mark_success(
        &self,
        id: i64,
        bitrate: Option<&str>,
        resolution: Option<&str>,
    ) -> Result<()> {
        JobStore::mark_success(self, id, bitrate, resolution).await
    }
}
