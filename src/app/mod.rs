//! Runtime wiring for the binary: store, transfer, prober, and workers.

pub(crate) mod logging;
pub(crate) mod progress;

use std::sync::Arc;

use anyhow::{Context, Result};
use dlkeeper::{
    Database, FfprobeProber, HttpTransfer, JobController, JobRepository, JobRunner, JobService,
    JobStore, NoopProber, Prober, RecoverySupervisor, Settings,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Everything a command needs, built once per invocation.
pub(crate) struct AppContext {
    pub settings: Settings,
    pub store: Arc<JobStore>,
    pub service: JobService,
    pub supervisor: RecoverySupervisor,
    pub cancel: CancellationToken,
}

impl AppContext {
    /// Opens the database and assembles the worker pipeline.
    pub(crate) async fn build(settings: Settings) -> Result<Self> {
        if let Some(parent) = settings.database_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory '{}'", parent.display())
            })?;
        }

        let db = Database::new_with_options(&settings.database_path, &settings.database)
            .await
            .with_context(|| {
                format!(
                    "Failed to open database '{}'",
                    settings.database_path.display()
                )
            })?;
        let store = Arc::new(JobStore::new(db));
        let repository: Arc<dyn JobRepository> = Arc::clone(&store) as Arc<dyn JobRepository>;

        let transfer =
            HttpTransfer::new(settings.http.clone()).context("Failed to build HTTP client")?;
        let prober: Arc<dyn Prober> = if settings.probe {
            Arc::new(FfprobeProber::new(settings.ffprobe_path.clone()))
        } else {
            debug!("media probing disabled");
            Arc::new(NoopProber)
        };

        let cancel = CancellationToken::new();
        let controller = JobController::new(
            Arc::clone(&repository),
            Arc::new(transfer),
            prober,
            settings.controller_settings(),
        )
        .with_cancellation(cancel.clone());

        let runner = JobRunner::new(controller);
        let service = JobService::new(Arc::clone(&repository), runner.clone());
        let supervisor = RecoverySupervisor::new(repository, runner);

        Ok(Self {
            settings,
            store,
            service,
            supervisor,
            cancel,
        })
    }

    /// Cancels in-flight workers on Ctrl-C.
    pub(crate) fn cancel_on_ctrl_c(&self) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, stopping workers");
                cancel.cancel();
            }
        });
    }
}
