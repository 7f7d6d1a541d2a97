//! Integration tests for the job lifecycle: transfer, verification, retries,
//! and terminal writes.

mod support;

use std::sync::Arc;
use std::time::Duration;

use dlkeeper::controller::{ControllerError, JobOutcome};
use dlkeeper::jobs::{JobRepository, JobState};
use dlkeeper::service::{JobLookup, JobService, ServiceError};
use dlkeeper::supervisor::JobRunner;
use support::fakes::{FixedProber, Harness, InstrumentedStore, PAYLOAD_NAME, Step, md5_hex};
use tokio_util::sync::CancellationToken;

const URL: &str = "https://media.example.com/clip.mp4";
const BODY: &[u8] = b"verified clip bytes";

fn service_for(harness: &Harness) -> JobService {
    let store: Arc<dyn JobRepository> = Arc::new(harness.store.clone());
    JobService::new(
        Arc::clone(&store),
        JobRunner::new(harness.controller_with_store(store)),
    )
}

#[tokio::test]
async fn test_submit_happy_path_succeeds_with_metadata() {
    let harness = Harness::new([Step::Body(BODY.to_vec())]).await;
    let service = service_for(&harness);

    let handle = service.submit_tracked(URL, &md5_hex(BODY)).await.unwrap();
    let id = handle.job_id();
    assert_eq!(handle.join().await.unwrap(), JobOutcome::Succeeded);

    let job = service.status(JobLookup::Id(id)).await.unwrap();
    assert_eq!(job.state(), JobState::Succeeded);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.progress, 100);
    assert_eq!(job.resolution.as_deref(), Some("1920x1080"));
    assert_eq!(job.bitrate.as_deref(), Some("4500000"));
    assert!(job.error_text().is_none());
    assert!(job.completed_at.is_some());
    assert!(harness.job_dir(id).join(PAYLOAD_NAME).exists());
    assert_eq!(harness.prober.calls(), 1);
}

#[tokio::test]
async fn test_transient_failure_then_success_counts_one_attempt() {
    let harness = Harness::new([Step::Fail(503), Step::Body(BODY.to_vec())]).await;
    let id = harness.store.insert(URL, &md5_hex(BODY)).await.unwrap();

    let outcome = harness.controller().run_job(id).await.unwrap();
    assert_eq!(outcome, JobOutcome::Succeeded);

    let job = harness.store.get(id).await.unwrap();
    assert_eq!(job.attempts, 1);
    assert!(job.succeeded);
    assert!(job.error_text().is_none(), "success clears the last error");
    assert_eq!(harness.transfer.starts(), 2);
}

#[tokio::test]
async fn test_repeated_failures_stop_at_ceiling() {
    let harness = Harness::new([Step::Fail(500), Step::Fail(500), Step::Fail(500), Step::Fail(500)]).await;
    let id = harness.store.insert(URL, &md5_hex(BODY)).await.unwrap();

    let outcome = harness.controller().run_job(id).await.unwrap();
    assert_eq!(outcome, JobOutcome::Failed);

    let job = harness.store.get(id).await.unwrap();
    assert_eq!(job.state(), JobState::Failed);
    assert_eq!(job.attempts, 3);
    assert_eq!(job.progress, 0);
    assert!(job.error_text().unwrap().contains("HTTP 500"));
    assert_eq!(harness.transfer.starts(), 3, "no attempt beyond the ceiling");
}

#[tokio::test]
async fn test_configured_ceiling_of_one() {
    let harness = Harness::new([Step::Fail(502), Step::Body(BODY.to_vec())]).await;
    let id = harness.store.insert(URL, &md5_hex(BODY)).await.unwrap();
    let mut settings = harness.settings();
    settings.max_attempts = 1;
    let controller = dlkeeper::JobController::new(
        Arc::new(harness.store.clone()),
        Arc::clone(&harness.transfer) as Arc<dyn dlkeeper::Transfer>,
        Arc::new(dlkeeper::NoopProber),
        settings,
    );

    assert_eq!(controller.run_job(id).await.unwrap(), JobOutcome::Failed);
    assert_eq!(harness.store.get(id).await.unwrap().attempts, 1);
    assert_eq!(harness.transfer.starts(), 1);
}

#[tokio::test]
async fn test_digest_mismatch_deletes_file_before_retry() {
    let harness = Harness::new([Step::Body(b"corrupted".to_vec()), Step::Body(BODY.to_vec())]).await;
    let id = harness.store.insert(URL, &md5_hex(BODY)).await.unwrap();

    let outcome = harness.controller().run_job(id).await.unwrap();
    assert_eq!(outcome, JobOutcome::Succeeded);

    assert_eq!(
        harness.transfer.files_at_start(),
        vec![0, 0],
        "mismatched artifact must be gone before the next attempt starts"
    );
    let job = harness.store.get(id).await.unwrap();
    assert_eq!(job.attempts, 1);
    let on_disk = std::fs::read(harness.job_dir(id).join(PAYLOAD_NAME)).unwrap();
    assert_eq!(on_disk, BODY);
}

#[tokio::test]
async fn test_two_mismatches_then_match_succeeds_on_third_attempt() {
    let wrong = b"truncated clip".to_vec();
    let harness = Harness::new([
        Step::Body(wrong.clone()),
        Step::Body(wrong),
        Step::Body(BODY.to_vec()),
    ])
    .await;
    let id = harness.store.insert(URL, &md5_hex(BODY)).await.unwrap();

    let outcome = harness.controller().run_job(id).await.unwrap();
    assert_eq!(outcome, JobOutcome::Succeeded);

    let job = harness.store.get(id).await.unwrap();
    assert_eq!(job.state(), JobState::Succeeded);
    assert_eq!(job.attempts, 2);
    assert!(job.error_text().is_none());
    assert_eq!(
        harness.transfer.files_at_start(),
        vec![0, 0, 0],
        "every attempt starts from an empty job directory"
    );
    assert_eq!(harness.transfer.starts(), 3);
    assert_eq!(harness.prober.calls(), 1);
}

#[tokio::test]
async fn test_persistent_mismatch_fails_with_digest_text() {
    let wrong = b"wrong bytes".to_vec();
    let harness = Harness::new([
        Step::Body(wrong.clone()),
        Step::Body(wrong.clone()),
        Step::Body(wrong.clone()),
    ])
    .await;
    let expected = md5_hex(BODY);
    let id = harness.store.insert(URL, &expected).await.unwrap();

    let outcome = harness.controller().run_job(id).await.unwrap();
    assert_eq!(outcome, JobOutcome::Failed);

    let job = harness.store.get(id).await.unwrap();
    assert_eq!(job.attempts, 3);
    assert_eq!(
        job.error_text().unwrap(),
        format!("digest mismatch: expected {expected}, computed {}", md5_hex(&wrong))
    );
    assert!(!harness.job_dir(id).join(PAYLOAD_NAME).exists());
    assert_eq!(harness.prober.calls(), 0);
}

#[tokio::test]
async fn test_sha256_digest_is_verified() {
    let harness = Harness::new([Step::Body(BODY.to_vec())]).await;
    let sha = dlkeeper::checksum::digest_bytes(BODY, dlkeeper::DigestAlgorithm::Sha256);
    let id = harness.store.insert(URL, &sha).await.unwrap();

    assert_eq!(harness.controller().run_job(id).await.unwrap(), JobOutcome::Succeeded);
}

#[tokio::test]
async fn test_probe_failure_is_not_fatal() {
    let mut harness = Harness::new([Step::Body(BODY.to_vec())]).await;
    harness.prober = FixedProber::failing();
    let id = harness.store.insert(URL, &md5_hex(BODY)).await.unwrap();

    let outcome = harness.controller().run_job(id).await.unwrap();
    assert_eq!(outcome, JobOutcome::Succeeded);

    let job = harness.store.get(id).await.unwrap();
    assert!(job.succeeded);
    assert_eq!(job.bitrate, None);
    assert_eq!(job.resolution, None);
    assert_eq!(harness.prober.calls(), 1);
}

#[tokio::test]
async fn test_progress_ticks_are_persisted_then_forced_to_100() {
    let harness = Harness::new([Step::SlowBody {
        body: vec![7u8; 100],
        hold: Duration::from_millis(200),
    }])
    .await;
    let id = harness.store.insert(URL, &md5_hex(&[7u8; 100])).await.unwrap();
    let store = Arc::new(InstrumentedStore::new(harness.store.clone()));

    let controller = harness.controller_with_store(Arc::clone(&store) as Arc<dyn JobRepository>);
    assert_eq!(controller.run_job(id).await.unwrap(), JobOutcome::Succeeded);

    let writes = store.progress_writes();
    assert!(writes.contains(&50), "expected a mid-transfer tick, got {writes:?}");
    assert_eq!(writes.last(), Some(&100));
}

#[tokio::test]
async fn test_progress_write_failures_do_not_stop_the_job() {
    let harness = Harness::new([Step::SlowBody {
        body: BODY.to_vec(),
        hold: Duration::from_millis(50),
    }])
    .await;
    let id = harness.store.insert(URL, &md5_hex(BODY)).await.unwrap();
    let mut store = InstrumentedStore::new(harness.store.clone());
    store.fail_progress = true;
    let store = Arc::new(store);

    let controller = harness.controller_with_store(Arc::clone(&store) as Arc<dyn JobRepository>);
    assert_eq!(controller.run_job(id).await.unwrap(), JobOutcome::Succeeded);
    assert!(!store.progress_writes().is_empty());
}

#[tokio::test]
async fn test_failed_attempt_write_is_fatal_and_leaves_job_active() {
    let harness = Harness::new([Step::Fail(500), Step::Body(BODY.to_vec())]).await;
    let id = harness.store.insert(URL, &md5_hex(BODY)).await.unwrap();
    let mut store = InstrumentedStore::new(harness.store.clone());
    store.fail_attempt_failure = true;

    let controller = harness.controller_with_store(Arc::new(store));
    let err = controller.run_job(id).await.unwrap_err();
    assert!(matches!(err, ControllerError::Store(_)));

    let job = harness.store.get(id).await.unwrap();
    assert!(job.is_active());
    assert_eq!(job.attempts, 0);
    assert_eq!(harness.transfer.starts(), 1);
}

#[tokio::test]
async fn test_cancellation_leaves_job_active() {
    let harness = Harness::new([Step::Hang]).await;
    let id = harness.store.insert(URL, &md5_hex(BODY)).await.unwrap();
    let token = CancellationToken::new();
    let controller = harness.controller().with_cancellation(token.clone());

    let worker = tokio::spawn(async move { controller.run_job(id).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    let err = worker.await.unwrap().unwrap_err();
    assert!(matches!(err, ControllerError::Cancelled(job) if job == id));

    let job = harness.store.get(id).await.unwrap();
    assert!(job.is_active());
    assert_eq!(job.attempts, 0);
}

#[tokio::test]
async fn test_terminal_job_gets_exactly_one_terminal_write() {
    let harness = Harness::new([Step::Body(BODY.to_vec()), Step::Body(BODY.to_vec())]).await;
    let id = harness.store.insert(URL, &md5_hex(BODY)).await.unwrap();
    let controller = harness.controller();

    controller.run_job(id).await.unwrap();
    let before = harness.store.get(id).await.unwrap();

    let err = controller.run_job(id).await.unwrap_err();
    assert!(matches!(err, ControllerError::AlreadyTerminal(_)));
    assert!(harness.store.mark_terminal_failure(id).await.is_err());
    assert_eq!(harness.store.get(id).await.unwrap(), before);
    assert_eq!(harness.transfer.starts(), 1);
}

#[tokio::test]
async fn test_duplicate_submission_is_rejected_while_live() {
    let harness = Harness::new([Step::Hang]).await;
    let service = service_for(&harness);
    let digest = md5_hex(BODY);

    let first = service.submit(URL, &digest).await.unwrap();
    let err = service.submit(URL, &digest).await.unwrap_err();

    assert!(matches!(err, ServiceError::Duplicate { existing_id } if existing_id == first));
    assert_eq!(service.list_status().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_pair_can_be_resubmitted() {
    let harness = Harness::new([
        Step::Fail(404),
        Step::Fail(404),
        Step::Fail(404),
        Step::Body(BODY.to_vec()),
    ])
    .await;
    let service = service_for(&harness);
    let digest = md5_hex(BODY);

    let first = service.submit_tracked(URL, &digest).await.unwrap();
    let first_id = first.job_id();
    assert_eq!(first.join().await.unwrap(), JobOutcome::Failed);

    let second = service.submit_tracked(URL, &digest).await.unwrap();
    let second_id = second.job_id();
    assert_ne!(second_id, first_id);
    assert_eq!(second.join().await.unwrap(), JobOutcome::Succeeded);

    let newest = service
        .status(JobLookup::UrlOrDigest(URL.to_string()))
        .await
        .unwrap();
    assert_eq!(newest.id, second_id, "lookup returns the newest job for the URL");
}
