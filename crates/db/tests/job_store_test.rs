//! Integration tests for the SQLite `JobStore`.

use std::sync::Arc;
use std::time::Duration;

use jobstream_core::{
    ErrorKind, JobFailure, JobId, JobStatus, JobStore, JobTtls, NewJob, ProgressDelta, StoreError,
};
use jobstream_db::Database;
use pretty_assertions::assert_eq;

fn new_job(user: &str) -> NewJob {
    NewJob {
        user_id: user.to_string(),
        resource_id: "doc-1".to_string(),
        capability: "extraction".to_string(),
    }
}

fn progress(phase: &str, value: u8) -> ProgressDelta {
    ProgressDelta {
        phase: Some(phase.to_string()),
        progress: Some(value),
        ..ProgressDelta::default()
    }
}

fn failure(message: &str) -> JobFailure {
    JobFailure {
        kind: ErrorKind::UpstreamUnavailable,
        message: message.to_string(),
        recoverable: true,
    }
}

#[tokio::test]
async fn test_create_job_sets_active_pointer() {
    let db = Database::new_in_memory().await.unwrap();

    let created = db.create_job(new_job("u-1")).await.unwrap();
    assert_eq!(created.record.status, JobStatus::Pending);
    assert_eq!(created.record.progress, 0);
    assert_eq!(created.superseded, None);

    let active = db.get_active_job(&"u-1".to_string()).await.unwrap();
    assert_eq!(active, Some(created.record.job_id.clone()));

    let fetched = db.get_job(&created.record.job_id).await.unwrap();
    assert_eq!(fetched.user_id, "u-1");
    assert_eq!(fetched.capability, "extraction");
}

#[tokio::test]
async fn test_second_create_reports_superseded_job() {
    let db = Database::new_in_memory().await.unwrap();

    let a = db.create_job(new_job("u-1")).await.unwrap();
    let b = db.create_job(new_job("u-1")).await.unwrap();
    assert_eq!(b.superseded, Some(a.record.job_id.clone()));

    let active = db.get_active_job(&"u-1".to_string()).await.unwrap();
    assert_eq!(active, Some(b.record.job_id));

    // Other users are unaffected.
    let c = db.create_job(new_job("u-2")).await.unwrap();
    assert_eq!(c.superseded, None);
}

#[tokio::test]
async fn test_update_progress_moves_to_running_and_never_lowers() {
    let db = Database::new_in_memory().await.unwrap();
    let job = db.create_job(new_job("u-1")).await.unwrap().record;

    let r = db.update_progress(&job.job_id, &progress("extraction", 45)).await.unwrap();
    assert_eq!(r.status, JobStatus::Running);
    assert_eq!(r.progress, 45);

    // A stale write with a lower value keeps the higher one.
    let r = db.update_progress(&job.job_id, &progress("download", 7)).await.unwrap();
    assert_eq!(r.progress, 45);
    assert_eq!(r.phase, "download");

    let r = db
        .update_progress(
            &job.job_id,
            &ProgressDelta {
                total_units: Some(4),
                completed_units: Some(3),
                message: Some("Extracted pages 9-12".into()),
                ..ProgressDelta::default()
            },
        )
        .await
        .unwrap();
    assert_eq!((r.completed_units, r.total_units), (3, 4));
    assert_eq!(r.message, "Extracted pages 9-12");
    assert_eq!(r.progress, 45);
}

#[tokio::test]
async fn test_set_result_completes_and_clears_pointer() {
    let db = Database::new_in_memory().await.unwrap();
    let job = db.create_job(new_job("u-1")).await.unwrap().record;
    db.update_progress(&job.job_id, &progress("save", 95)).await.unwrap();

    let refs = vec!["results/doc-1.json".to_string()];
    let r = db.set_result(&job.job_id, &refs).await.unwrap();
    assert_eq!(r.status, JobStatus::Completed);
    assert_eq!(r.progress, 100);
    assert_eq!(r.result_refs, Some(refs));
    assert_eq!(db.get_active_job(&"u-1".to_string()).await.unwrap(), None);

    // Terminal records ignore further progress.
    let r = db.update_progress(&job.job_id, &progress("save", 50)).await.unwrap();
    assert_eq!(r.status, JobStatus::Completed);
    assert_eq!(r.progress, 100);
}

#[tokio::test]
async fn test_fail_first_write_wins() {
    let db = Database::new_in_memory().await.unwrap();
    let job = db.create_job(new_job("u-1")).await.unwrap().record;

    let r = db.fail(&job.job_id, &failure("status 503")).await.unwrap();
    assert_eq!(r.status, JobStatus::Failed);

    let r = db.fail(&job.job_id, &failure("second error")).await.unwrap();
    let error = r.error.expect("error recorded");
    assert_eq!(error.message, "status 503");
    assert_eq!(error.kind, ErrorKind::UpstreamUnavailable);
    assert!(error.recoverable);

    // A late success does not overwrite the failure either.
    let r = db.set_result(&job.job_id, &["x".to_string()]).await.unwrap();
    assert_eq!(r.status, JobStatus::Failed);
    assert_eq!(r.result_refs, None);
}

#[tokio::test]
async fn test_cancel_pending_job_is_immediate() {
    let db = Database::new_in_memory().await.unwrap();
    let job = db.create_job(new_job("u-1")).await.unwrap().record;

    let r = db.request_cancel(&job.job_id).await.unwrap();
    assert_eq!(r.status, JobStatus::Cancelled);
    assert!(r.cancel_requested);
    assert!(db.is_cancelled(&job.job_id).await.unwrap());
    assert_eq!(db.get_active_job(&"u-1".to_string()).await.unwrap(), None);
}

#[tokio::test]
async fn test_cancel_running_job_sets_flag_only() {
    let db = Database::new_in_memory().await.unwrap();
    let job = db.create_job(new_job("u-1")).await.unwrap().record;
    db.update_progress(&job.job_id, &progress("extraction", 30)).await.unwrap();

    let r = db.request_cancel(&job.job_id).await.unwrap();
    assert_eq!(r.status, JobStatus::Running);
    assert!(r.cancel_requested);
    assert!(db.is_cancelled(&job.job_id).await.unwrap());

    // Progress writes stop landing once the flag is up.
    let r = db.update_progress(&job.job_id, &progress("extraction", 60)).await.unwrap();
    assert_eq!(r.progress, 30);
    assert!(r.cancel_requested);

    let r = db.mark_cancelled(&job.job_id).await.unwrap();
    assert_eq!(r.status, JobStatus::Cancelled);
    assert_eq!(db.get_active_job(&"u-1".to_string()).await.unwrap(), None);
}

#[tokio::test]
async fn test_cancel_completed_job_is_noop() {
    let db = Database::new_in_memory().await.unwrap();
    let job = db.create_job(new_job("u-1")).await.unwrap().record;
    db.set_result(&job.job_id, &["r".to_string()]).await.unwrap();

    let r = db.request_cancel(&job.job_id).await.unwrap();
    assert_eq!(r.status, JobStatus::Completed);
    assert!(!r.cancel_requested);
    assert!(!db.is_cancelled(&job.job_id).await.unwrap());
}

#[tokio::test]
async fn test_terminal_write_keeps_newer_pointer() {
    let db = Database::new_in_memory().await.unwrap();
    let a = db.create_job(new_job("u-1")).await.unwrap().record;
    let b = db.create_job(new_job("u-1")).await.unwrap().record;

    // The superseded job finishing must not clear the pointer to its successor.
    db.mark_cancelled(&a.job_id).await.unwrap();
    assert_eq!(
        db.get_active_job(&"u-1".to_string()).await.unwrap(),
        Some(b.job_id)
    );
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let db = Database::new_in_memory().await.unwrap();
    let missing = JobId::from("j-missing");

    assert!(matches!(db.get_job(&missing).await, Err(StoreError::NotFound(_))));
    assert!(matches!(
        db.update_progress(&missing, &progress("x", 1)).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(db.request_cancel(&missing).await, Err(StoreError::NotFound(_))));
    assert!(matches!(db.is_cancelled(&missing).await, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn test_expired_records_read_as_missing_and_are_purged() {
    let ttls = JobTtls {
        completed: Duration::from_millis(1),
        ..JobTtls::default()
    };
    let db = Database::new_in_memory().await.unwrap().with_ttls(ttls);
    let done = db.create_job(new_job("u-1")).await.unwrap().record;
    let live = db.create_job(new_job("u-2")).await.unwrap().record;
    db.set_result(&done.job_id, &["r".to_string()]).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(matches!(db.get_job(&done.job_id).await, Err(StoreError::NotFound(_))));
    assert_eq!(db.purge_expired().await.unwrap(), 1);
    assert!(db.get_job(&live.job_id).await.is_ok());
}

#[tokio::test]
async fn test_fail_interrupted_sweeps_unfinished_jobs() {
    let db = Database::new_in_memory().await.unwrap();
    let pending = db.create_job(new_job("u-1")).await.unwrap().record;
    let running = db.create_job(new_job("u-2")).await.unwrap().record;
    db.update_progress(&running.job_id, &progress("extraction", 20)).await.unwrap();
    let done = db.create_job(new_job("u-3")).await.unwrap().record;
    db.set_result(&done.job_id, &["r".to_string()]).await.unwrap();

    assert_eq!(db.fail_interrupted().await.unwrap(), 2);

    for id in [&pending.job_id, &running.job_id] {
        let r = db.get_job(id).await.unwrap();
        assert_eq!(r.status, JobStatus::Failed);
        let error = r.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Internal);
        assert_eq!(error.message, "interrupted by server restart");
    }
    assert_eq!(db.get_job(&done.job_id).await.unwrap().status, JobStatus::Completed);
    assert_eq!(db.get_active_job(&"u-1".to_string()).await.unwrap(), None);
    assert_eq!(db.get_active_job(&"u-2".to_string()).await.unwrap(), None);
}

#[tokio::test]
async fn test_concurrent_progress_and_cancel() {
    let db = Arc::new(Database::new_in_memory().await.unwrap());
    let job = db.create_job(new_job("u-1")).await.unwrap().record;
    db.update_progress(&job.job_id, &progress("extraction", 10)).await.unwrap();

    let writer = {
        let db = db.clone();
        let id = job.job_id.clone();
        tokio::spawn(async move {
            for p in 11..=60u8 {
                let r = db.update_progress(&id, &progress("extraction", p)).await.unwrap();
                if r.cancel_requested {
                    db.mark_cancelled(&id).await.unwrap();
                    return;
                }
            }
        })
    };
    db.request_cancel(&job.job_id).await.unwrap();
    writer.await.unwrap();

    let r = db.get_job(&job.job_id).await.unwrap();
    assert!(r.cancel_requested);
    assert!(matches!(r.status, JobStatus::Running | JobStatus::Cancelled));
}

#[tokio::test]
async fn test_clear_active_job_leaves_record() {
    let db = Database::new_in_memory().await.unwrap();
    let job = db.create_job(new_job("u-1")).await.unwrap().record;

    db.clear_active_job(&"u-1".to_string()).await.unwrap();
    assert_eq!(db.get_active_job(&"u-1".to_string()).await.unwrap(), None);
    assert_eq!(db.get_job(&job.job_id).await.unwrap().status, JobStatus::Pending);

    // Clearing a user with no pointer is fine.
    db.clear_active_job(&"u-9".to_string()).await.unwrap();

    // The next job for the user supersedes nothing.
    let next = db.create_job(new_job("u-1")).await.unwrap();
    assert_eq!(next.superseded, None);
}
