// crates/core/src/store.rs
//! JobStore trait: durable, TTL-bounded persistence of job records and the
//! per-user active-job pointer.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{JobFailure, JobId, JobRecord, NewJob, ProgressDelta, UserId};

/// How long a record stays readable after its last write, per status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTtls {
    /// Pending and running jobs. Refreshed on every progress update.
    pub active: Duration,
    pub completed: Duration,
    pub failed: Duration,
    pub cancelled: Duration,
}

impl Default for JobTtls {
    fn default() -> Self {
        Self {
            active: Duration::from_secs(24 * 60 * 60),
            completed: Duration::from_secs(60 * 60),
            failed: Duration::from_secs(24 * 60 * 60),
            cancelled: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Result of `create_job`.
#[derive(Debug, Clone)]
pub struct CreatedJob {
    pub record: JobRecord,
    /// The job the user's active pointer referenced before it was swapped to
    /// the new one, if any.
    pub superseded: Option<JobId>,
}

/// Persistence for job records.
///
/// Every method must be safe to call concurrently for the same job from the
/// processing task, a cancel request and a status read. Writes that target a
/// terminal record never change its status.
///
/// Implementations:
/// - `jobstream_db::Database` (SQLite)
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Allocate a fresh job in `pending` and point the user's active-job entry
    /// at it.
    async fn create_job(&self, job: NewJob) -> Result<CreatedJob, StoreError>;

    /// Fails with `NotFound` if the job is absent or expired.
    async fn get_job(&self, job_id: &JobId) -> Result<JobRecord, StoreError>;

    /// Merge `delta` into a non-terminal record, moving `pending` to `running`.
    /// On a terminal record this is a no-op returning the current state.
    async fn update_progress(
        &self,
        job_id: &JobId,
        delta: &ProgressDelta,
    ) -> Result<JobRecord, StoreError>;

    /// Move to `completed` with `result_refs`. No-op on a terminal record.
    async fn set_result(&self, job_id: &JobId, result_refs: &[String])
        -> Result<JobRecord, StoreError>;

    /// Move to `failed`. First write wins.
    async fn fail(&self, job_id: &JobId, failure: &JobFailure) -> Result<JobRecord, StoreError>;

    /// Raise the cancellation flag. A `pending` job becomes `cancelled`
    /// immediately; a `running` one keeps its status until the processing
    /// side calls [`mark_cancelled`](Self::mark_cancelled).
    async fn request_cancel(&self, job_id: &JobId) -> Result<JobRecord, StoreError>;

    /// Move a non-terminal job to `cancelled`.
    async fn mark_cancelled(&self, job_id: &JobId) -> Result<JobRecord, StoreError>;

    async fn is_cancelled(&self, job_id: &JobId) -> Result<bool, StoreError>;

    async fn get_active_job(&self, user_id: &UserId) -> Result<Option<JobId>, StoreError>;

    async fn clear_active_job(&self, user_id: &UserId) -> Result<(), StoreError>;

    /// Delete records whose TTL has passed. Returns the number removed.
    async fn purge_expired(&self) -> Result<u64, StoreError>;

    /// Fail every non-terminal job left behind by a previous process.
    async fn fail_interrupted(&self) -> Result<u64, StoreError>;
}
