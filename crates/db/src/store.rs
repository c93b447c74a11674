// crates/db/src/store.rs
// `JobStore` implementation over the SQLite queries.

use async_trait::async_trait;
use jobstream_core::{
    CreatedJob, JobFailure, JobId, JobRecord, JobStore, NewJob, ProgressDelta, StoreError, UserId,
};

use crate::queries::jobs::Transition;
use crate::{Database, DbError, DbResult};

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Corrupt { job_id, message } => StoreError::Corrupt { job_id, message },
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

fn found(job_id: &JobId, result: DbResult<Option<Transition>>) -> Result<Transition, StoreError> {
    result?.ok_or_else(|| StoreError::NotFound(job_id.clone()))
}

#[async_trait]
impl JobStore for Database {
    async fn create_job(&self, job: NewJob) -> Result<CreatedJob, StoreError> {
        let (record, superseded) = self.insert_job(&job).await?;
        tracing::debug!(
            job_id = %record.job_id,
            user_id = %record.user_id,
            capability = %record.capability,
            "job created"
        );
        Ok(CreatedJob { record, superseded })
    }

    async fn get_job(&self, job_id: &JobId) -> Result<JobRecord, StoreError> {
        self.find_job(job_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))
    }

    async fn update_progress(
        &self,
        job_id: &JobId,
        delta: &ProgressDelta,
    ) -> Result<JobRecord, StoreError> {
        Ok(found(job_id, self.apply_progress(job_id, delta).await)?.record)
    }

    async fn set_result(
        &self,
        job_id: &JobId,
        result_refs: &[String],
    ) -> Result<JobRecord, StoreError> {
        let t = found(job_id, self.complete_job(job_id, result_refs).await)?;
        if !t.applied {
            tracing::debug!(%job_id, status = %t.record.status, "set_result on finished job ignored");
        }
        Ok(t.record)
    }

    async fn fail(&self, job_id: &JobId, failure: &JobFailure) -> Result<JobRecord, StoreError> {
        let t = found(job_id, self.fail_job(job_id, failure).await)?;
        if !t.applied {
            tracing::debug!(%job_id, status = %t.record.status, "fail on finished job ignored");
        }
        Ok(t.record)
    }

    async fn request_cancel(&self, job_id: &JobId) -> Result<JobRecord, StoreError> {
        Ok(found(job_id, self.flag_cancel(job_id).await)?.record)
    }

    async fn mark_cancelled(&self, job_id: &JobId) -> Result<JobRecord, StoreError> {
        Ok(found(job_id, self.cancel_job(job_id).await)?.record)
    }

    async fn is_cancelled(&self, job_id: &JobId) -> Result<bool, StoreError> {
        let record = self.get_job(job_id).await?;
        Ok(record.cancel_requested || record.status == jobstream_core::JobStatus::Cancelled)
    }

    async fn get_active_job(&self, user_id: &UserId) -> Result<Option<JobId>, StoreError> {
        Ok(self.active_job_for_user(user_id).await?)
    }

    async fn clear_active_job(&self, user_id: &UserId) -> Result<(), StoreError> {
        Ok(self.delete_active_job(user_id).await?)
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        Ok(self.purge_expired_jobs().await?)
    }

    async fn fail_interrupted(&self) -> Result<u64, StoreError> {
        Ok(self.fail_unfinished_jobs().await?)
    }
}
