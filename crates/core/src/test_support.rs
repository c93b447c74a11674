// crates/core/src/test_support.rs
//! In-memory JobStore for unit tests. No TTLs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::error::StoreError;
use crate::store::{CreatedJob, JobStore};
use crate::types::{JobFailure, JobId, JobRecord, JobStatus, NewJob, ProgressDelta, UserId};

#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
    active: Mutex<HashMap<UserId, JobId>>,
}

impl MemoryStore {
    fn with_job<T>(
        &self,
        job_id: &JobId,
        f: impl FnOnce(&mut JobRecord) -> T,
    ) -> Result<(T, JobRecord), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))?;
        let out = f(record);
        record.updated_at = Utc::now();
        Ok((out, record.clone()))
    }

    fn finish(&self, record: &JobRecord) {
        let mut active = self.active.lock().unwrap();
        if active.get(&record.user_id) == Some(&record.job_id) {
            active.remove(&record.user_id);
        }
    }

    fn terminal_write(
        &self,
        job_id: &JobId,
        f: impl FnOnce(&mut JobRecord),
    ) -> Result<JobRecord, StoreError> {
        let (changed, record) = self.with_job(job_id, |r| {
            if r.is_terminal() {
                return false;
            }
            f(r);
            true
        })?;
        if changed {
            self.finish(&record);
        }
        Ok(record)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self, job: NewJob) -> Result<CreatedJob, StoreError> {
        let now = Utc::now();
        let record = JobRecord {
            job_id: JobId::generate(),
            user_id: job.user_id,
            resource_id: job.resource_id,
            capability: job.capability,
            status: JobStatus::Pending,
            phase: "initializing".into(),
            progress: 0,
            message: String::new(),
            total_units: 0,
            completed_units: 0,
            result_refs: None,
            error: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::hours(24),
        };
        self.jobs
            .lock()
            .unwrap()
            .insert(record.job_id.clone(), record.clone());
        let superseded = self
            .active
            .lock()
            .unwrap()
            .insert(record.user_id.clone(), record.job_id.clone());
        Ok(CreatedJob { record, superseded })
    }

    async fn get_job(&self, job_id: &JobId) -> Result<JobRecord, StoreError> {
        self.jobs
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))
    }

    async fn update_progress(
        &self,
        job_id: &JobId,
        delta: &ProgressDelta,
    ) -> Result<JobRecord, StoreError> {
        let ((), record) = self.with_job(job_id, |r| {
            if r.is_terminal() {
                return;
            }
            if r.status == JobStatus::Pending {
                r.status = JobStatus::Running;
            }
            if let Some(phase) = &delta.phase {
                r.phase = phase.clone();
            }
            if let Some(progress) = delta.progress {
                r.progress = r.progress.max(progress);
            }
            if let Some(message) = &delta.message {
                r.message = message.clone();
            }
            if let Some(total) = delta.total_units {
                r.total_units = total;
            }
            if let Some(done) = delta.completed_units {
                r.completed_units = done;
            }
        })?;
        Ok(record)
    }

    async fn set_result(
        &self,
        job_id: &JobId,
        result_refs: &[String],
    ) -> Result<JobRecord, StoreError> {
        self.terminal_write(job_id, |r| {
            r.status = JobStatus::Completed;
            r.progress = 100;
            r.result_refs = Some(result_refs.to_vec());
        })
    }

    async fn fail(&self, job_id: &JobId, failure: &JobFailure) -> Result<JobRecord, StoreError> {
        self.terminal_write(job_id, |r| {
            r.status = JobStatus::Failed;
            r.error = Some(failure.clone());
        })
    }

    async fn request_cancel(&self, job_id: &JobId) -> Result<JobRecord, StoreError> {
        let (now_cancelled, record) = self.with_job(job_id, |r| {
            if r.is_terminal() {
                return false;
            }
            r.cancel_requested = true;
            if r.status == JobStatus::Pending {
                r.status = JobStatus::Cancelled;
                return true;
            }
            false
        })?;
        if now_cancelled {
            self.finish(&record);
        }
        Ok(record)
    }

    async fn mark_cancelled(&self, job_id: &JobId) -> Result<JobRecord, StoreError> {
        self.terminal_write(job_id, |r| {
            r.status = JobStatus::Cancelled;
            r.cancel_requested = true;
        })
    }

    async fn is_cancelled(&self, job_id: &JobId) -> Result<bool, StoreError> {
        let record = self.get_job(job_id).await?;
        Ok(record.cancel_requested || record.status == JobStatus::Cancelled)
    }

    async fn get_active_job(&self, user_id: &UserId) -> Result<Option<JobId>, StoreError> {
        Ok(self.active.lock().unwrap().get(user_id).cloned())
    }

    async fn clear_active_job(&self, user_id: &UserId) -> Result<(), StoreError> {
        self.active.lock().unwrap().remove(user_id);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn fail_interrupted(&self) -> Result<u64, StoreError> {
        Ok(0)
    }
}
