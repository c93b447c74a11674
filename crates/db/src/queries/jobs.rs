// crates/db/src/queries/jobs.rs
// Job record reads and state transitions.
//
// Every transition is a single conditional UPDATE guarded on the current
// status, so concurrent writers (job task, cancel request, startup sweep)
// cannot move a record backwards or overwrite a terminal state.

use std::time::Duration;

use chrono::Utc;
use jobstream_core::{JobFailure, JobId, JobRecord, JobStatus, NewJob, ProgressDelta};

use super::row_types::{from_millis, JobRow, JOB_COLUMNS};
use crate::{Database, DbError, DbResult};

pub(crate) const INTERRUPTED_MESSAGE: &str = "interrupted by server restart";

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn ttl_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX / 2)
}

/// Terminal transition and the columns it sets besides status and expiry.
/// Extra binds start at `?4`.
enum Finish<'a> {
    Completed { refs: String },
    Failed(&'a JobFailure),
    Cancelled,
}

impl Finish<'_> {
    fn status(&self) -> JobStatus {
        match self {
            Self::Completed { .. } => JobStatus::Completed,
            Self::Failed(_) => JobStatus::Failed,
            Self::Cancelled => JobStatus::Cancelled,
        }
    }

    fn set_clause(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "progress = 100, result_refs = ?4",
            Self::Failed(_) => "error_kind = ?4, error_message = ?5, error_recoverable = ?6",
            Self::Cancelled => "cancel_requested = 1",
        }
    }
}

/// Outcome of a guarded transition.
#[derive(Debug)]
pub(crate) struct Transition {
    pub record: JobRecord,
    /// False when the guard did not match and `record` is the unchanged state.
    pub applied: bool,
}

impl Database {
    fn expiry(&self, now: i64, status: JobStatus) -> i64 {
        let ttls = self.ttls();
        let ttl = match status {
            JobStatus::Pending | JobStatus::Running => ttls.active,
            JobStatus::Completed => ttls.completed,
            JobStatus::Failed => ttls.failed,
            JobStatus::Cancelled => ttls.cancelled,
        };
        now.saturating_add(ttl_ms(ttl))
    }

    /// Insert a pending job and swap the user's active pointer to it.
    ///
    /// Returns the new record and the job id the pointer held before.
    pub(crate) async fn insert_job(&self, job: &NewJob) -> DbResult<(JobRecord, Option<JobId>)> {
        let now = now_ms();
        let expires_at = self.expiry(now, JobStatus::Pending);
        let job_id = JobId::generate();

        let mut tx = self.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO jobs (job_id, user_id, resource_id, capability, status, phase,
                              created_at, updated_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, 'pending', 'initializing', ?5, ?5, ?6)
            "#,
        )
        .bind(job_id.as_str())
        .bind(&job.user_id)
        .bind(&job.resource_id)
        .bind(&job.capability)
        .bind(now)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        let previous: Option<(String,)> = sqlx::query_as(
            "SELECT job_id FROM active_jobs WHERE user_id = ?1 AND expires_at > ?2",
        )
        .bind(&job.user_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO active_jobs (user_id, job_id, updated_at, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id) DO UPDATE SET
                job_id = excluded.job_id,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&job.user_id)
        .bind(job_id.as_str())
        .bind(now)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let record = JobRecord {
            job_id,
            user_id: job.user_id.clone(),
            resource_id: job.resource_id.clone(),
            capability: job.capability.clone(),
            status: JobStatus::Pending,
            phase: "initializing".to_string(),
            progress: 0,
            message: String::new(),
            total_units: 0,
            completed_units: 0,
            result_refs: None,
            error: None,
            cancel_requested: false,
            created_at: from_millis(now),
            updated_at: from_millis(now),
            expires_at: from_millis(expires_at),
        };
        Ok((record, previous.map(|(id,)| JobId::from(id))))
    }

    /// Fetch a live (unexpired) job.
    pub async fn find_job(&self, job_id: &JobId) -> DbResult<Option<JobRecord>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1 AND expires_at > ?2");
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(job_id.as_str())
            .bind(now_ms())
            .fetch_optional(self.pool())
            .await?;
        row.map(JobRow::into_record).transpose()
    }

    /// Merge a progress delta into a non-terminal, non-flagged job.
    ///
    /// `progress` only ever grows. The first update moves `pending` to
    /// `running`. Every update pushes the record's expiry forward.
    pub(crate) async fn apply_progress(
        &self,
        job_id: &JobId,
        delta: &ProgressDelta,
    ) -> DbResult<Option<Transition>> {
        let now = now_ms();
        let expires_at = self.expiry(now, JobStatus::Running);
        let sql = format!(
            r#"
            UPDATE jobs SET
                status = 'running',
                phase = COALESCE(?2, phase),
                progress = MAX(progress, COALESCE(?3, progress)),
                message = COALESCE(?4, message),
                total_units = COALESCE(?5, total_units),
                completed_units = COALESCE(?6, completed_units),
                updated_at = ?7,
                expires_at = ?8
            WHERE job_id = ?1
              AND status IN ('pending', 'running')
              AND cancel_requested = 0
              AND expires_at > ?7
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(job_id.as_str())
            .bind(delta.phase.as_deref())
            .bind(delta.progress.map(i64::from))
            .bind(delta.message.as_deref())
            .bind(delta.total_units.map(i64::from))
            .bind(delta.completed_units.map(i64::from))
            .bind(now)
            .bind(expires_at)
            .fetch_optional(self.pool())
            .await?;

        match row {
            Some(row) => {
                sqlx::query("UPDATE active_jobs SET updated_at = ?2, expires_at = ?3 WHERE job_id = ?1")
                    .bind(job_id.as_str())
                    .bind(now)
                    .bind(expires_at)
                    .execute(self.pool())
                    .await?;
                Ok(Some(Transition {
                    record: row.into_record()?,
                    applied: true,
                }))
            }
            None => self.unchanged(job_id).await,
        }
    }

    pub(crate) async fn complete_job(
        &self,
        job_id: &JobId,
        result_refs: &[String],
    ) -> DbResult<Option<Transition>> {
        let refs = serde_json::to_string(result_refs).map_err(|e| DbError::Corrupt {
            job_id: job_id.to_string(),
            message: format!("cannot encode result refs: {e}"),
        })?;
        self.finish_job(job_id, Finish::Completed { refs }).await
    }

    pub(crate) async fn fail_job(
        &self,
        job_id: &JobId,
        failure: &JobFailure,
    ) -> DbResult<Option<Transition>> {
        self.finish_job(job_id, Finish::Failed(failure)).await
    }

    pub(crate) async fn cancel_job(&self, job_id: &JobId) -> DbResult<Option<Transition>> {
        self.finish_job(job_id, Finish::Cancelled).await
    }

    /// Raise the cancel flag; a job that never started is cancelled outright.
    pub(crate) async fn flag_cancel(&self, job_id: &JobId) -> DbResult<Option<Transition>> {
        let now = now_ms();
        let sql = format!(
            r#"
            UPDATE jobs SET
                cancel_requested = 1,
                status = CASE WHEN status = 'pending' THEN 'cancelled' ELSE status END,
                expires_at = CASE WHEN status = 'pending' THEN ?3 ELSE expires_at END,
                updated_at = ?2
            WHERE job_id = ?1
              AND status IN ('pending', 'running')
              AND expires_at > ?2
            RETURNING {JOB_COLUMNS}
            "#
        );
        let mut tx = self.pool().begin().await?;
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(job_id.as_str())
            .bind(now)
            .bind(self.expiry(now, JobStatus::Cancelled))
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return self.unchanged(job_id).await;
        };
        let record = row.into_record()?;
        if record.status == JobStatus::Cancelled {
            clear_pointer_tx(&mut tx, &record).await?;
        }
        tx.commit().await?;
        Ok(Some(Transition {
            record,
            applied: true,
        }))
    }

    /// Shared body of the three terminal transitions.
    async fn finish_job(&self, job_id: &JobId, finish: Finish<'_>) -> DbResult<Option<Transition>> {
        let now = now_ms();
        let status = finish.status();
        let sql = format!(
            r#"
            UPDATE jobs SET
                status = '{status}',
                {set},
                updated_at = ?2,
                expires_at = ?3
            WHERE job_id = ?1
              AND status IN ('pending', 'running')
              AND expires_at > ?2
            RETURNING {JOB_COLUMNS}
            "#,
            status = status.as_str(),
            set = finish.set_clause(),
        );

        let mut tx = self.pool().begin().await?;
        let query = sqlx::query_as::<_, JobRow>(&sql)
            .bind(job_id.as_str())
            .bind(now)
            .bind(self.expiry(now, status));
        let query = match &finish {
            Finish::Completed { refs } => query.bind(refs.as_str()),
            Finish::Failed(failure) => query
                .bind(failure.kind.as_str())
                .bind(failure.message.as_str())
                .bind(failure.recoverable),
            Finish::Cancelled => query,
        };
        let row = query.fetch_optional(&mut *tx).await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return self.unchanged(job_id).await;
        };
        let record = row.into_record()?;
        clear_pointer_tx(&mut tx, &record).await?;
        tx.commit().await?;
        Ok(Some(Transition {
            record,
            applied: true,
        }))
    }

    /// The current record when a guarded update did not apply, or `None`
    /// when the job is gone.
    async fn unchanged(&self, job_id: &JobId) -> DbResult<Option<Transition>> {
        Ok(self.find_job(job_id).await?.map(|record| Transition {
            record,
            applied: false,
        }))
    }

    /// Delete expired jobs and stale active pointers.
    pub async fn purge_expired_jobs(&self) -> DbResult<u64> {
        let now = now_ms();
        let jobs = sqlx::query("DELETE FROM jobs WHERE expires_at <= ?1")
            .bind(now)
            .execute(self.pool())
            .await?
            .rows_affected();
        sqlx::query(
            "DELETE FROM active_jobs WHERE expires_at <= ?1 \
             OR job_id NOT IN (SELECT job_id FROM jobs)",
        )
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(jobs)
    }

    /// Fail every job still pending or running, e.g. after a restart.
    pub async fn fail_unfinished_jobs(&self) -> DbResult<u64> {
        let now = now_ms();
        let mut tx = self.pool().begin().await?;
        let failed = sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'failed',
                error_kind = 'internal',
                error_message = ?1,
                error_recoverable = 1,
                updated_at = ?2,
                expires_at = ?3
            WHERE status IN ('pending', 'running')
            "#,
        )
        .bind(INTERRUPTED_MESSAGE)
        .bind(now)
        .bind(self.expiry(now, JobStatus::Failed))
        .execute(&mut *tx)
        .await?
        .rows_affected();
        sqlx::query(
            "DELETE FROM active_jobs WHERE job_id NOT IN \
             (SELECT job_id FROM jobs WHERE status IN ('pending', 'running'))",
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(failed)
    }
}

/// Drop the owner's active pointer if it still references this job.
async fn clear_pointer_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    record: &JobRecord,
) -> DbResult<()> {
    sqlx::query("DELETE FROM active_jobs WHERE user_id = ?1 AND job_id = ?2")
        .bind(&record.user_id)
        .bind(record.job_id.as_str())
        .execute(&mut **tx)
        .await?;
    Ok(())
}
