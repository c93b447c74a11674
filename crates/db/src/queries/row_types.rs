// crates/db/src/queries/row_types.rs
// Internal row type for the jobs table and its conversion to `JobRecord`.

use chrono::{DateTime, TimeZone, Utc};
use jobstream_core::{ErrorKind, JobFailure, JobRecord, JobStatus};
use sqlx::Row;

use crate::{DbError, DbResult};

/// Column list shared by every query returning a full job row.
pub(crate) const JOB_COLUMNS: &str = "job_id, user_id, resource_id, capability, status, phase, \
     progress, message, total_units, completed_units, result_refs, error_kind, error_message, \
     error_recoverable, cancel_requested, created_at, updated_at, expires_at";

#[derive(Debug)]
pub(crate) struct JobRow {
    job_id: String,
    user_id: String,
    resource_id: String,
    capability: String,
    status: String,
    phase: String,
    progress: i64,
    message: String,
    total_units: i64,
    completed_units: i64,
    result_refs: Option<String>,
    error_kind: Option<String>,
    error_message: Option<String>,
    error_recoverable: Option<bool>,
    cancel_requested: bool,
    created_at: i64,
    updated_at: i64,
    expires_at: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for JobRow {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            job_id: row.try_get("job_id")?,
            user_id: row.try_get("user_id")?,
            resource_id: row.try_get("resource_id")?,
            capability: row.try_get("capability")?,
            status: row.try_get("status")?,
            phase: row.try_get("phase")?,
            progress: row.try_get("progress")?,
            message: row.try_get("message")?,
            total_units: row.try_get("total_units")?,
            completed_units: row.try_get("completed_units")?,
            result_refs: row.try_get("result_refs")?,
            error_kind: row.try_get("error_kind")?,
            error_message: row.try_get("error_message")?,
            error_recoverable: row.try_get("error_recoverable")?,
            cancel_requested: row.try_get("cancel_requested")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

impl JobRow {
    pub(crate) fn into_record(self) -> DbResult<JobRecord> {
        let corrupt = |message: String| DbError::Corrupt {
            job_id: self.job_id.clone(),
            message,
        };

        let status = JobStatus::from_db_str(&self.status)
            .ok_or_else(|| corrupt(format!("unknown status {:?}", self.status)))?;

        let result_refs = match &self.result_refs {
            Some(json) => Some(
                serde_json::from_str::<Vec<String>>(json)
                    .map_err(|e| corrupt(format!("bad result_refs: {e}")))?,
            ),
            None => None,
        };

        let error = match &self.error_kind {
            Some(kind) => Some(JobFailure {
                kind: ErrorKind::from_db_str(kind)
                    .ok_or_else(|| corrupt(format!("unknown error kind {kind:?}")))?,
                message: self.error_message.clone().unwrap_or_default(),
                recoverable: self.error_recoverable.unwrap_or(false),
            }),
            None => None,
        };

        Ok(JobRecord {
            job_id: self.job_id.clone().into(),
            user_id: self.user_id,
            resource_id: self.resource_id,
            capability: self.capability,
            status,
            phase: self.phase,
            progress: self.progress.clamp(0, 100) as u8,
            message: self.message,
            total_units: self.total_units.max(0) as u32,
            completed_units: self.completed_units.max(0) as u32,
            result_refs,
            error,
            cancel_requested: self.cancel_requested,
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
            expires_at: from_millis(self.expires_at),
        })
    }
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}
