// crates/core/src/reconnect.rs
//! Reconnection: rebuild the single event a returning client needs from the
//! stored record alone.

use crate::error::StoreError;
use crate::event::{ErrorInfo, EventPayload, ProgressEvent, ProgressUpdate};
use crate::store::JobStore;
use crate::types::{JobId, JobRecord, JobStatus};

pub const CANCELLED_MESSAGE: &str = "Job was cancelled";

/// Fetch `job_id` and synthesize its snapshot event.
///
/// The record is returned alongside so the caller can check ownership before
/// sending anything.
pub async fn reconnect(
    store: &dyn JobStore,
    job_id: &JobId,
) -> Result<(JobRecord, ProgressEvent), StoreError> {
    let record = store.get_job(job_id).await?;
    let event = snapshot_event(&record);
    Ok((record, event))
}

/// The one event describing `record` as of now. Terminal records produce the
/// same event the live stream would have ended with.
pub fn snapshot_event(record: &JobRecord) -> ProgressEvent {
    let payload = match record.status {
        JobStatus::Pending | JobStatus::Running => {
            let has_units = record.total_units > 0;
            EventPayload::Progress(ProgressUpdate {
                phase: record.phase.clone(),
                progress: record.progress,
                message: record.message.clone(),
                completed_units: has_units.then_some(record.completed_units),
                total_units: has_units.then_some(record.total_units),
                warning: None,
            })
        }
        JobStatus::Completed => EventPayload::Complete {
            progress: 100,
            result_refs: record.result_refs.clone().unwrap_or_default(),
        },
        JobStatus::Failed => match &record.error {
            Some(failure) => EventPayload::Error(ErrorInfo {
                status: JobStatus::Failed,
                kind: Some(failure.kind),
                message: failure.message.clone(),
                recoverable: failure.recoverable,
            }),
            None => EventPayload::Error(ErrorInfo {
                status: JobStatus::Failed,
                kind: None,
                message: "Job failed".to_string(),
                recoverable: false,
            }),
        },
        JobStatus::Cancelled => EventPayload::Error(ErrorInfo {
            status: JobStatus::Cancelled,
            kind: None,
            message: CANCELLED_MESSAGE.to_string(),
            recoverable: false,
        }),
    };

    ProgressEvent {
        job_id: record.job_id.clone(),
        payload,
        timestamp: record.updated_at,
    }
}
