// crates/server/src/routes/jobs.rs
//! Job control and streaming endpoints.
//!
//! - POST /jobs/stream          - start a job and stream its events
//! - POST /jobs                 - start a job without a stream
//! - GET  /jobs/active          - the caller's active job
//! - GET  /jobs/{job_id}        - job snapshot
//! - POST /jobs/{job_id}/cancel - request cancellation
//! - GET  /jobs/{job_id}/stream - one snapshot event, then close

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use jobstream_core::{reconnect, JobId, JobRecord, JobStatus};

use crate::auth::Caller;
use crate::error::{ApiError, ApiResult};
use crate::jobs::sse::{self, sse_response, to_event};
use crate::jobs::StartJob;
use crate::metrics;
use crate::state::AppState;

/// Header carrying the new job's id on a streaming start.
pub const JOB_ID_HEADER: &str = "x-job-id";

#[derive(Debug, Deserialize)]
pub struct StartJobRequest {
    pub capability: String,
    pub resource_id: String,
    /// Capability-specific input, passed through to the pipeline.
    #[serde(default)]
    pub input: Value,
}

impl StartJobRequest {
    fn into_start(self, caller: Caller) -> StartJob {
        StartJob {
            user_id: caller.user_id,
            capability: self.capability,
            resource_id: self.resource_id,
            input: self.input,
        }
    }
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct StartJobResponse {
    pub job_id: JobId,
}

#[derive(Debug, Serialize)]
pub struct ActiveJobResponse {
    pub has_active_job: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<JobRecord>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub cancel_requested: bool,
}

fn authorize(state: &AppState, caller: &Caller, record: &JobRecord) -> ApiResult<()> {
    if state.access.caller_owns(caller, record) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(record.job_id.clone()))
    }
}

/// POST /api/jobs/stream - start a job and attach this response to it.
///
/// The first event is `started`; the last is `complete` or `error`.
async fn start_stream(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(body): Json<StartJobRequest>,
) -> ApiResult<impl IntoResponse> {
    let job = state.jobs.start(body.into_start(caller)).await?;
    let job_id = job.job_id().to_string();

    let (sink, stream) = sse::channel();
    state.jobs.spawn_streaming(job, sink);

    Ok(([(JOB_ID_HEADER, job_id)], sse_response(stream)))
}

/// POST /api/jobs - start a job that runs to completion server-side.
async fn start_detached(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(body): Json<StartJobRequest>,
) -> ApiResult<(StatusCode, Json<StartJobResponse>)> {
    let job = state.jobs.start(body.into_start(caller)).await?;
    let job_id = job.job_id().clone();
    state.jobs.spawn_detached(job);

    Ok((StatusCode::ACCEPTED, Json(StartJobResponse { job_id })))
}

/// GET /api/jobs/active
async fn active_job(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> ApiResult<Json<ActiveJobResponse>> {
    let job = match state.store.get_active_job(&caller.user_id).await? {
        Some(job_id) => match state.store.get_job(&job_id).await {
            Ok(record) => Some(record),
            // The pointer outlived its record.
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        },
        None => None,
    };

    Ok(Json(ActiveJobResponse {
        has_active_job: job.is_some(),
        job,
    }))
}

/// GET /api/jobs/{job_id}
async fn get_job(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobRecord>> {
    let record = state.store.get_job(&JobId::from(job_id)).await?;
    authorize(&state, &caller, &record)?;
    Ok(Json(record))
}

/// POST /api/jobs/{job_id}/cancel
///
/// Acknowledges with the status as of the request. A running job turns
/// `cancelled` once its task observes the flag.
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let job_id = JobId::from(job_id);
    let record = state.store.get_job(&job_id).await?;
    authorize(&state, &caller, &record)?;

    let record = state.jobs.cancel(&job_id).await?;
    tracing::info!(
        job_id = %job_id,
        user_id = %caller.user_id,
        status = %record.status,
        "cancel requested"
    );

    Ok(Json(CancelResponse {
        job_id: record.job_id,
        status: record.status,
        cancel_requested: record.cancel_requested,
    }))
}

/// GET /api/jobs/{job_id}/stream - reconnect.
///
/// Sends exactly one event describing the job as stored now, then closes.
/// History is not replayed.
async fn reconnect_stream(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let (record, event) = reconnect(state.store.as_ref(), &JobId::from(job_id)).await?;
    authorize(&state, &caller, &record)?;

    let frame = event
        .to_frame()
        .map_err(|e| ApiError::Internal(format!("serialize snapshot: {e}")))?;
    metrics::record_stream_event(frame.event);
    tracing::debug!(job_id = %record.job_id, event = frame.event, "reconnect snapshot");

    let stream = async_stream::stream! {
        yield Ok::<_, Infallible>(to_event(&frame));
    };

    Ok(sse_response(stream))
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", post(start_detached))
        .route("/jobs/stream", post(start_stream))
        .route("/jobs/active", get(active_job))
        .route("/jobs/{job_id}", get(get_job))
        .route("/jobs/{job_id}/cancel", post(cancel_job))
        .route("/jobs/{job_id}/stream", get(reconnect_stream))
}
