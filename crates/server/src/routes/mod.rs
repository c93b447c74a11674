//! API route handlers.

pub mod health;
pub mod jobs;
pub mod metrics;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined router. Everything except `/metrics` lives under `/api`.
///
/// Routes:
/// - GET  /api/health - Health check
/// - POST /api/jobs/stream - Start a job and stream its events (SSE)
/// - POST /api/jobs - Start a job without a stream
/// - GET  /api/jobs/active - The caller's active job
/// - GET  /api/jobs/{job_id} - Job snapshot
/// - POST /api/jobs/{job_id}/cancel - Cancel a job
/// - GET  /api/jobs/{job_id}/stream - Reconnect: one snapshot event
/// - GET  /metrics - Prometheus metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", jobs::router())
        .merge(metrics::router())
        .with_state(state)
}
