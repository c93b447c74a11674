// crates/core/src/error.rs
use thiserror::Error;

use crate::types::JobId;

/// Errors returned by a [`JobStore`](crate::store::JobStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found or expired: {0}")]
    NotFound(JobId),

    #[error("Job store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt job record {job_id}: {message}")]
    Corrupt { job_id: String, message: String },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Errors returned by a processing pipeline or raised while reporting progress.
///
/// `Cancelled` and `Disconnected` are not failures: a job ending with either
/// is recorded as `cancelled`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Upstream service unavailable: {0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Client disconnected")]
    Disconnected,

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// True for the variants that end a job as `cancelled` rather than `failed`.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Disconnected)
    }
}
