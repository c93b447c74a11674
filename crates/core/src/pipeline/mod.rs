// crates/core/src/pipeline/mod.rs
//! Processing pipeline contract.
//!
//! A pipeline receives a [`JobContext`] and a [`ProgressReporter`]. It reports
//! at every unit boundary and must stop promptly once the reporter returns
//! `Cancelled` or `Disconnected`. It never touches the job record directly:
//! the task runner owns the terminal transition.

pub mod chat;
pub mod extraction;
pub mod local;
pub mod registry;

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::error::PipelineError;
use crate::progress::{PhaseWeights, ProgressNormalizer, Signal};
use crate::types::{JobId, UserId};

/// Identity and cancellation handle of the job being processed.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub user_id: UserId,
    pub resource_id: String,
    cancel: CancellationToken,
}

impl JobContext {
    pub fn new(job_id: JobId, user_id: UserId, resource_id: String, cancel: CancellationToken) -> Self {
        Self {
            job_id,
            user_id,
            resource_id,
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the job is cancelled. Use in `select!` around long waits.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// What a successful pipeline hands back to the runner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutput {
    pub result_refs: Vec<String>,
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Phase bands used to normalize this pipeline's signals.
    fn weights(&self) -> PhaseWeights;

    async fn process(
        &self,
        ctx: &JobContext,
        input: Value,
        reporter: &ProgressReporter,
    ) -> Result<JobOutput, PipelineError>;
}

/// The pipeline's only way to emit events.
///
/// Normalizes each [`Signal`] and publishes the result on the job's bus. A
/// non-`Ok` return means the pipeline must stop.
pub struct ProgressReporter {
    job_id: JobId,
    cancel: CancellationToken,
    normalizer: Mutex<ProgressNormalizer>,
    bus: EventBus,
}

impl ProgressReporter {
    pub fn new(job_id: JobId, weights: PhaseWeights, cancel: CancellationToken, bus: EventBus) -> Self {
        Self {
            job_id,
            cancel,
            normalizer: Mutex::new(ProgressNormalizer::new(weights)),
            bus,
        }
    }

    pub async fn report(&self, signal: Signal) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let event = {
            let mut normalizer = self
                .normalizer
                .lock()
                .map_err(|_| PipelineError::Internal("progress normalizer poisoned".into()))?;
            normalizer.normalize(&self.job_id, signal)
        };
        self.bus.publish(&event).await
    }

    /// Highest overall progress reported so far.
    pub fn progress(&self) -> u8 {
        self.normalizer.lock().map(|n| n.progress()).unwrap_or(0)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
