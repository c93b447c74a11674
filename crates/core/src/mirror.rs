// crates/core/src/mirror.rs
//! Persistence subscriber: mirrors non-terminal events into the job store.
//!
//! Every write doubles as the cancellation check. A record that comes back
//! flagged or already terminal aborts the pipeline with `Cancelled`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::Subscriber;
use crate::error::PipelineError;
use crate::event::{EventPayload, ProgressEvent, ProgressUpdate};
use crate::store::JobStore;
use crate::types::{JobStatus, ProgressDelta};

pub struct StoreMirror {
    store: Arc<dyn JobStore>,
}

impl StoreMirror {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }
}

fn delta_for(update: &ProgressUpdate) -> ProgressDelta {
    ProgressDelta {
        phase: Some(update.phase.clone()),
        progress: Some(update.progress),
        message: Some(update.message.clone()),
        total_units: update.total_units,
        completed_units: update.completed_units,
    }
}

#[async_trait]
impl Subscriber for StoreMirror {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn deliver(&self, event: &ProgressEvent) -> Result<(), PipelineError> {
        let delta = match &event.payload {
            EventPayload::Started(update) | EventPayload::Progress(update) => delta_for(update),
            // Terminal state is written by the task runner through
            // SetResult / Fail / MarkCancelled.
            EventPayload::Complete { .. } | EventPayload::Error(_) => return Ok(()),
            // Streamed content only keeps the record alive.
            _ => ProgressDelta::default(),
        };

        let record = self.store.update_progress(&event.job_id, &delta).await?;
        if record.cancel_requested || record.status == JobStatus::Cancelled {
            return Err(PipelineError::Cancelled);
        }
        if record.is_terminal() {
            return Err(PipelineError::Internal(format!(
                "job {} already {}",
                record.job_id, record.status
            )));
        }
        Ok(())
    }
}
