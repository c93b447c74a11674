// crates/core/src/transport.rs
//! Streaming transport adapter.
//!
//! Binds one job's events to one client connection. The connection is
//! abstracted as an [`EventSink`]; the server crate provides one backed by an
//! SSE response. Each event is serialized, written and flushed before the next
//! is accepted, so a slow client slows the pipeline down instead of buffering
//! without bound.
//!
//! A failed write means the client went away: the adapter cancels the job
//! (token and store flag), detaches, and reports `Disconnected` so the
//! pipeline stops.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::bus::Subscriber;
use crate::error::PipelineError;
use crate::event::{ErrorInfo, EventPayload, Frame, ProgressEvent, ProgressUpdate};
use crate::store::JobStore;
use crate::types::{ErrorKind, JobId, JobRecord, JobStatus};

#[derive(Debug, Error)]
#[error("Event sink closed: {0}")]
pub struct SinkError(pub String);

/// One client connection able to receive framed events.
#[async_trait]
pub trait EventSink: Send {
    /// Write and flush one frame. An error means the connection is gone.
    async fn send(&mut self, frame: Frame) -> Result<(), SinkError>;
}

pub struct TransportAdapter<S> {
    job_id: JobId,
    sink: Mutex<Option<S>>,
    store: Arc<dyn JobStore>,
    cancel: CancellationToken,
}

impl<S: EventSink> TransportAdapter<S> {
    /// Attach `sink` to the job and send the `started` event.
    ///
    /// If the client is already gone the job is cancelled and
    /// `Disconnected` returned.
    pub async fn attach(
        record: &JobRecord,
        sink: S,
        store: Arc<dyn JobStore>,
        cancel: CancellationToken,
    ) -> Result<Self, PipelineError> {
        let adapter = Self {
            job_id: record.job_id.clone(),
            sink: Mutex::new(Some(sink)),
            store,
            cancel,
        };
        let started = ProgressEvent::new(
            record.job_id.clone(),
            EventPayload::Started(ProgressUpdate {
                phase: record.phase.clone(),
                progress: record.progress,
                message: "Job started".to_string(),
                completed_units: None,
                total_units: None,
                warning: None,
            }),
        );
        adapter.forward(&started).await?;
        Ok(adapter)
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub async fn is_attached(&self) -> bool {
        self.sink.lock().await.is_some()
    }

    async fn forward(&self, event: &ProgressEvent) -> Result<(), PipelineError> {
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Err(PipelineError::Disconnected);
        };

        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) if event.is_terminal() => {
                tracing::error!(job_id = %self.job_id, error = %e, "failed to serialize terminal event");
                fallback_error_frame(&self.job_id)
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %self.job_id,
                    event = event.event_name(),
                    error = %e,
                    "skipping event that failed to serialize"
                );
                return Ok(());
            }
        };

        if let Err(e) = sink.send(frame).await {
            *guard = None;
            drop(guard);
            tracing::info!(job_id = %self.job_id, error = %e, "client disconnected, cancelling job");
            self.cancel.cancel();
            if let Err(e) = self.store.request_cancel(&self.job_id).await {
                tracing::warn!(job_id = %self.job_id, error = %e, "failed to flag cancellation after disconnect");
            }
            return Err(PipelineError::Disconnected);
        }

        if event.is_terminal() {
            // Nothing may follow a terminal event.
            *guard = None;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: EventSink + 'static> Subscriber for TransportAdapter<S> {
    fn name(&self) -> &'static str {
        "transport"
    }

    async fn deliver(&self, event: &ProgressEvent) -> Result<(), PipelineError> {
        self.forward(event).await
    }
}

fn fallback_error_frame(job_id: &JobId) -> Frame {
    let info = ErrorInfo {
        status: JobStatus::Failed,
        kind: Some(ErrorKind::Internal),
        message: "Internal error".to_string(),
        recoverable: false,
    };
    let data = serde_json::json!({
        "job_id": job_id,
        "type": "error",
        "status": info.status,
        "kind": info.kind,
        "message": info.message,
        "recoverable": info.recoverable,
    });
    Frame {
        event: "error",
        data: data.to_string(),
    }
}
