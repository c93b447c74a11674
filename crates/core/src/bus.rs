// crates/core/src/bus.rs
//! Event bus: one `publish` fans an event out to independent subscribers.
//!
//! A job task publishes each normalized event once. The persistence
//! subscriber ([`StoreMirror`](crate::mirror::StoreMirror)) and the transport
//! subscriber ([`TransportAdapter`](crate::transport::TransportAdapter)) each
//! see it in registration order. The first subscriber error stops delivery and
//! is returned to the publisher, which is how store failures, cancellation and
//! client disconnects reach the pipeline.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::event::ProgressEvent;

#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Name for logging.
    fn name(&self) -> &'static str;

    async fn deliver(&self, event: &ProgressEvent) -> Result<(), PipelineError>;
}

#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Vec<Arc<dyn Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: Arc<dyn Subscriber>) {
        self.subscribers.push(subscriber);
    }

    pub fn with(mut self, subscriber: Arc<dyn Subscriber>) -> Self {
        self.subscribe(subscriber);
        self
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub async fn publish(&self, event: &ProgressEvent) -> Result<(), PipelineError> {
        for subscriber in &self.subscribers {
            if let Err(e) = subscriber.deliver(event).await {
                tracing::debug!(
                    job_id = %event.job_id,
                    subscriber = subscriber.name(),
                    error = %e,
                    "subscriber rejected event"
                );
                return Err(e);
            }
        }
        Ok(())
    }
}
