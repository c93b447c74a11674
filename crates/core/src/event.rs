// crates/core/src/event.rs
//! Canonical progress events pushed to clients.
//!
//! Every event serializes to a flat JSON object carrying `job_id`, a `type`
//! tag, the type-specific payload and a `timestamp`. A [`Frame`] pairs that
//! JSON with the event name used by the transport (`event: progress`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ErrorKind, JobId, JobStatus};

/// A single event in a job's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    #[serde(flatten)]
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

/// Type-specific payload of a [`ProgressEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Started(ProgressUpdate),
    Progress(ProgressUpdate),
    Chunk { content: String },
    Reasoning { content: String },
    Citations { citations: Vec<Citation> },
    Usage(TokenUsage),
    Tool(ToolEvent),
    Error(ErrorInfo),
    Complete { progress: u8, result_refs: Vec<String> },
}

/// Progress snapshot carried by `started` and `progress` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub phase: String,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_units: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_units: Option<u32>,
    /// Present when a unit failed transiently and processing continued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<Warning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub message: String,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStage {
    Start,
    End,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEvent {
    pub stage: ToolStage,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload of the terminal `error` event. Also used for cancellation, in
/// which case `status` is `cancelled` and `kind` is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    pub message: String,
    pub recoverable: bool,
}

impl ProgressEvent {
    pub fn new(job_id: JobId, payload: EventPayload) -> Self {
        Self {
            job_id,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// The event name written on the transport.
    pub fn event_name(&self) -> &'static str {
        match &self.payload {
            EventPayload::Started(_) => "started",
            EventPayload::Progress(_) => "progress",
            EventPayload::Chunk { .. } => "chunk",
            EventPayload::Reasoning { .. } => "reasoning",
            EventPayload::Citations { .. } => "citations",
            EventPayload::Usage(_) => "usage",
            EventPayload::Tool(_) => "tool",
            EventPayload::Error(_) => "error",
            EventPayload::Complete { .. } => "complete",
        }
    }

    /// `complete` and `error` end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.payload,
            EventPayload::Error(_) | EventPayload::Complete { .. }
        )
    }

    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        Ok(Frame {
            event: self.event_name(),
            data: serde_json::to_string(self)?,
        })
    }
}

/// A serialized event ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: &'static str,
    pub data: String,
}

impl Frame {
    /// Text/event-stream encoding of the frame.
    pub fn encode(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}
