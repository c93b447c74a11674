// crates/core/src/types.rs
//! Job record types shared by the store, the lifecycle manager and the wire.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque, globally unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Allocate a fresh identifier.
    pub fn generate() -> Self {
        Self(format!("j-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the user that owns a job. Issued by the auth collaborator.
pub type UserId = String;

/// Status of a job. Transitions only move forward:
/// `pending -> running -> {completed, failed, cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the persisted representation. Returns `None` for unknown values.
    pub fn from_db_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Pending | Self::Running, n) if n.is_terminal() => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified kind of a fatal pipeline error, surfaced to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    UpstreamUnavailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::Internal => "internal",
        }
    }

    pub fn from_db_str(value: &str) -> Option<Self> {
        match value {
            "validation" => Some(Self::Validation),
            "upstream_unavailable" => Some(Self::UpstreamUnavailable),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }
}

/// The error recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub recoverable: bool,
}

/// Snapshot of a job as held by the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub user_id: UserId,
    pub resource_id: String,
    /// Registry name of the pipeline processing this job.
    pub capability: String,
    pub status: JobStatus,
    pub phase: String,
    pub progress: u8,
    pub message: String,
    pub total_units: u32,
    pub completed_units: u32,
    /// Set iff `status == Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_refs: Option<Vec<String>>,
    /// Set iff `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    /// Out-of-band cancellation flag, independent of `status`.
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Input to `CreateJob`.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub user_id: UserId,
    pub resource_id: String,
    pub capability: String,
}

/// Partial update merged into a record by `UpdateProgress`.
///
/// `progress` is merged with `max`, so a stale write never lowers it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressDelta {
    pub phase: Option<String>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub total_units: Option<u32>,
    pub completed_units: Option<u32>,
}

impl ProgressDelta {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
