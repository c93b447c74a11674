// crates/core/src/classify.rs
//! Classification of fatal pipeline errors into client-facing kinds.

use crate::error::{PipelineError, StoreError};
use crate::types::{ErrorKind, JobFailure};

/// Classify a fatal pipeline error.
///
/// Returns the kind and whether a retry by the user could plausibly succeed.
/// Typed variants map directly; `Internal` messages coming from untyped
/// upstream code fall back to substring heuristics.
pub fn classify(err: &PipelineError) -> (ErrorKind, bool) {
    match err {
        PipelineError::Validation(_) => (ErrorKind::Validation, false),
        PipelineError::Upstream(_) => (ErrorKind::UpstreamUnavailable, true),
        PipelineError::Store(StoreError::Unavailable(_)) => (ErrorKind::Internal, true),
        PipelineError::Store(_) => (ErrorKind::Internal, false),
        PipelineError::Internal(msg) => classify_message(msg),
        // Cancellation is a status, not an error kind. Callers should not
        // record these as failures; keep a total mapping anyway.
        PipelineError::Cancelled | PipelineError::Disconnected => (ErrorKind::Internal, false),
    }
}

/// Build the failure record persisted by `Fail`.
pub fn failure_from(err: &PipelineError) -> JobFailure {
    let (kind, recoverable) = classify(err);
    JobFailure {
        kind,
        message: err.to_string(),
        recoverable,
    }
}

fn classify_message(message: &str) -> (ErrorKind, bool) {
    let msg = message.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| msg.contains(n));

    if any(&[
        "connection",
        "network",
        "dial",
        "eof",
        "reset by peer",
        "timeout",
        "timed out",
        "deadline exceeded",
        "rate limit",
        "status 429",
        "status 502",
        "status 503",
        "status 504",
    ]) {
        return (ErrorKind::UpstreamUnavailable, true);
    }
    if any(&["validation", "invalid", "required", "malformed"]) {
        return (ErrorKind::Validation, false);
    }
    (ErrorKind::Internal, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobId;

    #[test]
    fn test_typed_variants() {
        assert_eq!(
            classify(&PipelineError::Validation("empty pdf".into())),
            (ErrorKind::Validation, false)
        );
        assert_eq!(
            classify(&PipelineError::Upstream("503".into())),
            (ErrorKind::UpstreamUnavailable, true)
        );
        assert_eq!(
            classify(&PipelineError::Store(StoreError::NotFound(JobId::from("j")))),
            (ErrorKind::Internal, false)
        );
    }

    #[test]
    fn test_untyped_messages_use_heuristics() {
        assert_eq!(
            classify(&PipelineError::Internal("connection reset by peer".into())),
            (ErrorKind::UpstreamUnavailable, true)
        );
        assert_eq!(
            classify(&PipelineError::Internal("Context deadline exceeded".into())),
            (ErrorKind::UpstreamUnavailable, true)
        );
        assert_eq!(
            classify(&PipelineError::Internal("field `code` is required".into())),
            (ErrorKind::Validation, false)
        );
        assert_eq!(
            classify(&PipelineError::Internal("index out of range".into())),
            (ErrorKind::Internal, false)
        );
    }

    #[test]
    fn test_failure_from_keeps_message() {
        let failure = failure_from(&PipelineError::Upstream("inference api status 502".into()));
        assert_eq!(failure.kind, ErrorKind::UpstreamUnavailable);
        assert!(failure.recoverable);
        assert!(failure.message.contains("status 502"));
    }
}
