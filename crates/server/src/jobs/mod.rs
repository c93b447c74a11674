// crates/server/src/jobs/mod.rs
//! Job lifecycle for the HTTP surface.
//!
//! Provides:
//! - `JobManager`: creates jobs, supersedes, runs and cancels them
//! - `SseSink`: the event sink backing a streaming response
//! - `maintenance`: restart recovery and the expiry sweeper

pub mod maintenance;
pub mod manager;
pub mod sse;

pub use manager::{JobManager, PreparedJob, StartJob};
pub use sse::SseSink;
