// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use jobstream_core::{JobStore, PipelineRegistry};

use crate::auth::{AccessPolicy, OwnerOrAdmin};
use crate::jobs::JobManager;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    pub store: Arc<dyn JobStore>,
    pub jobs: Arc<JobManager>,
    /// Ownership predicate for every job-scoped endpoint.
    pub access: Arc<dyn AccessPolicy>,
}

impl AppState {
    /// Create state with the default owner-or-admin policy.
    pub fn new(store: Arc<dyn JobStore>, registry: PipelineRegistry) -> Arc<Self> {
        Self::with_policy(store, registry, Arc::new(OwnerOrAdmin))
    }

    pub fn with_policy(
        store: Arc<dyn JobStore>,
        registry: PipelineRegistry,
        access: Arc<dyn AccessPolicy>,
    ) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            jobs: Arc::new(JobManager::new(store.clone(), registry)),
            store,
            access,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
