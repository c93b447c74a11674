// crates/server/src/jobs/maintenance.rs
//! Store housekeeping: startup recovery and the expiry sweeper.

use std::sync::Arc;
use std::time::Duration;

use jobstream_core::{JobStore, StoreError};
use tokio::task::JoinHandle;

/// Fail every job a previous process left unfinished.
pub async fn recover_interrupted(store: &dyn JobStore) -> Result<u64, StoreError> {
    let failed = store.fail_interrupted().await?;
    if failed > 0 {
        tracing::warn!(count = failed, "marked jobs interrupted by restart as failed");
    }
    Ok(failed)
}

/// Delete expired records every `interval`. Errors are logged and the loop
/// keeps going.
pub fn spawn_purge_loop(store: Arc<dyn JobStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(n) => tracing::debug!(purged = n, "purged expired jobs"),
                Err(e) => tracing::warn!(error = %e, "purge of expired jobs failed"),
            }
        }
    })
}
