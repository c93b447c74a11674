// crates/server/src/main.rs
//! Jobstream server binary.
//!
//! Opens the job store, fails jobs a previous run left unfinished, starts
//! the expiry sweeper and serves the API.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use jobstream_core::JobStore;
use jobstream_db::Database;
use jobstream_server::jobs::maintenance::{recover_interrupted, spawn_purge_loop};
use jobstream_server::{builtin_registry, create_app, init_metrics, AppState, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log)),
        )
        .init();

    init_metrics();

    let db = match &config.db {
        Some(path) => Database::new(path).await,
        None => Database::open_default().await,
    }
    .context("open job database")?
    .with_ttls(config.ttls());
    tracing::info!(path = %db.db_path().display(), "job database ready");

    let store: Arc<dyn JobStore> = Arc::new(db);
    recover_interrupted(store.as_ref())
        .await
        .context("recover interrupted jobs")?;
    let _purge = spawn_purge_loop(store.clone(), config.purge_interval());

    let registry = builtin_registry(&config.data_dir).context("register pipelines")?;
    tracing::info!(
        capabilities = ?registry.capabilities(),
        data_dir = %config.data_dir.display(),
        "pipelines registered"
    );

    let app = create_app(AppState::new(store, registry));

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!("jobstream listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
