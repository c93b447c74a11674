// crates/server/src/lib.rs
//! Jobstream server library.
//!
//! Axum HTTP surface over the job lifecycle: start jobs and stream their
//! progress as server-sent events, poll, cancel and reconnect.

pub mod auth;
pub mod config;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod routes;
pub mod state;

pub use auth::{AccessPolicy, Caller, OwnerOrAdmin};
pub use config::ServerConfig;
pub use error::*;
pub use metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use state::AppState;

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use jobstream_core::pipeline::extraction::ChunkedExtraction;
use jobstream_core::pipeline::local::{FsDocumentSource, JsonResultWriter, OutlineExtractor};
use jobstream_core::{PipelineRegistry, RegistryError};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, jobs) and `/metrics`
/// - CORS (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Capabilities served by the binary.
///
/// `extraction` reads `<data_dir>/<resource_id>.txt` and writes its result
/// under `<data_dir>/results/`.
pub fn builtin_registry(data_dir: &Path) -> Result<PipelineRegistry, RegistryError> {
    let mut registry = PipelineRegistry::new();
    registry.register(
        "extraction",
        Arc::new(ChunkedExtraction::new(
            FsDocumentSource::new(data_dir),
            OutlineExtractor,
            JsonResultWriter::new(data_dir),
        )),
    )?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use jobstream_db::Database;
    use tower::ServiceExt;

    /// Helper to make a GET request to the app.
    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn app() -> Router {
        let db = Database::new_in_memory().await.expect("in-memory DB");
        let registry = builtin_registry(Path::new("data")).unwrap();
        create_app(AppState::new(Arc::new(db), registry))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (status, body) = get(app().await, "/api/health").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["running_jobs"], 0);
        assert_eq!(json["capabilities"], serde_json::json!(["extraction"]));
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (status, _) = get(app().await, "/api/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_builtin_registry() {
        let registry = builtin_registry(Path::new("data")).unwrap();
        assert_eq!(registry.capabilities(), vec!["extraction"]);
        assert!(registry.get("chat").is_err());
    }
}
