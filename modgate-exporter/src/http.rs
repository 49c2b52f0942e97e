//! HTTP server for the tag API and the Prometheus metrics endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use modgate_controller::{Controller, PollState, TagValue, writable};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::metrics::MetricsRenderer;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    controller: Arc<Controller>,
    metrics: Arc<MetricsRenderer>,
}

/// One tag in the `/tags` listing.
#[derive(Debug, Serialize)]
struct TagView<'a> {
    name: &'a str,
    display_name: Option<&'a str>,
    group: Option<&'a str>,
    value: Option<TagValue>,
}

/// Body of `POST /api/v1/write`.
#[derive(Debug, Deserialize)]
struct WriteRequest {
    name: String,
    value: f64,
}

/// Create the HTTP router.
pub fn create_router(
    controller: Arc<Controller>,
    metrics: MetricsRenderer,
    metrics_path: &str,
) -> Router {
    let state = AppState {
        controller,
        metrics: Arc::new(metrics),
    };

    Router::new()
        .route("/tags", get(tags_handler))
        .route("/api/v1/write", post(write_handler))
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the /tags endpoint.
async fn tags_handler(State(state): State<AppState>) -> Response {
    let snapshots = state.controller.tags();
    let views: Vec<TagView<'_>> = snapshots
        .iter()
        .map(|s| TagView {
            name: s.tag.name(),
            display_name: s.tag.display_name(),
            group: s.tag.group(),
            value: s.value,
        })
        .collect();

    Json(views).into_response()
}

fn bad_request(reason: &'static str) -> Response {
    (StatusCode::BAD_REQUEST, reason).into_response()
}

/// Handler for the /api/v1/write endpoint.
///
/// The body is decoded by hand so that malformed JSON is a 400 like every
/// other rejection.
async fn write_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request: WriteRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "Rejecting malformed write request");
            return bad_request("Bad Request");
        }
    };

    let Some(tag) = state.controller.find_tag(&request.name) else {
        return bad_request("Bad Request: tag not found");
    };
    if !writable(tag) {
        return bad_request("Bad Request: operation not permitted");
    }
    if let Err(e) = tag.check_value(request.value) {
        debug!(tag = %tag.name(), error = %e, "Rejecting write value");
        return bad_request("Bad Request: invalid value");
    }

    let tag = tag.clone();
    let controller = Arc::clone(&state.controller);
    let result =
        tokio::task::spawn_blocking(move || controller.write_tag(&tag, request.value)).await;

    match result {
        Ok(Ok(())) => StatusCode::OK.into_response(),
        Ok(Err(_)) => bad_request("Bad Request: write modbus error"),
        Err(e) => {
            warn!(error = %e, "Write task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Handler for the metrics endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state.metrics.render(&state.controller);

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
async fn ready_handler(State(state): State<AppState>) -> Response {
    match state.controller.state() {
        PollState::Running => (StatusCode::OK, "ready\n").into_response(),
        other => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("not ready - poll engine {}\n", other.as_str()),
        )
            .into_response(),
    }
}

/// HTTP server configuration.
pub struct HttpServer {
    controller: Arc<Controller>,
    listen_addr: SocketAddr,
    metrics_path: String,
    metrics: MetricsRenderer,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(
        controller: Arc<Controller>,
        listen_addr: SocketAddr,
        metrics_path: String,
        metrics: MetricsRenderer,
    ) -> Self {
        Self {
            controller,
            listen_addr,
            metrics_path,
            metrics,
        }
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let router = create_router(self.controller, self.metrics, &self.metrics_path);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(
            addr = %self.listen_addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                while !*shutdown.borrow_and_update() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
