//! Observability HTTP surface: `/metrics` and `/health`.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::{io_err, DaemonError};
use crate::metrics::MetricsRegistry;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

pub fn router(registry: Arc<MetricsRegistry>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(registry)
}

async fn metrics(State(registry): State<Arc<MetricsRegistry>>) -> Response {
    match registry.encode_text() {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

/// Serve until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> Result<(), DaemonError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "observability server listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| io_err("observability-server", e))
}
