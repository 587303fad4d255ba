//! Scrape endpoint: serves the gauge registry at `GET /metrics`.
//!
//! Started only after the bootstrap cycle. The handler just encodes
//! whatever the gauges currently hold; it never triggers a poll.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::metrics::MetricsRegistry;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Clone)]
struct AppState {
    metrics: MetricsRegistry,
}

#[derive(Debug)]
pub struct ScrapeError;

impl IntoResponse for ScrapeError {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
    }
}

pub fn router(metrics: MetricsRegistry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(AppState { metrics })
}

/// Serve until the listener fails.
pub async fn serve(listener: TcpListener, metrics: MetricsRegistry) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("📈 Serving metrics on http://{}/metrics", addr);
    }
    axum::serve(listener, router(metrics)).await
}

async fn metrics_handler(
    State(state): State<AppState>,
) -> Result<([(header::HeaderName, &'static str); 1], String), ScrapeError> {
    match state.metrics.encode() {
        Ok(body) => Ok(([(header::CONTENT_TYPE, CONTENT_TYPE)], body)),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            Err(ScrapeError)
        }
    }
}
