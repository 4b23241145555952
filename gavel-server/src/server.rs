//! Axum server setup and router configuration.

use crate::shutdown::shutdown_signal;
use crate::state::AppState;
use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use gavel_core::processors::StatsSnapshot;
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Build the main application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Simple health check - returns OK if the server is running.
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    config_version: u64,
    #[serde(flatten)]
    counters: StatsSnapshot,
}

/// Pipeline counters since startup.
async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(stats_response(&state))
}

fn stats_response(state: &AppState) -> StatsResponse {
    StatsResponse {
        config_version: state.pipeline_config.version(),
        counters: state.stats.snapshot(),
    }
}

/// Run the server with graceful shutdown support.
pub async fn run_server(router: Router, addr: SocketAddr) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use gavel_core::config::{ConfigStore, PipelineConfig};
    use gavel_core::processors::PipelineStats;
    use std::sync::Arc;

    #[test]
    fn test_stats_reports_counters() {
        let stats = Arc::new(PipelineStats::new());
        stats.record_processed();
        stats.record_malformed();
        let state = AppState::new(stats, ConfigStore::new(PipelineConfig::default()));

        let value = serde_json::to_value(stats_response(&state)).unwrap();
        assert_eq!(value["recordsProcessed"], 1);
        assert_eq!(value["malformedRecords"], 1);
        assert_eq!(value["configVersion"], 0);
    }
}
