use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::AppResult;
use crate::orders::OrderRepository;

#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<OrderRepository>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub database: String,
}

/// GET /health
///
/// 503 with a `DATABASE_ERROR` body while the database probe fails.
pub async fn health_check(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    if let Err(e) = state.repository.ping().await {
        warn!("Health check database probe failed: {}", e);
        return Err(e);
    }

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        database: "up".to_string(),
    }))
}

pub fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

/// Serve until `shutdown` is cancelled
pub async fn run_server(app: Router, bind_address: &str, shutdown: CancellationToken) -> AppResult<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
