use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::json;
use tracing::warn;

use crate::{db, AppState};

/// GET /api/v1/health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match db::check_connection(&state.db).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "up",
                "database": "up",
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": Utc::now().to_rfc3339(),
            })),
        ),
        Err(e) => {
            warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "down",
                    "database": "down",
                    "version": env!("CARGO_PKG_VERSION"),
                    "timestamp": Utc::now().to_rfc3339(),
                })),
            )
        }
    }
}
