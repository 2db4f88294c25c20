//! Health check endpoint

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let model = state.generator().await.model_name().to_string();
    let sessions = state.sessions.read().await.count();
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "textgen-webui",
            "version": env!("CARGO_PKG_VERSION"),
            "model": model,
            "sessions": sessions,
            "metrics": state.metrics.get_stats(),
        })),
    )
}
