//! Model menu: list the models and switch the loaded one

use crate::state::AppState;
use crate::types::errors::AppError;
use crate::types::message::{ModelRequest, ModelsResponse};
use axum::{extract::State, response::Json};

pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let current = state.generator().await.model_name().to_string();
    let available = state.model_menu(&current);
    Json(ModelsResponse { current, available })
}

/// Load another model; running generations are stopped first
pub async fn load_model(
    State(state): State<AppState>,
    Json(req): Json<ModelRequest>,
) -> Result<Json<ModelsResponse>, AppError> {
    tracing::info!("Model change requested: {}", req.name);
    let current = state.switch_model(req.name.trim()).await?;
    let available = state.model_menu(&current);
    Ok(Json(ModelsResponse { current, available }))
}
