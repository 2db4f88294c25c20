use crate::services::extensions::ExtensionParams;
use crate::state::AppState;
use crate::types::errors::AppError;
use axum::{
    extract::{Path, State},
    response::Json,
};
use serde_json::{Map, Value};

pub async fn list_extensions(State(state): State<AppState>) -> Json<Vec<ExtensionParams>> {
    Json(state.generator().await.extensions().params())
}

pub async fn update_extension(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(values): Json<Map<String, Value>>,
) -> Result<Json<ExtensionParams>, AppError> {
    let updated = state.generator().await.extensions().update(&name, &values)?;
    Ok(Json(updated))
}
