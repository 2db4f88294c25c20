//! Error types shared by the generation pipeline and the web layer

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures raised while preparing or running a generation
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// The model already serves another session
    #[error("model is busy with another generation")]
    Busy,

    #[error("invalid generation parameters: {0}")]
    InvalidParams(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("backend error: {0}")]
    Backend(String),

    /// Device or host memory ran out mid-generation
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("generation worker panicked")]
    WorkerPanicked,

    #[error("preset error: {0}")]
    Preset(String),
}

impl GenerationError {
    /// Classify a backend failure, promoting allocation failures to `ResourceExhausted`
    pub fn backend(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("out of memory") || lower.contains("failed to allocate") {
            Self::ResourceExhausted(message)
        } else {
            Self::Backend(message)
        }
    }
}

impl From<candle_core::Error> for GenerationError {
    fn from(err: candle_core::Error) -> Self {
        Self::backend(err.to_string())
    }
}

/// Rejected extension parameter changes
#[derive(Debug, Clone, Error)]
pub enum ExtensionError {
    #[error("extension {0:?} is not loaded")]
    Unknown(String),

    #[error("{extension}: {message}")]
    InvalidParam { extension: String, message: String },
}

/// Error returned by HTTP handlers
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Extension(#[from] ExtensionError),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Generation(GenerationError::Busy) => StatusCode::CONFLICT,
            AppError::Generation(GenerationError::InvalidParams(_))
            | AppError::Generation(GenerationError::Preset(_))
            | AppError::Extension(ExtensionError::InvalidParam { .. })
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Generation(GenerationError::ResourceExhausted(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::SessionNotFound(_)
            | AppError::ModelNotFound(_)
            | AppError::Extension(ExtensionError::Unknown(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_classification() {
        assert!(matches!(
            GenerationError::backend("CUDA error: out of memory"),
            GenerationError::ResourceExhausted(_)
        ));
        assert!(matches!(
            GenerationError::backend("shape mismatch"),
            GenerationError::Backend(_)
        ));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::from(GenerationError::Busy).status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::SessionNotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(ExtensionError::Unknown("x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(ExtensionError::InvalidParam {
                extension: "x".into(),
                message: "bad".into(),
            })
            .status(),
            StatusCode::BAD_REQUEST
        );
    }
}
