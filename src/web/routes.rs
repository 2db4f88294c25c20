use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // Pages
        .route("/", get(super::handlers::pages::index))

        // Streaming and generation
        .route("/api/stream/{session_id}", get(super::sse::stream_session))
        .route("/api/generate", post(super::handlers::api::generate))
        .route("/api/stop", post(super::handlers::api::stop))
        .route("/api/textgen", post(super::handlers::api::textgen))

        // Chat mode
        .route("/api/chat", post(super::handlers::chat::send_message))
        .route("/api/chat/regenerate", post(super::handlers::chat::regenerate))
        .route("/api/chat/remove-last", post(super::handlers::chat::remove_last))
        .route("/api/chat/clear", post(super::handlers::chat::clear_history))
        .route("/api/chat/history", post(super::handlers::chat::history))

        // Presets
        .route("/api/presets", get(super::handlers::api::list_presets))
        .route("/api/presets/{name}", get(super::handlers::api::get_preset))

        // Model menu and extension parameters
        .route("/api/models", get(super::handlers::models::list_models))
        .route("/api/model", post(super::handlers::models::load_model))
        .route("/api/extensions", get(super::handlers::extensions::list_extensions))
        .route("/api/extensions/{name}", post(super::handlers::extensions::update_extension))

        // Health check
        .route("/health", get(super::handlers::health::health_check))

        .with_state(state)
}
