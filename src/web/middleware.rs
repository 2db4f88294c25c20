use axum::http::{header, Method};
use tower_http::cors::{Any, CorsLayer};

/// The JSON API is meant to be scripted from other local tools
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}
