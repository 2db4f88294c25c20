// Core modules
pub mod config;
pub mod services;
pub mod state;
pub mod types;
pub mod web;

// Re-exports
pub use config::{Config, Settings};
pub use services::ml::{GenerationRequest, GenerationUpdate, TextGenerator};
pub use services::template::engine::TemplateEngine;
pub use state::AppState;
