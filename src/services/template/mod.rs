//! Template rendering service

pub mod engine;

pub use engine::{PageContext, TemplateEngine};
