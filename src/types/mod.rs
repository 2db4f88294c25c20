pub mod errors;
pub mod events;
pub mod message;

pub use errors::{AppError, GenerationError};
pub use events::StreamEvent;
