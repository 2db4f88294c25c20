//! Blocking generation republished as an async token stream

mod bridge;
mod events;

pub use bridge::{GenerationStream, ModelGuard, StreamingBridge};
