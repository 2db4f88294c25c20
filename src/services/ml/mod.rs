//! Model backends and the generation pipeline

pub mod backend;
pub mod generation;
pub mod official;
pub mod params;
pub mod stopping;
pub mod streaming;
pub mod stub;

pub use backend::{LoadedModel, ModelSource, StreamControl, TextModel, TextTokenizer};
pub use generation::{GenerationRequest, GenerationState, GenerationUpdate, TextGenerator};
pub use params::{GenerationParams, ParamOverrides};
pub use stopping::StopMatcher;
