pub mod device;
pub mod loader;
pub mod model;
pub mod tokenizer;

pub use loader::{discover_models, load_model, resolve_model_name, ModelDirectory};
pub use model::QuantizedLlama;
pub use tokenizer::HfTokenizer;
