//! Contracts for the tokenizer and model collaborators

use super::params::GenerationParams;
use crate::types::errors::GenerationError;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Decision returned by the per-token callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    /// Continue generation
    Continue,
    /// Stop generation
    Stop,
}

pub trait TextTokenizer: Send + Sync {
    /// Encode `text`, keeping at most the last `max_length` ids
    fn encode(
        &self,
        text: &str,
        max_length: Option<usize>,
        add_special_tokens: bool,
    ) -> Result<Vec<u32>, GenerationError>;

    /// Decode ids, skipping special tokens
    fn decode(&self, ids: &[u32]) -> Result<String, GenerationError>;

    fn eos_token_id(&self) -> Option<u32>;
}

/// A blocking text generator.
///
/// `generate` runs to completion on the calling thread. It invokes
/// `on_token` once per produced token, in production order, and stops as
/// soon as the callback answers [`StreamControl::Stop`]. The returned
/// vector holds only the produced tokens, never the prompt.
pub trait TextModel: Send {
    fn generate(
        &mut self,
        input_ids: &[u32],
        params: &GenerationParams,
        on_token: &mut dyn FnMut(u32) -> StreamControl,
    ) -> Result<Vec<u32>, GenerationError>;

    /// Context window in tokens
    fn context_length(&self) -> usize;

    /// Positions taken by prefix embeddings ahead of the prompt
    fn prefix_len(&self) -> usize {
        0
    }

    /// Drop transient state (attention caches) left by the previous generation
    fn clear_cache(&mut self);
}

/// Model slot guarded for exclusive use by one session at a time
pub type SharedModel = Arc<Mutex<Box<dyn TextModel>>>;

/// A model, its tokenizer and the facts the orchestrator needs without locking
#[derive(Clone)]
pub struct LoadedModel {
    pub name: String,
    pub model: SharedModel,
    pub tokenizer: Arc<dyn TextTokenizer>,
    pub context_length: usize,
    pub prefix_len: usize,
}

impl LoadedModel {
    pub fn new(
        name: impl Into<String>,
        model: Box<dyn TextModel>,
        tokenizer: Arc<dyn TextTokenizer>,
    ) -> Self {
        let context_length = model.context_length();
        let prefix_len = model.prefix_len();
        Self {
            name: name.into(),
            model: Arc::new(Mutex::new(model)),
            tokenizer,
            context_length,
            prefix_len,
        }
    }

    /// Prompt budget left once the new-token budget and prefix are reserved
    pub fn max_prompt_length(&self, max_new_tokens: usize) -> usize {
        self.context_length
            .saturating_sub(max_new_tokens)
            .saturating_sub(self.prefix_len)
    }
}

/// Where models are listed and loaded from at runtime
pub trait ModelSource: Send + Sync {
    /// Names that `load` accepts, sorted for display
    fn available(&self) -> anyhow::Result<Vec<String>>;

    /// Blocking load; run it off the async runtime
    fn load(&self, name: &str) -> anyhow::Result<LoadedModel>;
}

/// Keep the rightmost `max_length` ids
pub fn left_truncate(mut ids: Vec<u32>, max_length: Option<usize>) -> Vec<u32> {
    if let Some(max) = max_length {
        if ids.len() > max {
            ids.drain(..ids.len() - max);
        }
    }
    ids
}
