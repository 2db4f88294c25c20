//! `tokenizers` wrapper

use crate::services::ml::backend::{left_truncate, TextTokenizer};
use crate::types::errors::GenerationError;
use std::path::Path;
use tokenizers::Tokenizer;

const END_OF_TEXT: &str = "<|endoftext|>";

/// Candidate EOS spellings, checked in order
const EOS_CANDIDATES: &[&str] = &["</s>", END_OF_TEXT, "<|im_end|>", "<eos>"];

pub struct HfTokenizer {
    inner: Tokenizer,
    eos_token_id: Option<u32>,
}

impl HfTokenizer {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let inner = Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer {}: {}", path.display(), e))?;
        Ok(Self::new(inner))
    }

    pub fn new(inner: Tokenizer) -> Self {
        let eos_token_id = EOS_CANDIDATES
            .iter()
            .find_map(|token| inner.token_to_id(token));
        tracing::info!(
            "📖 Tokenizer ready: vocab {}, eos {:?}",
            inner.get_vocab_size(true),
            eos_token_id
        );
        Self {
            inner,
            eos_token_id,
        }
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode(
        &self,
        text: &str,
        max_length: Option<usize>,
        add_special_tokens: bool,
    ) -> Result<Vec<u32>, GenerationError> {
        let encoding = self
            .inner
            .encode(text, add_special_tokens)
            .map_err(|e| GenerationError::Tokenizer(e.to_string()))?;
        Ok(left_truncate(encoding.get_ids().to_vec(), max_length))
    }

    fn decode(&self, ids: &[u32]) -> Result<String, GenerationError> {
        let text = self
            .inner
            .decode(ids, true)
            .map_err(|e| GenerationError::Tokenizer(e.to_string()))?;
        Ok(text.replace(END_OF_TEXT, ""))
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }
}
