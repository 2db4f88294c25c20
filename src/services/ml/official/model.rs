//! Quantized llama-family model on top of `candle_transformers::models::quantized_llama`

use crate::services::ml::backend::{StreamControl, TextModel};
use crate::services::ml::params::GenerationParams;
use crate::types::errors::GenerationError;
use candle_core::quantized::gguf_file;
use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::{LogitsProcessor, Sampling};
use candle_transformers::models::quantized_llama::ModelWeights;
use std::collections::HashSet;
use std::path::Path;

const DEFAULT_CONTEXT_LENGTH: usize = 2048;

pub struct QuantizedLlama {
    weights: ModelWeights,
    device: Device,
    context_length: usize,
    eos_token_id: Option<u32>,
    /// Position the next forward pass continues from
    position: usize,
}

impl QuantizedLlama {
    pub fn from_gguf<P: AsRef<Path>>(
        path: P,
        device: &Device,
        eos_token_id: Option<u32>,
    ) -> candle_core::Result<Self> {
        let path = path.as_ref();
        tracing::info!("🚀 Loading GGUF weights from {}", path.display());

        let mut file = std::fs::File::open(path)?;
        let content = gguf_file::Content::read(&mut file)?;
        let context_length = content
            .metadata
            .get("llama.context_length")
            .and_then(|v| v.to_u32().ok())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_CONTEXT_LENGTH);

        tracing::info!(
            "📊 GGUF: {} tensors, {} metadata entries, context {}",
            content.tensor_infos.len(),
            content.metadata.len(),
            context_length
        );

        let weights = ModelWeights::from_gguf(content, &mut file, device)?;
        tracing::info!("✅ Model weights loaded");

        Ok(Self {
            weights,
            device: device.clone(),
            context_length,
            eos_token_id,
            position: 0,
        })
    }

    /// Logits for the last position of `tokens`, starting at `self.position`
    fn forward(&mut self, tokens: &[u32]) -> candle_core::Result<Tensor> {
        let input = Tensor::new(tokens, &self.device)?.unsqueeze(0)?;
        let logits = self.weights.forward(&input, self.position)?;
        self.position += tokens.len();
        logits.squeeze(0)?.to_dtype(DType::F32)
    }

    fn process_logits(
        &self,
        logits: Tensor,
        context: &[u32],
        produced: usize,
        prompt_len: usize,
        params: &GenerationParams,
    ) -> candle_core::Result<Tensor> {
        let logits = if params.repetition_penalty != 1.0 {
            candle_transformers::utils::apply_repeat_penalty(
                &logits,
                params.repetition_penalty as f32,
                context,
            )?
        } else {
            logits
        };

        let mut banned = banned_ngram_tokens(context, params.no_repeat_ngram_size);
        if let Some(eos) = self.eos_token_id {
            if prompt_len + produced < params.min_length {
                banned.insert(eos);
            }
        }
        if banned.is_empty() {
            return Ok(logits);
        }

        let mut values = logits.to_vec1::<f32>()?;
        for token in banned {
            if let Some(value) = values.get_mut(token as usize) {
                *value = f32::NEG_INFINITY;
            }
        }
        Tensor::from_vec(values, logits.shape(), &self.device)
    }
}

fn logits_processor(params: &GenerationParams) -> LogitsProcessor {
    let temperature = params.temperature;
    let top_k = (params.top_k > 0).then_some(params.top_k);
    let top_p = (params.top_p < 1.0).then_some(params.top_p);

    let sampling = match (params.do_sample && temperature > 0.0, top_k, top_p) {
        (false, _, _) => Sampling::ArgMax,
        (true, None, None) => Sampling::All { temperature },
        (true, Some(k), None) => Sampling::TopK { k, temperature },
        (true, None, Some(p)) => Sampling::TopP { p, temperature },
        (true, Some(k), Some(p)) => Sampling::TopKThenTopP { k, p, temperature },
    };
    LogitsProcessor::from_sampling(params.resolved_seed(), sampling)
}

/// Tokens that would complete an n-gram already present in `tokens`
pub fn banned_ngram_tokens(tokens: &[u32], n: usize) -> HashSet<u32> {
    let mut banned = HashSet::new();
    if n == 0 || tokens.len() < n {
        return banned;
    }
    let prefix = &tokens[tokens.len() + 1 - n..];
    for window in tokens.windows(n) {
        if window[..n - 1] == *prefix {
            banned.insert(window[n - 1]);
        }
    }
    banned
}

impl TextModel for QuantizedLlama {
    fn generate(
        &mut self,
        input_ids: &[u32],
        params: &GenerationParams,
        on_token: &mut dyn FnMut(u32) -> StreamControl,
    ) -> Result<Vec<u32>, GenerationError> {
        if input_ids.is_empty() {
            return Err(GenerationError::InvalidParams("empty prompt".into()));
        }
        let ignored = params.unsupported_by_sampler();
        if !ignored.is_empty() {
            tracing::warn!("[MODEL] Ignoring unsupported parameters: {:?}", ignored);
        }

        let mut processor = logits_processor(params);
        let mut context = input_ids.to_vec();
        let mut produced = Vec::new();

        // A forward pass at position 0 drops every layer's kv cache
        self.position = 0;
        let mut logits = self.forward(input_ids)?;

        while produced.len() < params.max_new_tokens {
            if self.position >= self.context_length {
                tracing::warn!("[MODEL] Context window of {} reached", self.context_length);
                break;
            }
            let logits_now =
                self.process_logits(logits, &context, produced.len(), input_ids.len(), params)?;
            let token = processor.sample(&logits_now)?;
            context.push(token);
            produced.push(token);

            if on_token(token) == StreamControl::Stop || Some(token) == self.eos_token_id {
                break;
            }
            logits = self.forward(&[token])?;
        }
        Ok(produced)
    }

    fn context_length(&self) -> usize {
        self.context_length
    }

    fn clear_cache(&mut self) {
        self.position = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banned_ngrams() {
        // "1 2 3 1 2" with n=3: prefix [1, 2] was followed by 3
        let banned = banned_ngram_tokens(&[1, 2, 3, 1, 2], 3);
        assert_eq!(banned, HashSet::from([3]));
        assert!(banned_ngram_tokens(&[1, 2], 3).is_empty());
        assert!(banned_ngram_tokens(&[1, 1, 1], 0).is_empty());
    }

    #[test]
    fn test_unigram_ban_blocks_every_seen_token() {
        let banned = banned_ngram_tokens(&[4, 5, 4], 1);
        assert_eq!(banned, HashSet::from([4, 5]));
    }

    #[test]
    fn test_greedy_when_not_sampling() {
        let params = GenerationParams {
            do_sample: false,
            seed: 1,
            ..Default::default()
        };
        let mut processor = logits_processor(&params);
        let logits = Tensor::new(&[0.1f32, 3.0, 0.2], &Device::Cpu).unwrap();
        assert_eq!(processor.sample(&logits).unwrap(), 1);
    }
}
