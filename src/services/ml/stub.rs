//! Model-free backend for UI work and tests
//!
//! `CharTokenizer` maps each character to its scalar value and
//! `ScriptedModel` replays a fixed token script, so the whole pipeline can
//! run without any weights on disk.

use super::backend::{
    left_truncate, LoadedModel, ModelSource, StreamControl, TextModel, TextTokenizer,
};
use super::params::GenerationParams;
use crate::types::errors::GenerationError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Reply streamed when the server runs with `--stub`
pub const STUB_REPLY: &str = "This is a stub reply. No model is loaded, so the server \
     is replaying a fixed script to exercise streaming, formatting and the web UI.";

const EOS_ID: u32 = 0;

/// One token per Unicode scalar value; id 0 is end of sequence
#[derive(Debug, Default, Clone, Copy)]
pub struct CharTokenizer;

impl CharTokenizer {
    pub fn ids(text: &str) -> Vec<u32> {
        text.chars().map(u32::from).collect()
    }
}

impl TextTokenizer for CharTokenizer {
    fn encode(
        &self,
        text: &str,
        max_length: Option<usize>,
        _add_special_tokens: bool,
    ) -> Result<Vec<u32>, GenerationError> {
        Ok(left_truncate(Self::ids(text), max_length))
    }

    fn decode(&self, ids: &[u32]) -> Result<String, GenerationError> {
        Ok(ids
            .iter()
            .filter(|&&id| id != EOS_ID)
            .filter_map(|&id| char::from_u32(id))
            .collect())
    }

    fn eos_token_id(&self) -> Option<u32> {
        Some(EOS_ID)
    }
}

/// Replays `script` one token per step, up to `max_new_tokens`
pub struct ScriptedModel {
    script: Vec<u32>,
    delay: Option<Duration>,
    fail_after: Option<usize>,
    context_length: usize,
    emitted: Arc<AtomicUsize>,
    cache_clears: Arc<AtomicUsize>,
    last_input: Arc<Mutex<Vec<u32>>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<u32>) -> Self {
        Self {
            script,
            delay: None,
            fail_after: None,
            context_length: 2048,
            emitted: Arc::new(AtomicUsize::new(0)),
            cache_clears: Arc::new(AtomicUsize::new(0)),
            last_input: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn from_text(text: &str) -> Self {
        Self::new(CharTokenizer::ids(text))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail with an out-of-memory error once `count` tokens were produced
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    pub fn with_context_length(mut self, context_length: usize) -> Self {
        self.context_length = context_length;
        self
    }

    pub fn emitted_counter(&self) -> Arc<AtomicUsize> {
        self.emitted.clone()
    }

    pub fn clear_counter(&self) -> Arc<AtomicUsize> {
        self.cache_clears.clone()
    }

    /// Prompt ids received by the most recent `generate` call
    pub fn last_input(&self) -> Arc<Mutex<Vec<u32>>> {
        self.last_input.clone()
    }
}

impl TextModel for ScriptedModel {
    fn generate(
        &mut self,
        input_ids: &[u32],
        params: &GenerationParams,
        on_token: &mut dyn FnMut(u32) -> StreamControl,
    ) -> Result<Vec<u32>, GenerationError> {
        if let Ok(mut last) = self.last_input.lock() {
            *last = input_ids.to_vec();
        }

        let mut produced = Vec::new();
        for (step, &token) in self.script.iter().take(params.max_new_tokens).enumerate() {
            if self.fail_after == Some(step) {
                return Err(GenerationError::backend(
                    "CUDA out of memory while extending the attention cache",
                ));
            }
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            self.emitted.fetch_add(1, Ordering::SeqCst);
            produced.push(token);
            if on_token(token) == StreamControl::Stop {
                break;
            }
        }
        Ok(produced)
    }

    fn context_length(&self) -> usize {
        self.context_length
    }

    fn clear_cache(&mut self) {
        self.cache_clears.fetch_add(1, Ordering::SeqCst);
    }
}

const STUB_DELAY: Duration = Duration::from_millis(25);

/// The backend served with `--stub`
pub fn stub_model() -> LoadedModel {
    StubModels::new(["stub"]).scripted("stub")
}

/// Named scripted models, for switching models without weights on disk
#[derive(Debug, Clone)]
pub struct StubModels {
    names: Vec<String>,
    delay: Duration,
}

impl StubModels {
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            delay: STUB_DELAY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn scripted(&self, name: &str) -> LoadedModel {
        let model = ScriptedModel::from_text(STUB_REPLY).with_delay(self.delay);
        LoadedModel::new(name, Box::new(model), Arc::new(CharTokenizer))
    }
}

impl ModelSource for StubModels {
    fn available(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.names.clone())
    }

    fn load(&self, name: &str) -> anyhow::Result<LoadedModel> {
        if !self.names.iter().any(|n| n == name) {
            anyhow::bail!("no stub model named {name:?}");
        }
        Ok(self.scripted(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_tokenizer_truncates_from_the_left() {
        let tokenizer = CharTokenizer;
        let ids = tokenizer.encode("hello", Some(3), true).unwrap();
        assert_eq!(tokenizer.decode(&ids).unwrap(), "llo");
    }

    #[test]
    fn test_decode_skips_eos() {
        let tokenizer = CharTokenizer;
        assert_eq!(tokenizer.decode(&[72, 0, 105]).unwrap(), "Hi");
    }

    #[test]
    fn test_scripted_model_stops_on_request() {
        let mut model = ScriptedModel::from_text("abcdef");
        let mut seen = 0;
        let produced = model
            .generate(&[], &GenerationParams::default(), &mut |_| {
                seen += 1;
                if seen == 2 {
                    StreamControl::Stop
                } else {
                    StreamControl::Continue
                }
            })
            .unwrap();
        assert_eq!(produced, CharTokenizer::ids("ab"));
    }

    #[test]
    fn test_stub_model_fits_default_budget() {
        let loaded = stub_model();
        assert_eq!(loaded.name, "stub");
        assert!(loaded.max_prompt_length(200) > 0);
    }

    #[test]
    fn test_stub_models_load_by_name() {
        let source = StubModels::new(["opt-stub", "galactica-stub"]);
        assert_eq!(source.available().unwrap(), vec!["opt-stub", "galactica-stub"]);
        assert_eq!(source.load("galactica-stub").unwrap().name, "galactica-stub");
        assert!(source.load("llama").is_err());
    }
}
