//! Typed generation parameters

use crate::types::errors::GenerationError;
use serde::{Deserialize, Serialize};

/// Highest temperature a preset may request
pub const MAX_TEMPERATURE: f64 = 1.99;

/// Every sampling and search knob the UI exposes.
///
/// Backends honour what they support and ignore the rest; see
/// [`GenerationParams::unsupported_by_sampler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub max_new_tokens: usize,
    pub do_sample: bool,
    pub temperature: f64,
    pub top_p: f64,
    pub typical_p: f64,
    pub repetition_penalty: f64,
    pub encoder_repetition_penalty: f64,
    pub top_k: usize,
    pub min_length: usize,
    pub no_repeat_ngram_size: usize,
    pub num_beams: usize,
    pub penalty_alpha: f64,
    pub length_penalty: f64,
    pub early_stopping: bool,
    /// -1 picks a random seed per generation
    pub seed: i64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 200,
            do_sample: true,
            temperature: 1.0,
            top_p: 1.0,
            typical_p: 1.0,
            repetition_penalty: 1.0,
            encoder_repetition_penalty: 1.0,
            top_k: 50,
            min_length: 0,
            no_repeat_ngram_size: 0,
            num_beams: 1,
            penalty_alpha: 0.0,
            length_penalty: 1.0,
            early_stopping: false,
            seed: -1,
        }
    }
}

/// Partial parameter set submitted by a form or API call
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParamOverrides {
    pub max_new_tokens: Option<usize>,
    pub do_sample: Option<bool>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub typical_p: Option<f64>,
    pub repetition_penalty: Option<f64>,
    pub encoder_repetition_penalty: Option<f64>,
    pub top_k: Option<usize>,
    pub min_length: Option<usize>,
    pub no_repeat_ngram_size: Option<usize>,
    pub num_beams: Option<usize>,
    pub penalty_alpha: Option<f64>,
    pub length_penalty: Option<f64>,
    pub early_stopping: Option<bool>,
    pub seed: Option<i64>,
}

impl GenerationParams {
    /// Check ranges and clamp temperature, returning the usable parameter set
    pub fn validated(mut self) -> Result<Self, GenerationError> {
        if self.max_new_tokens == 0 {
            return Err(GenerationError::InvalidParams(
                "max_new_tokens must be at least 1".into(),
            ));
        }
        if self.temperature.is_nan() || (self.do_sample && self.temperature <= 0.0) {
            return Err(GenerationError::InvalidParams(format!(
                "temperature must be positive when sampling, got {}",
                self.temperature
            )));
        }
        self.temperature = self.temperature.min(MAX_TEMPERATURE);

        for (name, value) in [("top_p", self.top_p), ("typical_p", self.typical_p)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(GenerationError::InvalidParams(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.repetition_penalty.is_nan() || self.repetition_penalty <= 0.0 {
            return Err(GenerationError::InvalidParams(format!(
                "repetition_penalty must be positive, got {}",
                self.repetition_penalty
            )));
        }
        if self.num_beams == 0 {
            return Err(GenerationError::InvalidParams(
                "num_beams must be at least 1".into(),
            ));
        }
        Ok(self)
    }

    /// Apply the fields present in `overrides`
    pub fn merge(mut self, overrides: &ParamOverrides) -> Self {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if let Some(value) = overrides.$field { self.$field = value; })*
            };
        }
        take!(
            max_new_tokens,
            do_sample,
            temperature,
            top_p,
            typical_p,
            repetition_penalty,
            encoder_repetition_penalty,
            top_k,
            min_length,
            no_repeat_ngram_size,
            num_beams,
            penalty_alpha,
            length_penalty,
            early_stopping,
            seed
        );
        self
    }

    /// Set a field from its textual preset form. Returns `Ok(false)` for unknown keys.
    pub fn set(&mut self, key: &str, value: &str) -> Result<bool, GenerationError> {
        fn num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, GenerationError> {
            value.parse().map_err(|_| {
                GenerationError::Preset(format!("invalid value for {key}: {value:?}"))
            })
        }
        fn flag(key: &str, value: &str) -> Result<bool, GenerationError> {
            match value {
                "True" | "true" | "1" => Ok(true),
                "False" | "false" | "0" => Ok(false),
                _ => Err(GenerationError::Preset(format!(
                    "invalid value for {key}: {value:?}"
                ))),
            }
        }

        match key {
            "max_new_tokens" => self.max_new_tokens = num(key, value)?,
            "do_sample" => self.do_sample = flag(key, value)?,
            "temperature" => self.temperature = num(key, value)?,
            "top_p" => self.top_p = num(key, value)?,
            "typical_p" => self.typical_p = num(key, value)?,
            "repetition_penalty" => self.repetition_penalty = num(key, value)?,
            "encoder_repetition_penalty" => self.encoder_repetition_penalty = num(key, value)?,
            "top_k" => self.top_k = num(key, value)?,
            "min_length" => self.min_length = num(key, value)?,
            "no_repeat_ngram_size" => self.no_repeat_ngram_size = num(key, value)?,
            "num_beams" => self.num_beams = num(key, value)?,
            "penalty_alpha" => self.penalty_alpha = num(key, value)?,
            "length_penalty" => self.length_penalty = num(key, value)?,
            "early_stopping" => self.early_stopping = flag(key, value)?,
            "seed" => self.seed = num(key, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Seed for the sampler; negative seeds draw a fresh random one
    pub fn resolved_seed(&self) -> u64 {
        if self.seed < 0 {
            rand::random()
        } else {
            self.seed as u64
        }
    }

    /// Knobs set to non-default values that a plain token sampler cannot honour
    pub fn unsupported_by_sampler(&self) -> Vec<&'static str> {
        let mut ignored = Vec::new();
        if self.num_beams > 1 {
            ignored.push("num_beams");
        }
        if self.typical_p < 1.0 {
            ignored.push("typical_p");
        }
        if self.penalty_alpha > 0.0 {
            ignored.push("penalty_alpha");
        }
        if self.encoder_repetition_penalty != 1.0 {
            ignored.push("encoder_repetition_penalty");
        }
        if self.length_penalty != 1.0 && self.num_beams > 1 {
            ignored.push("length_penalty");
        }
        ignored
    }
}
