//! Request and response bodies of the JSON API

use crate::services::ml::params::{GenerationParams, ParamOverrides};
use crate::types::errors::AppError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Start a streamed generation for a browser session
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub session_id: String,
    pub prompt: String,
    pub preset: Option<String>,
    #[serde(flatten)]
    pub overrides: ParamOverrides,
}

#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
    pub preset: Option<String>,
    #[serde(flatten)]
    pub overrides: ParamOverrides,
}

/// Single-shot generation, either named fields or the positional `data` array
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TextgenRequest {
    Positional {
        data: Vec<Value>,
    },
    Named {
        prompt: String,
        preset: Option<String>,
        stopping_string: Option<String>,
        #[serde(flatten)]
        overrides: ParamOverrides,
    },
}

/// Order of the positional `data` array after the prompt
const POSITIONAL_FIELDS: &[&str] = &[
    "max_new_tokens",
    "do_sample",
    "temperature",
    "top_p",
    "typical_p",
    "repetition_penalty",
    "encoder_repetition_penalty",
    "top_k",
    "min_length",
    "no_repeat_ngram_size",
    "num_beams",
    "penalty_alpha",
    "length_penalty",
    "early_stopping",
    "seed",
];

/// Prompt and parameter overrides of a positional request
pub fn parse_positional(data: &[Value]) -> Result<(String, ParamOverrides), AppError> {
    let prompt = data
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::BadRequest("data[0] must be the prompt string".into()))?
        .to_string();

    let fields: serde_json::Map<String, Value> = POSITIONAL_FIELDS
        .iter()
        .zip(data.iter().skip(1))
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect();
    let overrides = from_value(Value::Object(fields))?;
    Ok((prompt, overrides))
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, AppError> {
    serde_json::from_value(value).map_err(|e| AppError::BadRequest(e.to_string()))
}

#[derive(Debug, Serialize)]
pub struct TextgenResponse {
    /// `[text, secondary, html]`
    pub data: [String; 3],
}

#[derive(Debug, Serialize)]
pub struct PresetResponse {
    pub name: String,
    pub params: GenerationParams,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub current: String,
    pub available: Vec<String>,
}
