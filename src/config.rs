use crate::services::chat::ChatSettings;
use anyhow::Context;
use clap::Parser;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Command line flags, each with a `TEXTGEN_*` environment fallback
#[derive(Debug, Clone, Parser)]
#[command(name = "textgen-webui")]
#[command(about = "Web UI for running large language models locally")]
#[command(version)]
pub struct Config {
    /// Name of the model to load, a subdirectory of --model-dir
    #[arg(long, env = "TEXTGEN_MODEL")]
    pub model: Option<String>,

    #[arg(long, env = "TEXTGEN_MODEL_DIR", default_value = "models")]
    pub model_dir: PathBuf,

    #[arg(long, env = "TEXTGEN_PRESET_DIR", default_value = "presets")]
    pub preset_dir: PathBuf,

    /// Use the CPU even when an accelerator is available
    #[arg(long, env = "TEXTGEN_CPU")]
    pub cpu: bool,

    /// Output is written to the same text box as the input
    #[arg(long, env = "TEXTGEN_NOTEBOOK", conflicts_with = "chat")]
    pub notebook: bool,

    #[arg(long, env = "TEXTGEN_CHAT")]
    pub chat: bool,

    /// Send only the final text instead of streaming it
    #[arg(long, env = "TEXTGEN_NO_STREAM")]
    pub no_stream: bool,

    /// Extensions to load, comma separated
    #[arg(long, env = "TEXTGEN_EXTENSIONS", value_delimiter = ',')]
    pub extensions: Vec<String>,

    /// Listen on 0.0.0.0 instead of 127.0.0.1
    #[arg(long, env = "TEXTGEN_LISTEN")]
    pub listen: bool,

    #[arg(long, env = "TEXTGEN_LISTEN_PORT", default_value_t = 7860)]
    pub listen_port: u16,

    /// JSON file with interface defaults, see settings-template.json
    #[arg(long, env = "TEXTGEN_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Print prompts to the log
    #[arg(long, env = "TEXTGEN_VERBOSE")]
    pub verbose: bool,

    /// Serve the scripted stub model when no real model can be loaded
    #[arg(long, env = "TEXTGEN_STUB")]
    pub stub: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceMode {
    Default,
    Notebook,
    Chat,
}

impl Config {
    pub fn mode(&self) -> InterfaceMode {
        if self.chat {
            InterfaceMode::Chat
        } else if self.notebook {
            InterfaceMode::Notebook
        } else {
            InterfaceMode::Default
        }
    }

    pub fn host(&self) -> &'static str {
        if self.listen {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        }
    }
}

/// Interface defaults, overridable through `settings.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub max_new_tokens: usize,
    pub max_new_tokens_min: usize,
    pub max_new_tokens_max: usize,
    pub name1: String,
    pub name2: String,
    pub context: String,
    pub stop_at_newline: bool,
    pub chat_prompt_size: usize,
    pub chat_prompt_size_min: usize,
    pub chat_prompt_size_max: usize,
    pub name1_pygmalion: String,
    pub name2_pygmalion: String,
    pub context_pygmalion: String,
    pub stop_at_newline_pygmalion: bool,
    /// Model-name pattern to preset name; `default` is the fallback
    pub presets: BTreeMap<String, String>,
    /// Model-name pattern to initial prompt; `default` is the fallback
    pub prompts: BTreeMap<String, String>,
    pub default_extensions: Vec<String>,
    pub chat_default_extensions: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_new_tokens: 200,
            max_new_tokens_min: 1,
            max_new_tokens_max: 2000,
            name1: "Person 1".into(),
            name2: "Person 2".into(),
            context: "This is a conversation between two people.".into(),
            stop_at_newline: true,
            chat_prompt_size: 2048,
            chat_prompt_size_min: 0,
            chat_prompt_size_max: 2048,
            name1_pygmalion: "You".into(),
            name2_pygmalion: "Kawaii".into(),
            context_pygmalion: "Kawaii's persona: Kawaii is a cheerful person who loves to make others smile. She is an optimist who loves to spread happiness and positivity wherever she goes.\n<START>".into(),
            stop_at_newline_pygmalion: false,
            presets: BTreeMap::from([
                ("default".into(), "NovelAI-Sphinx Moth".into()),
                ("pygmalion-*".into(), "Pygmalion".into()),
            ]),
            prompts: BTreeMap::from([
                (
                    "default".into(),
                    "Common sense questions and answers\n\nQuestion: \nFactual answer:".into(),
                ),
                (
                    "^(gpt4chan|gpt-4chan|4chan)".into(),
                    "-----\n--- 865467536\nInput text\n--- 865467537\n".into(),
                ),
            ]),
            default_extensions: Vec::new(),
            chat_default_extensions: vec!["character_bias".into()],
        }
    }
}

impl Settings {
    /// Reads `path`, else `settings.json` in the working directory, else defaults
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) if path.exists() => Some(path.to_path_buf()),
            Some(path) => {
                tracing::warn!("Settings file {} not found", path.display());
                None
            }
            None => Some(PathBuf::from("settings.json")).filter(|p| p.exists()),
        };
        let Some(file) = file else {
            return Ok(Self::default());
        };
        tracing::info!("Loading settings from {}...", file.display());
        let text = std::fs::read_to_string(&file)
            .with_context(|| format!("reading {}", file.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", file.display()))
    }

    /// Chat defaults, with the pygmalion variants for pygmalion models
    pub fn chat_settings(&self, model_name: &str) -> ChatSettings {
        let pygmalion = model_name.to_lowercase().contains("pygmalion");
        let pick = |plain: &String, variant: &String| {
            let chosen = if pygmalion { variant } else { plain };
            chosen.clone()
        };
        ChatSettings {
            name1: pick(&self.name1, &self.name1_pygmalion),
            name2: pick(&self.name2, &self.name2_pygmalion),
            context: pick(&self.context, &self.context_pygmalion),
            stop_at_newline: if pygmalion {
                self.stop_at_newline_pygmalion
            } else {
                self.stop_at_newline
            },
            chat_prompt_size: self.chat_prompt_size,
        }
    }

    pub fn default_preset(&self, model_name: &str) -> String {
        lookup(&self.presets, model_name)
    }

    pub fn default_prompt(&self, model_name: &str) -> String {
        lookup(&self.prompts, model_name)
    }

    pub fn clamp_max_new_tokens(&self, value: usize) -> usize {
        value.clamp(self.max_new_tokens_min, self.max_new_tokens_max)
    }
}

/// First key matching at the start of the lowercased model name, else `default`
fn lookup(table: &BTreeMap<String, String>, model_name: &str) -> String {
    let name = model_name.to_lowercase();
    table
        .iter()
        .filter(|(key, _)| key.as_str() != "default")
        .find(|(key, _)| {
            match RegexBuilder::new(&format!("^(?:{})", key.to_lowercase())).build() {
                Ok(pattern) => pattern.is_match(&name),
                Err(e) => {
                    tracing::warn!("Ignoring settings pattern {:?}: {}", key, e);
                    false
                }
            }
        })
        .or_else(|| table.get_key_value("default"))
        .map(|(_, value)| value.clone())
        .unwrap_or_default()
}
