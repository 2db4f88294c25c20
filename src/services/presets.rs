//! Named parameter presets stored as `presets/<name>.txt`
//!
//! Each line holds `key=value`, optionally followed by a comma. Booleans use
//! `True`/`False`. The `tokens` key is ignored.

use crate::services::ml::params::{GenerationParams, MAX_TEMPERATURE};
use crate::types::errors::GenerationError;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PresetStore {
    dir: PathBuf,
}

impl PresetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Preset names, sorted case-insensitively
    pub fn list(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            tracing::warn!("Preset directory {} is not readable", self.dir.display());
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "txt"))
            .filter_map(|path| path.file_stem()?.to_str().map(str::to_string))
            .collect();
        names.sort_by_key(|name| name.to_lowercase());
        names.dedup();
        names
    }

    pub fn load(&self, name: &str) -> Result<GenerationParams, GenerationError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(GenerationError::Preset(format!("invalid preset name {name:?}")));
        }
        let path = self.dir.join(format!("{name}.txt"));
        let text = std::fs::read_to_string(&path)
            .map_err(|e| GenerationError::Preset(format!("cannot read {}: {e}", path.display())))?;
        let params = parse_preset(&text)?;
        tracing::debug!("Loaded preset {:?}: {:?}", name, params);
        Ok(params)
    }
}

pub fn parse_preset(text: &str) -> Result<GenerationParams, GenerationError> {
    let mut params = GenerationParams::default();
    for line in text.lines() {
        let line = line.trim().trim_end_matches(',').trim();
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        if key == "tokens" || value.contains('=') {
            continue;
        }
        if !params.set(key, value)? {
            tracing::warn!("Ignoring unknown preset key {:?}", key);
        }
    }
    params.temperature = params.temperature.min(MAX_TEMPERATURE);
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_trailing_commas() {
        let params = parse_preset(
            "do_sample=True,\ntop_p=0.18,\ntop_k=30,\ntemperature=2.0,\ntokens=200,\nrepetition_penalty=1.15,\n",
        )
        .unwrap();
        assert!(params.do_sample);
        assert_eq!(params.top_p, 0.18);
        assert_eq!(params.top_k, 30);
        assert_eq!(params.temperature, MAX_TEMPERATURE);
        assert_eq!(params.repetition_penalty, 1.15);
        assert_eq!(params.max_new_tokens, GenerationParams::default().max_new_tokens);
    }

    #[test]
    fn test_unparsable_value_is_an_error() {
        assert!(matches!(
            parse_preset("top_k=many"),
            Err(GenerationError::Preset(_))
        ));
    }

    #[test]
    fn test_shipped_presets_load() {
        let store = PresetStore::new(concat!(env!("CARGO_MANIFEST_DIR"), "/presets"));
        let names = store.list();
        assert!(names.contains(&"NovelAI-Sphinx Moth".to_string()));
        assert!(names.contains(&"Default".to_string()));
        for name in names {
            let params = store.load(&name).unwrap();
            assert!(params.validated().is_ok(), "{name}");
        }
    }

    #[test]
    fn test_rejects_path_traversal() {
        let store = PresetStore::new("presets");
        assert!(store.load("../Cargo").is_err());
        assert!(store.load("").is_err());
    }
}
