//! Model discovery and loading from the models directory
//!
//! Each model lives in its own subdirectory holding one `*.gguf` file and a
//! `tokenizer.json`.

use super::device::{device_label, select_device};
use super::model::QuantizedLlama;
use super::tokenizer::HfTokenizer;
use crate::services::ml::backend::{LoadedModel, ModelSource, TextTokenizer};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const GGUF_MAGIC: [u8; 4] = *b"GGUF";

/// Names of the model subdirectories, sorted case-insensitively
pub fn discover_models(models_dir: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(models_dir)
        .with_context(|| format!("cannot read models directory {}", models_dir.display()))?;
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort_by_key(|name| name.to_lowercase());
    Ok(names)
}

/// Decide which model to load: the requested one, or the only one present
pub fn resolve_model_name(requested: Option<&str>, available: &[String]) -> Result<String> {
    match (requested, available) {
        (Some(name), _) => {
            if available.iter().any(|a| a == name) {
                Ok(name.to_string())
            } else {
                bail!("model {name:?} not found; available: {}", available.join(", "))
            }
        }
        (None, []) => bail!("no models found; place one under the models directory"),
        (None, [only]) => Ok(only.clone()),
        (None, many) => bail!(
            "several models found, choose one with --model: {}",
            many.join(", ")
        ),
    }
}

pub fn is_gguf(path: &Path) -> bool {
    let mut magic = [0u8; 4];
    std::fs::File::open(path)
        .and_then(|mut file| std::io::Read::read_exact(&mut file, &mut magic))
        .map(|_| magic == GGUF_MAGIC)
        .unwrap_or(false)
}

fn find_weights(model_dir: &Path) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(model_dir)
        .with_context(|| format!("cannot read {}", model_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "gguf"))
        .collect();
    candidates.sort();
    match candidates.into_iter().find(|path| is_gguf(path)) {
        Some(path) => Ok(path),
        None => bail!("no GGUF weights in {}", model_dir.display()),
    }
}

/// Load weights and tokenizer of `name` from `models_dir`
pub fn load_model(models_dir: &Path, name: &str, force_cpu: bool) -> Result<LoadedModel> {
    let model_dir = models_dir.join(name);
    let weights_path = find_weights(&model_dir)?;
    let tokenizer = HfTokenizer::from_file(model_dir.join("tokenizer.json"))?;

    let device = select_device(force_cpu);
    let model = QuantizedLlama::from_gguf(&weights_path, &device, tokenizer.eos_token_id())
        .with_context(|| format!("failed to load {}", weights_path.display()))?;

    tracing::info!("✅ Loaded {} on {}", name, device_label(&device));
    Ok(LoadedModel::new(name, Box::new(model), Arc::new(tokenizer)))
}

/// GGUF models in subdirectories of `--model-dir`
#[derive(Debug, Clone)]
pub struct ModelDirectory {
    pub dir: PathBuf,
    pub force_cpu: bool,
}

impl ModelDirectory {
    pub fn new(dir: impl Into<PathBuf>, force_cpu: bool) -> Self {
        Self {
            dir: dir.into(),
            force_cpu,
        }
    }
}

impl ModelSource for ModelDirectory {
    fn available(&self) -> Result<Vec<String>> {
        discover_models(&self.dir)
    }

    fn load(&self, name: &str) -> Result<LoadedModel> {
        load_model(&self.dir, name, self.force_cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("textgen-models-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_discover_lists_subdirectories() {
        let dir = scratch_dir();
        std::fs::create_dir(dir.join("opt-1.3b")).unwrap();
        std::fs::create_dir(dir.join("Galactica-125m")).unwrap();
        std::fs::write(dir.join("README.txt"), "not a model").unwrap();

        let names = discover_models(&dir).unwrap();
        assert_eq!(names, vec!["Galactica-125m", "opt-1.3b"]);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_resolve_model_name() {
        let one = vec!["opt".to_string()];
        let two = vec!["opt".to_string(), "pythia".to_string()];
        assert_eq!(resolve_model_name(None, &one).unwrap(), "opt");
        assert_eq!(resolve_model_name(Some("pythia"), &two).unwrap(), "pythia");
        assert!(resolve_model_name(None, &two).is_err());
        assert!(resolve_model_name(None, &[]).is_err());
        assert!(resolve_model_name(Some("llama"), &two).is_err());
    }

    #[test]
    fn test_gguf_magic_check() {
        let dir = scratch_dir();
        let good = dir.join("a.gguf");
        let bad = dir.join("b.gguf");
        std::fs::write(&good, b"GGUF\x03\x00\x00\x00").unwrap();
        std::fs::write(&bad, b"PK\x03\x04").unwrap();

        assert!(is_gguf(&good));
        assert!(!is_gguf(&bad));
        assert_eq!(find_weights(&dir).unwrap(), good);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_model_directory_reports_missing_weights() {
        let dir = scratch_dir();
        std::fs::create_dir(dir.join("empty-model")).unwrap();

        let source = ModelDirectory::new(&dir, true);
        assert_eq!(source.available().unwrap(), vec!["empty-model"]);
        let err = source.load("empty-model").err().unwrap();
        assert!(err.to_string().contains("no GGUF weights"));
        std::fs::remove_dir_all(dir).unwrap();
    }
}
