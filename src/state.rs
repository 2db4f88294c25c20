use crate::config::{Config, Settings};
use crate::services::ml::backend::ModelSource;
use crate::services::ml::params::{GenerationParams, ParamOverrides};
use crate::services::template::TemplateEngine;
use crate::services::{MetricsService, PresetStore, SessionManager, TextGenerator};
use crate::types::errors::{AppError, GenerationError};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// How long a restart waits for the cancelled generation to let go of the model
const PREEMPT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub settings: Arc<Settings>,
    generator: Arc<RwLock<TextGenerator>>,
    pub models: Arc<dyn ModelSource>,
    pub presets: PresetStore,
    pub sessions: Arc<RwLock<SessionManager>>,
    pub templates: Arc<TemplateEngine>,
    pub metrics: Arc<MetricsService>,
}

impl AppState {
    pub fn new(
        config: Config,
        settings: Settings,
        generator: TextGenerator,
        models: Arc<dyn ModelSource>,
        metrics: Arc<MetricsService>,
    ) -> Result<Self> {
        tracing::info!("[STATE] Initializing AppState...");
        tracing::info!("[STATE]   Model: {}", generator.model_name());
        tracing::info!("[STATE]   Presets: {}", config.preset_dir.display());
        tracing::info!("[STATE]   Mode: {:?}", config.mode());

        let presets = PresetStore::new(config.preset_dir.clone());
        let templates = TemplateEngine::new()?;

        Ok(Self {
            config: Arc::new(config),
            settings: Arc::new(settings),
            generator: Arc::new(RwLock::new(generator)),
            models,
            presets,
            sessions: Arc::new(RwLock::new(SessionManager::new())),
            templates: Arc::new(templates),
            metrics,
        })
    }

    /// The generator for the currently loaded model.
    ///
    /// Take it before locking `sessions`; a model switch holds the
    /// generator lock while it stops sessions.
    pub async fn generator(&self) -> TextGenerator {
        self.generator.read().await.clone()
    }

    /// Cancel the session's running generation and wait until the model is free
    pub async fn preempt(&self, session_id: &str, generator: &TextGenerator) {
        let was_running = self.sessions.write().await.stop(session_id);
        if was_running {
            tracing::debug!("Preempting the running generation of session {}", session_id);
            if generator.lock_idle(PREEMPT_TIMEOUT).await.is_none() {
                tracing::warn!(
                    "Generation of session {} did not stop within {:?}",
                    session_id,
                    PREEMPT_TIMEOUT
                );
            }
        }
    }

    /// Models that can be switched to, with the loaded one always listed
    pub fn model_menu(&self, current: &str) -> Vec<String> {
        let mut models = self.models.available().unwrap_or_else(|e| {
            tracing::warn!("Cannot list models: {:#}", e);
            Vec::new()
        });
        if !models.iter().any(|name| name == current) {
            models.insert(0, current.to_string());
        }
        models
    }

    /// Replace the loaded model, stopping every running generation first.
    ///
    /// The previous model stays in service if loading fails.
    pub async fn switch_model(&self, name: &str) -> Result<String, AppError> {
        let mut generator = self.generator.write().await;
        if generator.model_name() == name {
            return Ok(name.to_string());
        }
        let available = self.models.available()?;
        if !available.iter().any(|candidate| candidate == name) {
            return Err(AppError::ModelNotFound(name.to_string()));
        }

        let stopped = self.sessions.write().await.stop_all();
        tracing::info!(
            "📦 Switching from {} to {} ({} generations stopped)",
            generator.model_name(),
            name,
            stopped
        );
        let mut idle = generator
            .lock_idle(PREEMPT_TIMEOUT)
            .await
            .ok_or(GenerationError::Busy)?;
        idle.clear_cache();

        let models = self.models.clone();
        let owned = name.to_string();
        let loaded = tokio::task::spawn_blocking(move || models.load(&owned))
            .await
            .map_err(|e| anyhow!("model loader panicked: {e}"))??;
        drop(idle);

        let next = generator.with_model(loaded);
        *generator = next;
        tracing::info!("✅ Now serving {}", name);
        Ok(name.to_string())
    }

    /// Preset (or the model's default preset) with request overrides on top
    pub fn resolve_params(
        &self,
        model_name: &str,
        preset: Option<&str>,
        overrides: &ParamOverrides,
    ) -> Result<GenerationParams, GenerationError> {
        let mut params = match preset.filter(|name| !name.is_empty()) {
            Some(name) => self.presets.load(name)?,
            None => {
                let name = self.settings.default_preset(model_name);
                self.presets.load(&name).unwrap_or_else(|e| {
                    tracing::warn!("Falling back to default parameters: {}", e);
                    GenerationParams::default()
                })
            }
        };
        params.max_new_tokens = self.settings.max_new_tokens;
        let mut params = params.merge(overrides);
        params.max_new_tokens = self.settings.clamp_max_new_tokens(params.max_new_tokens);
        params.validated()
    }

    pub fn streaming(&self) -> bool {
        !self.config.no_stream
    }
}
