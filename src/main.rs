use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use textgen_webui::config::{Config, InterfaceMode, Settings};
use textgen_webui::services::ml::backend::{LoadedModel, ModelSource};
use textgen_webui::services::ml::official::{resolve_model_name, ModelDirectory};
use textgen_webui::services::ml::stub::{stub_model, StubModels};
use textgen_webui::services::{ExtensionRegistry, MetricsService, TextGenerator};
use textgen_webui::{web, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "textgen_webui=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🚀 Starting text generation web UI");

    let config = Config::parse();
    let settings = Settings::load(config.settings.as_deref())?;

    let directory = ModelDirectory::new(&config.model_dir, config.cpu);
    let (model, models): (LoadedModel, Arc<dyn ModelSource>) =
        match load_configured_model(&config, &directory) {
            Ok(model) => (model, Arc::new(directory)),
            Err(e) if config.stub => {
                tracing::error!("⚠️ Model loading failed: {:#}", e);
                tracing::info!("🧪 Serving the stub backend instead");
                let models: Arc<dyn ModelSource> = if directory.available().is_ok() {
                    Arc::new(directory)
                } else {
                    Arc::new(StubModels::new(["stub"]))
                };
                (stub_model(), models)
            }
            Err(e) => return Err(e),
        };

    let mut extension_names = config.extensions.clone();
    let defaults = match config.mode() {
        InterfaceMode::Chat => &settings.chat_default_extensions,
        _ => &settings.default_extensions,
    };
    for name in defaults {
        if !extension_names.contains(name) {
            extension_names.push(name.clone());
        }
    }
    let extensions = Arc::new(ExtensionRegistry::from_names(&extension_names));
    if !extensions.is_empty() {
        tracing::info!("🧩 Extensions: {}", extensions.names().join(", "));
    }

    let metrics = Arc::new(MetricsService::new());
    let generator = TextGenerator::new(model, extensions, metrics.clone());
    let state = AppState::new(config, settings, generator, models, metrics)?;

    web::start_server(state).await?;

    Ok(())
}

fn load_configured_model(config: &Config, directory: &ModelDirectory) -> Result<LoadedModel> {
    let available = directory.available()?;
    let name = resolve_model_name(config.model.as_deref(), &available)?;
    tracing::info!("📦 Loading {}...", name);
    directory.load(&name)
}
