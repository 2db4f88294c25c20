use crate::config::InterfaceMode;
use crate::services::template::PageContext;
use crate::state::AppState;
use crate::types::errors::AppError;
use axum::{extract::State, response::Html};

pub async fn index(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let generator = state.generator().await;
    let model_name = generator.model_name();
    let mode = match state.config.mode() {
        InterfaceMode::Default => "default",
        InterfaceMode::Notebook => "notebook",
        InterfaceMode::Chat => "chat",
    };
    let presets = state.presets.list();
    let preset = state.settings.default_preset(model_name);
    let prompt = state.settings.default_prompt(model_name);
    let extensions = generator.extensions().names();
    let models = state.model_menu(model_name);

    let html = state.templates.render_index(&PageContext {
        mode,
        model_name,
        models: &models,
        presets: &presets,
        preset: &preset,
        prompt: &prompt,
        max_new_tokens: state.settings.max_new_tokens,
        max_new_tokens_min: state.settings.max_new_tokens_min,
        max_new_tokens_max: state.settings.max_new_tokens_max,
        stream: state.streaming(),
        extensions: &extensions,
    })?;
    Ok(Html(html))
}
