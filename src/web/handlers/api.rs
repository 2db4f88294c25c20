//! Text generation, stop and preset endpoints

use crate::services::ml::generation::{GenerationRequest, ReplyStream};
use crate::state::AppState;
use crate::types::errors::{AppError, GenerationError};
use crate::types::events::StreamEvent;
use crate::types::message::{
    parse_positional, GenerateRequest, PresetResponse, SessionRequest, StatusResponse,
    TextgenRequest, TextgenResponse,
};
use crate::web::sse::publish;
use axum::{
    extract::{Path, State},
    response::Json,
};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

/// Start generating for a session; updates arrive on its SSE stream
pub async fn generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    tracing::info!("Generate request for session: {}", req.session_id);
    if state.config.verbose {
        tracing::info!("[GENERATION] Prompt:\n{}", req.prompt);
    }
    let generator = state.generator().await;
    let params = state.resolve_params(generator.model_name(), req.preset.as_deref(), &req.overrides)?;
    let request = GenerationRequest::new(req.prompt, params).streaming(state.streaming());

    state.preempt(&req.session_id, &generator).await;
    let (ticket, sender) = {
        let mut sessions = state.sessions.write().await;
        (sessions.begin_generation(&req.session_id), sessions.sender(&req.session_id))
    };

    let updates = match generator.generate_reply(request, ticket.token.clone()) {
        Ok(updates) => updates,
        Err(e) => {
            state
                .sessions
                .write()
                .await
                .finish_generation(&req.session_id, &ticket);
            return Err(e.into());
        }
    };

    let session_id = req.session_id.clone();
    tokio::spawn(async move {
        forward_updates(updates, &sender).await;
        state
            .sessions
            .write()
            .await
            .finish_generation(&session_id, &ticket);
    });

    Ok(Json(StatusResponse {
        status: "started",
        session_id: req.session_id,
    }))
}

async fn forward_updates(mut updates: ReplyStream, sender: &tokio::sync::mpsc::Sender<StreamEvent>) {
    while let Some(update) = updates.next().await {
        let event = match update {
            Ok(update) => StreamEvent::reply(&update),
            Err(e) => {
                tracing::error!("[GENERATION] Failed: {}", e);
                StreamEvent::error(e.to_string())
            }
        };
        let terminal = event.is_terminal();
        if !publish(sender, event).await {
            tracing::debug!("SSE client went away, abandoning generation");
            break;
        }
        if terminal {
            break;
        }
    }
}

/// Cancel the session's running generation
pub async fn stop(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> Json<StatusResponse> {
    let stopped = state.sessions.write().await.stop(&req.session_id);
    tracing::info!("Stop request for session {}: {}", req.session_id, stopped);
    Json(StatusResponse {
        status: if stopped { "stopped" } else { "idle" },
        session_id: req.session_id,
    })
}

/// Single-shot generation returning `[text, secondary, html]`
pub async fn textgen(
    State(state): State<AppState>,
    Json(req): Json<TextgenRequest>,
) -> Result<Json<TextgenResponse>, AppError> {
    let (prompt, preset, stopping_string, overrides) = match req {
        TextgenRequest::Positional { data } => {
            let (prompt, overrides) = parse_positional(&data)?;
            (prompt, None, None, overrides)
        }
        TextgenRequest::Named {
            prompt,
            preset,
            stopping_string,
            overrides,
        } => (prompt, preset, stopping_string, overrides),
    };
    let generator = state.generator().await;
    let params = state.resolve_params(generator.model_name(), preset.as_deref(), &overrides)?;

    let mut request = GenerationRequest::new(prompt, params).streaming(false);
    if let Some(stop) = stopping_string.filter(|s| !s.is_empty()) {
        request = request.with_stopping_string(stop);
    }

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let mut updates = generator.generate_reply(request, cancel)?;
    let mut last = None;
    while let Some(update) = updates.next().await {
        last = Some(update?);
    }
    let update = last.ok_or(GenerationError::WorkerPanicked)?;

    Ok(Json(TextgenResponse {
        data: [
            update.display.text,
            update.display.secondary,
            update.display.html,
        ],
    }))
}

pub async fn list_presets(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.presets.list())
}

pub async fn get_preset(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<PresetResponse>, AppError> {
    let params = state.presets.load(&name)?;
    Ok(Json(PresetResponse { name, params }))
}
