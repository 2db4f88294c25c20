//! Chat mode endpoints; each returns the rendered transcript

use crate::services::chat::{chat_reply, ChatSettings, ChatStream};
use crate::services::ml::params::ParamOverrides;
use crate::services::session::Ticket;
use crate::services::TextGenerator;
use crate::state::AppState;
use crate::types::errors::AppError;
use crate::types::events::StreamEvent;
use crate::types::message::{ChatRequest, SessionRequest};
use crate::web::sse::publish;
use axum::{extract::State, response::Html, Json};
use futures::StreamExt;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct RegenerateRequest {
    pub session_id: String,
    pub preset: Option<String>,
    #[serde(flatten)]
    pub overrides: ParamOverrides,
}

pub async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Html<String>, AppError> {
    tracing::info!("Received chat message for session: {}", req.session_id);
    if req.message.trim().is_empty() {
        return Err(AppError::BadRequest("message is empty".into()));
    }
    let reply = ReplyTarget {
        session_id: &req.session_id,
        user_input: req.message,
        replace_last: false,
    };
    start_reply(&state, reply, req.preset.as_deref(), &req.overrides).await
}

/// Generate the last reply again from the same user message
pub async fn regenerate(
    State(state): State<AppState>,
    Json(req): Json<RegenerateRequest>,
) -> Result<Html<String>, AppError> {
    let last_input = {
        let sessions = state.sessions.read().await;
        let last = sessions
            .get(&req.session_id)
            .and_then(|session| session.history.turns().last())
            .map(|turn| turn.user.clone());
        last
    };
    let Some(user_input) = last_input else {
        return Err(AppError::BadRequest("nothing to regenerate".into()));
    };
    let reply = ReplyTarget {
        session_id: &req.session_id,
        user_input,
        replace_last: true,
    };
    start_reply(&state, reply, req.preset.as_deref(), &req.overrides).await
}

pub async fn remove_last(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> Result<Html<String>, AppError> {
    let generator = state.generator().await;
    let mut sessions = state.sessions.write().await;
    sessions.stop(&req.session_id);
    if let Some(session) = sessions.get_mut(&req.session_id) {
        session.history.remove_last();
    }
    drop(sessions);
    transcript(&state, &req.session_id, &chat_settings(&state, &generator)).await
}

pub async fn clear_history(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> Result<Html<String>, AppError> {
    let generator = state.generator().await;
    let mut sessions = state.sessions.write().await;
    sessions.stop(&req.session_id);
    sessions.get_or_create(&req.session_id).history.clear();
    drop(sessions);
    transcript(&state, &req.session_id, &chat_settings(&state, &generator)).await
}

pub async fn history(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> Result<Html<String>, AppError> {
    let generator = state.generator().await;
    transcript(&state, &req.session_id, &chat_settings(&state, &generator)).await
}

fn chat_settings(state: &AppState, generator: &TextGenerator) -> ChatSettings {
    state.settings.chat_settings(generator.model_name())
}

async fn transcript(
    state: &AppState,
    session_id: &str,
    settings: &ChatSettings,
) -> Result<Html<String>, AppError> {
    render(state, session_id, settings).await.map(Html)
}

async fn render(
    state: &AppState,
    session_id: &str,
    settings: &ChatSettings,
) -> Result<String, AppError> {
    let sessions = state.sessions.read().await;
    let turns = sessions
        .get(session_id)
        .map(|session| session.history.turns())
        .unwrap_or_default();
    Ok(state
        .templates
        .render_chat(turns, &settings.name1, &settings.name2)?)
}

/// Which turn a new reply belongs to
struct ReplyTarget<'a> {
    session_id: &'a str,
    user_input: String,
    /// Regenerate: the last turn is replaced once generation has started
    replace_last: bool,
}

async fn start_reply(
    state: &AppState,
    target: ReplyTarget<'_>,
    preset: Option<&str>,
    overrides: &ParamOverrides,
) -> Result<Html<String>, AppError> {
    let session_id = target.session_id;
    let generator = state.generator().await;
    let params = state.resolve_params(generator.model_name(), preset, overrides)?;
    let settings = chat_settings(state, &generator);

    state.preempt(session_id, &generator).await;
    let (ticket, sender, stream, turn_id) = {
        let mut sessions = state.sessions.write().await;
        let ticket = sessions.begin_generation(session_id);
        let sender = sessions.sender(session_id);
        let session = sessions.get_or_create(session_id);
        let turns = session.history.turns();
        let context = if target.replace_last {
            &turns[..turns.len().saturating_sub(1)]
        } else {
            turns
        };
        let stream = match chat_reply(
            &generator,
            context,
            &target.user_input,
            &settings,
            params,
            ticket.token.clone(),
        ) {
            Ok(stream) => stream,
            Err(e) => {
                sessions.finish_generation(session_id, &ticket);
                return Err(e.into());
            }
        };
        if target.replace_last {
            session.history.remove_last();
        }
        let turn_id = session.history.start_turn(target.user_input);
        (ticket, sender, stream, turn_id)
    };

    let html = render(state, session_id, &settings).await?;
    tokio::spawn(forward_replies(
        state.clone(),
        session_id.to_string(),
        ticket,
        turn_id,
        stream,
        settings,
        sender,
    ));
    Ok(Html(html))
}

async fn forward_replies(
    state: AppState,
    session_id: String,
    ticket: Ticket,
    turn_id: Uuid,
    mut stream: ChatStream,
    settings: ChatSettings,
    sender: tokio::sync::mpsc::Sender<StreamEvent>,
) {
    let mut finished = false;
    while let Some(reply) = stream.next().await {
        let event = match reply {
            Ok(reply) => {
                if let Some(session) = state.sessions.write().await.get_mut(&session_id) {
                    session.history.update_reply(turn_id, &reply);
                }
                match render(&state, &session_id, &settings).await {
                    Ok(html) => StreamEvent::chat(html, reply.done),
                    Err(e) => StreamEvent::error(e.to_string()),
                }
            }
            Err(e) => {
                tracing::error!("[CHAT] Generation failed: {}", e);
                StreamEvent::error(e.to_string())
            }
        };
        finished = event.is_terminal();
        if !publish(&sender, event).await || finished {
            break;
        }
    }
    if !finished {
        if let Ok(html) = render(&state, &session_id, &settings).await {
            publish(&sender, StreamEvent::chat(html, true)).await;
        }
    }
    state
        .sessions
        .write()
        .await
        .finish_generation(&session_id, &ticket);
}
