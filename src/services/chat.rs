//! Chat mode on top of the text generator
//!
//! The prompt is the context followed by as many `name1:`/`name2:` turns as
//! fit the prompt budget, newest kept first, ending with an open `name2:`
//! line. The reply is whatever the model writes before the user's next turn.

use crate::services::extensions::Hook;
use crate::services::ml::backend::TextTokenizer;
use crate::services::ml::generation::{GenerationRequest, TextGenerator};
use crate::services::ml::params::GenerationParams;
use crate::types::errors::GenerationError;
use async_stream::try_stream;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSettings {
    /// User's name
    pub name1: String,
    /// Bot's name
    pub name2: String,
    pub context: String,
    pub stop_at_newline: bool,
    /// Upper bound on the prompt, in tokens
    pub chat_prompt_size: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            name1: "Person 1".into(),
            name2: "Person 2".into(),
            context: "This is a conversation between two people.".into(),
            stop_at_newline: true,
            chat_prompt_size: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub id: Uuid,
    pub user: String,
    /// Reply as fed back into later prompts
    pub reply: String,
    /// Reply as shown, after placeholders and output hooks
    pub visible_reply: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatTurn {
    fn new(user: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            user,
            reply: String::new(),
            visible_reply: String::new(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatHistory {
    turns: Vec<ChatTurn>,
}

impl ChatHistory {
    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Open a new turn for `user` and return its id
    pub fn start_turn(&mut self, user: impl Into<String>) -> Uuid {
        let turn = ChatTurn::new(user.into());
        let id = turn.id;
        self.turns.push(turn);
        id
    }

    pub fn update_reply(&mut self, id: Uuid, reply: &ChatReply) {
        if let Some(turn) = self.turns.iter_mut().rev().find(|t| t.id == id) {
            turn.reply = reply.reply.clone();
            turn.visible_reply = reply.visible_reply.clone();
        }
    }

    pub fn remove_last(&mut self) -> Option<ChatTurn> {
        self.turns.pop()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// One chat increment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub visible_reply: String,
    pub done: bool,
}

fn blank_line_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("valid regex"))
}

fn user_placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(<USER>|<user>|\{\{user\}\})").expect("valid regex"))
}

/// Paragraph spacing for chat messages, trimmed
pub fn fix_newlines(text: &str) -> String {
    let text = text.replace('\n', "\n\n");
    blank_line_runs()
        .replace_all(&text, "\n\n")
        .trim()
        .to_string()
}

fn token_count(tokenizer: &dyn TextTokenizer, text: &str) -> Result<usize, GenerationError> {
    Ok(tokenizer.encode(text, None, true)?.len())
}

/// Assemble the chat prompt, dropping the oldest turns that exceed `max_length` tokens
pub fn build_prompt(
    tokenizer: &dyn TextTokenizer,
    history: &[ChatTurn],
    user_input: &str,
    settings: &ChatSettings,
    bot_prefix: &str,
    max_length: usize,
) -> Result<String, GenerationError> {
    let user_input = fix_newlines(user_input);
    let mut rows = vec![format!("{}\n", settings.context.trim())];

    for turn in history.iter().rev() {
        if token_count(tokenizer, &rows.concat())? >= max_length {
            break;
        }
        rows.insert(1, format!("{}: {}\n", settings.name2, turn.reply.trim()));
        if !turn.user.is_empty() {
            rows.insert(1, format!("{}: {}\n", settings.name1, turn.user.trim()));
        }
    }

    rows.push(format!("{}: {}\n", settings.name1, user_input));
    rows.push(bot_prefix.to_string());
    while rows.len() > 3 && token_count(tokenizer, &rows.concat())? >= max_length {
        rows.remove(1);
    }
    Ok(rows.concat())
}

/// Cut the bot's reply out of the generated continuation.
///
/// Returns the reply and whether the model already started the next turn.
pub fn extract_reply(generated: &str, asker: &str, stop_at_newline: bool) -> (String, bool) {
    if stop_at_newline {
        let mut lines = generated.split('\n');
        let first = lines.next().unwrap_or_default().trim().to_string();
        return (first, lines.next().is_some());
    }

    let next_turn = format!("\n{asker}:");
    let (mut reply, found) = match generated.find(&next_turn) {
        Some(idx) => (generated[..idx].to_string(), true),
        None => (generated.to_string(), false),
    };

    // "\nYo" generated just before "\nYou:" is complete
    for len in (1..next_turn.len()).rev() {
        if next_turn.is_char_boundary(len) && reply.ends_with(&next_turn[..len]) {
            reply.truncate(reply.len() - len);
            break;
        }
    }
    (fix_newlines(&reply), found)
}

pub type ChatStream = BoxStream<'static, Result<ChatReply, GenerationError>>;

/// Stream the bot's reply to `user_input` given the prior `history`
pub fn chat_reply(
    generator: &TextGenerator,
    history: &[ChatTurn],
    user_input: &str,
    settings: &ChatSettings,
    params: GenerationParams,
    cancel: CancellationToken,
) -> Result<ChatStream, GenerationError> {
    let visible_name1 = settings.name1.clone();
    let mut settings = settings.clone();
    if generator.model_name().to_lowercase().contains("pygmalion") {
        settings.name1 = "You".into();
    }

    let extensions = generator.extensions();
    let text = extensions.apply(Hook::Input, user_input.to_string());
    let bot_prefix = extensions.apply(Hook::BotPrefix, format!("{}:", settings.name2));
    let max_length = generator
        .max_prompt_length(params.max_new_tokens)
        .min(settings.chat_prompt_size);
    let tokenizer = generator.tokenizer();
    let prompt = build_prompt(
        tokenizer.as_ref(),
        history,
        &text,
        &settings,
        &bot_prefix,
        max_length,
    )?;
    tracing::debug!("[CHAT] Prompt:\n{}", prompt);

    let mut request = GenerationRequest::new(prompt, params)
        .without_extensions()
        .echo_prompt(false)
        .with_stopping_string(format!("\n{}:", settings.name1));
    if settings.stop_at_newline {
        request = request.with_eos_token("\n");
    }
    let mut updates = generator.generate_reply(request, cancel)?;
    let generator = generator.clone();

    Ok(try_stream! {
        while let Some(update) = updates.next().await {
            let update = update?;
            let (reply, next_turn_started) =
                extract_reply(&update.reply, &settings.name1, settings.stop_at_newline);
            let visible = user_placeholder().replace_all(&reply, NoExpand(&visible_name1)).into_owned();
            let visible_reply = generator.extensions().apply(Hook::Output, visible);
            let done = update.is_final() || next_turn_started;
            yield ChatReply { reply, visible_reply, done };
            if done {
                break;
            }
        }
    }
    .boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::extensions::ExtensionRegistry;
    use crate::services::metrics::MetricsService;
    use crate::services::ml::backend::LoadedModel;
    use crate::services::ml::stub::{CharTokenizer, ScriptedModel};
    use std::sync::Arc;

    fn settings(stop_at_newline: bool) -> ChatSettings {
        ChatSettings {
            name1: "You".into(),
            name2: "Bot".into(),
            context: "A chat.".into(),
            stop_at_newline,
            chat_prompt_size: 2048,
        }
    }

    fn turn(user: &str, reply: &str) -> ChatTurn {
        ChatTurn {
            reply: reply.into(),
            visible_reply: reply.into(),
            ..ChatTurn::new(user.into())
        }
    }

    #[test]
    fn test_prompt_layout() {
        let history = vec![turn("hi", "hello"), turn("how are you?", "fine")];
        let prompt = build_prompt(&CharTokenizer, &history, "bye", &settings(true), "Bot:", 10_000).unwrap();
        assert_eq!(
            prompt,
            "A chat.\nYou: hi\nBot: hello\nYou: how are you?\nBot: fine\nYou: bye\nBot:"
        );
    }

    #[test]
    fn test_prompt_drops_oldest_turns_first() {
        let history = vec![turn("first", "one"), turn("second", "two")];
        let full = build_prompt(&CharTokenizer, &history, "third", &settings(true), "Bot:", 10_000).unwrap();
        let budget = full.chars().count() - 5;

        let prompt = build_prompt(&CharTokenizer, &history, "third", &settings(true), "Bot:", budget).unwrap();
        assert!(prompt.chars().count() < budget);
        assert!(!prompt.contains("first"));
        assert!(prompt.contains("You: second\nBot: two\n"));
        assert!(prompt.starts_with("A chat.\n"));
        assert!(prompt.ends_with("You: third\nBot:"));
    }

    #[test]
    fn test_prompt_keeps_context_and_current_turn() {
        let history = vec![turn("old", "stuff")];
        let prompt = build_prompt(&CharTokenizer, &history, "now", &settings(true), "Bot:", 1).unwrap();
        assert_eq!(prompt, "A chat.\nYou: now\nBot:");
    }

    #[test]
    fn test_extract_stops_at_newline() {
        assert_eq!(
            extract_reply(" Sure thing.\nYou: ok", "You", true),
            ("Sure thing.".to_string(), true)
        );
        assert_eq!(extract_reply(" Partial", "You", true), ("Partial".to_string(), false));
    }

    #[test]
    fn test_extract_multiline_reply() {
        assert_eq!(
            extract_reply(" line one\nline two\nYou: next", "You", false),
            ("line one\n\nline two".to_string(), true)
        );
        // Incomplete next turn marker is trimmed
        assert_eq!(
            extract_reply(" done\nYo", "You", false),
            ("done".to_string(), false)
        );
    }

    #[test]
    fn test_history_updates() {
        let mut history = ChatHistory::default();
        let id = history.start_turn("hi");
        history.update_reply(
            id,
            &ChatReply {
                reply: "hey".into(),
                visible_reply: "<b>hey</b>".into(),
                done: true,
            },
        );
        assert_eq!(history.turns()[0].reply, "hey");
        assert_eq!(history.remove_last().unwrap().user, "hi");
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_chat_reply_stops_at_next_turn() {
        let generator = TextGenerator::new(
            LoadedModel::new(
                "opt-125m",
                Box::new(ScriptedModel::from_text(" Hello there!\nYou: and more")),
                Arc::new(CharTokenizer),
            ),
            Arc::new(ExtensionRegistry::from_names(&["character_bias"])),
            Arc::new(MetricsService::new()),
        );
        let params = GenerationParams {
            max_new_tokens: 50,
            ..Default::default()
        };

        let updates: Vec<ChatReply> = chat_reply(
            &generator,
            &[],
            "Hi",
            &settings(false),
            params,
            CancellationToken::new(),
        )
        .unwrap()
        .map(Result::unwrap)
        .collect()
        .await;

        let last = updates.last().unwrap();
        assert!(last.done);
        assert_eq!(last.reply, "Hello there!");
        assert_eq!(updates.iter().filter(|u| u.done).count(), 1);
    }
}
