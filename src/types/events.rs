use crate::services::formatting::markdown_to_html;
use crate::services::ml::generation::GenerationUpdate;
use serde::Serialize;

/// Events pushed to a browser session over SSE
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Snapshot of a text generation, cumulative
    Reply {
        text: String,
        /// Secondary view rendered from markdown
        markdown_html: String,
        html: String,
        done: bool,
    },
    /// Snapshot of the chat transcript
    Chat { html: String, done: bool },
    Error { message: String },
}

impl StreamEvent {
    pub fn reply(update: &GenerationUpdate) -> Self {
        Self::Reply {
            text: update.display.text.clone(),
            markdown_html: markdown_to_html(&update.display.secondary),
            html: update.display.html.clone(),
            done: update.is_final(),
        }
    }

    pub fn chat(html: String, done: bool) -> Self {
        Self::Chat { html, done }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Reply { done, .. } | Self::Chat { done, .. } => *done,
            Self::Error { .. } => true,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Reply { .. } => "reply",
            Self::Chat { .. } => "chat",
            Self::Error { .. } => "error",
        }
    }

    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::formatting::{format_reply, ModelFamily};
    use crate::services::ml::generation::GenerationState;

    #[test]
    fn test_reply_event_payload() {
        let update = GenerationUpdate {
            state: GenerationState::Completed,
            reply: r"\(x\)".into(),
            display: format_reply(r"\(x\)", ModelFamily::Galactica),
        };
        let event = StreamEvent::reply(&update);
        assert!(event.is_terminal());
        assert_eq!(event.event_type(), "reply");

        let data: serde_json::Value = serde_json::from_str(&event.to_sse_data()).unwrap();
        assert_eq!(data["type"], "reply");
        assert_eq!(data["text"], "$x$");
        assert_eq!(data["done"], true);
    }
}
