//! MiniJinja template engine wrapper

use crate::services::chat::ChatTurn;
use crate::services::formatting::markdown_to_html;
use anyhow::Result;
use minijinja::{context, Environment, Error, ErrorKind, Value};
use serde::Serialize;

const INDEX: &str = include_str!("../../web/templates/index.html");
const CHAT_MESSAGES: &str = include_str!("../../web/templates/chat_messages.html");

pub struct TemplateEngine {
    env: Environment<'static>,
}

/// Everything the index page needs to pre-fill its controls
#[derive(Debug, Serialize)]
pub struct PageContext<'a> {
    pub mode: &'a str,
    pub model_name: &'a str,
    pub models: &'a [String],
    pub presets: &'a [String],
    pub preset: &'a str,
    pub prompt: &'a str,
    pub max_new_tokens: usize,
    pub max_new_tokens_min: usize,
    pub max_new_tokens_max: usize,
    pub stream: bool,
    pub extensions: &'a [String],
}

impl TemplateEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.set_debug(cfg!(debug_assertions));

        env.add_template("index.html", INDEX)?;
        env.add_template("chat_messages.html", CHAT_MESSAGES)?;

        env.add_filter("datetime", format_datetime);
        env.add_filter("escape_html", escape_html);
        env.add_filter("markdown", markdown);

        Ok(Self { env })
    }

    pub fn render(&self, template_name: &str, ctx: Value) -> Result<String> {
        let template = self.env.get_template(template_name)?;
        Ok(template.render(ctx)?)
    }

    pub fn render_index(&self, page: &PageContext<'_>) -> Result<String> {
        self.render(
            "index.html",
            context! {
                title => "Text generation web UI",
                version => env!("CARGO_PKG_VERSION"),
                page => page,
            },
        )
    }

    /// Transcript of a chat session, newest turn last
    pub fn render_chat(&self, turns: &[ChatTurn], name1: &str, name2: &str) -> Result<String> {
        self.render(
            "chat_messages.html",
            context! {
                turns => turns,
                name1 => name1,
                name2 => name2,
            },
        )
    }
}

fn format_datetime(value: &Value, _: &[Value]) -> Result<Value, Error> {
    let text = value
        .as_str()
        .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "expected timestamp"))?;
    let dt = chrono::DateTime::parse_from_rfc3339(text)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    Ok(Value::from(dt.format("%H:%M").to_string()))
}

fn escape_html(value: &Value, _: &[Value]) -> Result<Value, Error> {
    let text = value
        .as_str()
        .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "expected string"))?;
    Ok(Value::from_safe_string(
        html_escape::encode_quoted_attribute(text).into_owned(),
    ))
}

fn markdown(value: &Value, _: &[Value]) -> Result<Value, Error> {
    let text = value
        .as_str()
        .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "expected string"))?;
    Ok(Value::from_safe_string(markdown_to_html(text)))
}
