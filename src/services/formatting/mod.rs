//! Display variants of a raw reply
//!
//! A small fixed table maps model families (detected from the model name)
//! to their clean-up and HTML rendering. Every function here is pure.

mod galactica;
mod gpt4chan;

use pulldown_cmark::{html, Event, Parser};
use serde::Serialize;

pub use galactica::fix_galactica;
pub use gpt4chan::{fix_gpt4chan, thread_html};

/// Secondary text shown for every family without a LaTeX view
pub const SECONDARY_PLACEHOLDER: &str = "Only applicable for GALACTICA models.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    Galactica,
    Gpt4chan,
    Generic,
}

impl ModelFamily {
    /// Family from the model name prefix, ignoring case
    pub fn detect(model_name: &str) -> Self {
        let name = model_name.to_lowercase();
        if name.starts_with("galactica") {
            Self::Galactica
        } else if ["gpt4chan", "gpt-4chan", "4chan"]
            .iter()
            .any(|prefix| name.starts_with(prefix))
        {
            Self::Gpt4chan
        } else {
            Self::Generic
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct FormattedReply {
    pub text: String,
    /// Markdown source; real content only for Galactica
    pub secondary: String,
    pub html: String,
}

pub fn format_reply(raw: &str, family: ModelFamily) -> FormattedReply {
    match family {
        ModelFamily::Galactica => {
            let text = fix_galactica(raw);
            FormattedReply {
                html: basic_html(&text),
                secondary: text.clone(),
                text,
            }
        }
        ModelFamily::Gpt4chan => {
            let text = fix_gpt4chan(raw);
            FormattedReply {
                html: thread_html(&text),
                secondary: SECONDARY_PLACEHOLDER.to_string(),
                text,
            }
        }
        ModelFamily::Generic => FormattedReply {
            html: basic_html(raw),
            secondary: SECONDARY_PLACEHOLDER.to_string(),
            text: raw.to_string(),
        },
    }
}

/// One escaped paragraph per line inside a reading-width card
pub fn basic_html(text: &str) -> String {
    let paragraphs = text
        .split('\n')
        .map(|line| {
            format!(
                r#"<p style="margin-bottom: 20px">{}</p>"#,
                html_escape::encode_text(line)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"<div style="max-width: 600px; margin-left: auto; margin-right: auto; background-color:#efefef; color:#0b0f19; padding:3em; font-size:1.1em; font-family: helvetica">{paragraphs}</div>"#
    )
}

/// Render markdown, dropping any raw HTML the text carries
pub fn markdown_to_html(markdown: &str) -> String {
    let parser = Parser::new(markdown).filter(|event| {
        !matches!(event, Event::Html(_) | Event::InlineHtml(_))
    });
    let mut output = String::new();
    html::push_html(&mut output, parser);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_detection() {
        assert_eq!(ModelFamily::detect("galactica-6.7b"), ModelFamily::Galactica);
        assert_eq!(ModelFamily::detect("GALACTICA-125m"), ModelFamily::Galactica);
        assert_eq!(ModelFamily::detect("gpt-4chan"), ModelFamily::Gpt4chan);
        assert_eq!(ModelFamily::detect("4chan-model"), ModelFamily::Gpt4chan);
        assert_eq!(ModelFamily::detect("opt-1.3b"), ModelFamily::Generic);
    }

    #[test]
    fn test_galactica_latex_delimiters() {
        let reply = format_reply(r"\[x\]", ModelFamily::Galactica);
        assert_eq!(reply.text, "$x$");
        assert_eq!(reply.secondary, "$x$");
    }

    #[test]
    fn test_generic_reply_escapes_html() {
        let reply = format_reply("a <b>\nc", ModelFamily::Generic);
        assert_eq!(reply.text, "a <b>\nc");
        assert_eq!(reply.secondary, SECONDARY_PLACEHOLDER);
        assert!(reply.html.contains(r#"<p style="margin-bottom: 20px">a &lt;b&gt;</p>"#));
        assert!(reply.html.contains(r#"<p style="margin-bottom: 20px">c</p>"#));
    }

    #[test]
    fn test_formatting_twice_changes_nothing() {
        let samples = [
            "plain text\nwith lines",
            r"Energy \(E = mc^2\) and \[\int x\]$$",
            "--- 1\nhello\n--- 2\n>>1\n--- 3\n>greentext\n-----",
            "",
        ];
        for family in [ModelFamily::Galactica, ModelFamily::Gpt4chan, ModelFamily::Generic] {
            for sample in samples {
                let once = format_reply(sample, family);
                let twice = format_reply(&once.text, family);
                assert_eq!(once, twice, "{family:?} drifted on {sample:?}");
            }
        }
    }

    #[test]
    fn test_markdown_strips_raw_html() {
        let html = markdown_to_html("*hi* <script>alert(1)</script>");
        assert!(html.contains("<em>hi</em>"));
        assert!(!html.contains("<script>"));
    }
}
