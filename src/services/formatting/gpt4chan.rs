//! Thread-style transcripts: `--- <number>` headers separate posts

use regex::Regex;
use std::sync::OnceLock;

const THREAD_CSS: &str = include_str!("thread.css");

/// Upper bound on clean-up passes; each pass only ever shortens the text
const MAX_CLEANUP_PASSES: usize = 64;

struct Patterns {
    empty_posts: [Regex; 3],
    backlink: Regex,
    greentext: Regex,
    greentext_first_line: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        empty_posts: [
            Regex::new(r"--- [0-9]*\n>>[0-9]*\n---").expect("valid regex"),
            Regex::new(r"--- [0-9]*\n *\n---").expect("valid regex"),
            Regex::new(r"--- [0-9]*\n\n\n---").expect("valid regex"),
        ],
        backlink: Regex::new(r"(&gt;&gt;[0-9]*)").expect("valid regex"),
        greentext: Regex::new(r"^(&gt;(.*?)(<br>|</div>))").expect("valid regex"),
        greentext_first_line: Regex::new(r#"^<blockquote class="message">(&gt;(.*?)(<br>|</div>))"#)
            .expect("valid regex"),
    })
}

/// Drop posts that are empty or only hold a backlink
pub fn fix_gpt4chan(text: &str) -> String {
    let mut text = text.to_string();
    for _ in 0..MAX_CLEANUP_PASSES {
        let mut next = text.clone();
        for pattern in &patterns().empty_posts {
            next = pattern.replace_all(&next, "---").into_owned();
        }
        if next == text {
            break;
        }
        text = next;
    }
    text
}

fn render_post(post: &str) -> String {
    let mut lines = post.split('\n');
    let header = lines.next().unwrap_or_default();
    let number = header.split(' ').nth(1).unwrap_or_default();

    let body = lines.collect::<Vec<_>>().join("\n");
    let body = html_escape::encode_text(&body);
    let body = patterns()
        .backlink
        .replace_all(&body, r#"<span class="quote">$1</span>"#);
    let body = body.replace('\n', "<br>\n");

    format!(
        "<span class=\"name\">Anonymous </span> <span class=\"number\">No.{}</span>\n\
         <blockquote class=\"message\">{}</blockquote>\n",
        html_escape::encode_text(number),
        body
    )
}

/// Render a transcript as a thread: the first post is the OP, the rest replies
pub fn thread_html(text: &str) -> String {
    let mut posts = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line == "-----" {
            continue;
        }
        if line.starts_with("--- ") && !current.is_empty() {
            posts.push(render_post(&current));
            current.clear();
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.is_empty() {
        posts.push(render_post(&current));
    }

    let mut output = format!("<style>{THREAD_CSS}</style><div id=\"container\">");
    for (i, post) in posts.iter().enumerate() {
        let class = if i == 0 { "op" } else { "reply" };
        output.push_str(&format!("<div class=\"{class}\">{post}</div>\n"));
    }
    output.push_str("</div>");

    let p = patterns();
    output
        .split('\n')
        .map(|line| {
            let line = p
                .greentext
                .replace(line, r#"<span class="greentext">$1</span>"#);
            p.greentext_first_line
                .replace(&line, r#"<blockquote class="message"><span class="greentext">$1</span>"#)
                .into_owned()
        })
        .collect::<Vec<_>>()
        .join("\n")
}
