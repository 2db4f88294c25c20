use regex::{NoExpand, Regex};
use std::sync::OnceLock;

fn dollar_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$+").expect("valid regex"))
}

fn blank_line_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("valid regex"))
}

/// LaTeX delimiters to `$` and one blank line between paragraphs
pub fn fix_galactica(text: &str) -> String {
    let text = text
        .replace(r"\[", "$")
        .replace(r"\]", "$")
        .replace(r"\(", "$")
        .replace(r"\)", "$");
    let text = dollar_runs().replace_all(&text, NoExpand("$"));
    let text = text.replace('\n', "\n\n");
    blank_line_runs().replace_all(&text, "\n\n").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_and_display_math() {
        assert_eq!(fix_galactica(r"\(a\) and \[b\]"), "$a$ and $b$");
    }

    #[test]
    fn test_collapses_dollar_runs() {
        assert_eq!(fix_galactica("$$x$$$"), "$x$");
    }

    #[test]
    fn test_paragraph_spacing() {
        assert_eq!(fix_galactica("a\nb"), "a\n\nb");
        assert_eq!(fix_galactica("a\n\n\n\nb"), "a\n\nb");
    }
}
