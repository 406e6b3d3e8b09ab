//! HTML 文本处理工具。
//!
//! 把抓取到的章节 HTML 还原为按段落分行的纯文本，供排版与 EPUB 使用。

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

/// Full-width space; two of them form the paragraph indent.
pub const IDEOGRAPHIC_SPACE: char = '\u{3000}';
pub const PARAGRAPH_INDENT: &str = "\u{3000}\u{3000}";

fn re_line_break() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r"(?i)<br\s*/?>|</p\s*>|<p(\s[^>]*)?>").expect("compile line break regex")
    })
}

fn re_all_tags() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?s)<[^>]+>").expect("compile tag regex"))
}

// ── 实体解码 ────────────────────────────────────────────────────

pub fn unescape_basic_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }
    // &amp; 最后处理，避免 "&amp;lt;" 被二次解码
    Cow::Owned(
        s.replace("&nbsp;", " ")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&"),
    )
}

// ── HTML 转义 ───────────────────────────────────────────────────

pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

// ── 正文规范化 ──────────────────────────────────────────────────

/// Turns chapter HTML into newline-separated paragraphs: line-break markup
/// becomes `\n`, remaining tags are dropped, entities are decoded, control
/// characters removed, leading (full-width) whitespace stripped from every
/// line and blank lines collapsed.
pub fn normalize_content(html: &str) -> String {
    let with_breaks = re_line_break().replace_all(html, "\n");
    let without_tags = re_all_tags().replace_all(&with_breaks, "");
    let decoded = unescape_basic_entities(&without_tags);

    let mut out = String::with_capacity(decoded.len());
    for line in decoded.split('\n') {
        let cleaned: String = line
            .chars()
            .filter(|c| !c.is_control())
            .collect::<String>()
            .trim_start_matches(|c: char| c.is_whitespace() || c == IDEOGRAPHIC_SPACE)
            .trim_end()
            .to_string();
        if cleaned.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&cleaned);
    }
    out
}

/// Paragraphs of [`normalize_content`], each prefixed with the indent.
pub fn indented_paragraphs(html: &str) -> Vec<String> {
    normalize_content(html)
        .lines()
        .map(|line| format!("{PARAGRAPH_INDENT}{line}"))
        .collect()
}
