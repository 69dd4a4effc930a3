//! Body normalization: plain and HTML cleaning pipelines.
//!
//! Each stage is a pure `&str -> String` function; the pipelines are the
//! ordered composition of their stages. Nothing here fails.

use std::sync::LazyLock;

use linkify::{LinkFinder, LinkKind};
use regex::Regex;

use crate::config::IngestConfig;
use crate::pipeline::encoding;
use crate::pipeline::reply;
use crate::safety;

/// Lines shorter than this keep their hard break when re-flowing.
const UNFOLD_MIN_LINE: usize = 60;

static DATA_URI_SRC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"src="data:image/(?:jpeg|png);base64,[^"]*""#).unwrap());

static DATA_URI_CSS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"url\(data:image/(?:jpeg|png);base64,[^)]*\)").unwrap());

static INLINE_IMAGE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[image: Inline image [0-9]{1,2}\]").unwrap());

static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

static LINE_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\r?|\r\n?").unwrap());

static BRACKETED_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(https?://\S*?)>").unwrap());

static TRAILING_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<br\s*/?>\s*(</p>)?\s*$").unwrap());

static TRAILING_SIGNATURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--( \*)?\s*(</p>)?\s*$").unwrap());

static DOCUMENT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?(?:html|head|body)(?:\s[^>]*)?>").unwrap());

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

static HIDDEN_DIV: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<div style="display:none;border:0px;width:0px;height:0px;overflow:hidden;">.+</div>"#)
        .unwrap()
});

static CID_SRC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"src="cid:\S+""#).unwrap());

/// Gmail's plain signature separator, as it reads after sanitizing.
const HTML_SIGNATURE_SEPARATOR: &str = "<br>--<br>";

/// Cleans inbound bodies into entry-ready HTML fragments.
#[derive(Debug, Clone)]
pub struct BodyNormalizer {
    soft_wrap_providers: Vec<String>,
}

impl BodyNormalizer {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            soft_wrap_providers: config.soft_wrap_providers.clone(),
        }
    }

    /// Plain-body pipeline. `sender` is the sender's address; providers
    /// that already soft-wrap skip paragraph re-flow.
    pub fn clean_message(&self, body: &str, sender: &str) -> String {
        let body = reply::trim_reply(body);
        if body.trim().is_empty() {
            return String::new();
        }
        let body = strip_data_images(&body);
        let body = collapse_triple_breaks(&body);
        let body = if self.soft_wraps(sender) {
            body
        } else {
            unfold_paragraphs(&body)
        };
        let body = replace_inline_image_tokens(&body);
        let body = LINE_BREAK.replace_all(&body, "<br>").into_owned();
        let body = wrap_paragraph(&body);
        let body = unbracket_urls(&body);
        let body = trim_trailing_breaks(&body);
        let body = trim_signature_marker(&body);
        let body = trim_trailing_breaks(&body);
        encoding::to_utf8(body.trim().as_bytes(), None)
    }

    /// HTML-body pipeline.
    pub fn clean_html(&self, html: &str) -> String {
        let html = reply::trim_html_reply(html);
        let html = strip_document_tags(&html);
        let html = auto_link(&html);
        let html = safety::sanitize_html(&html);
        let html = cut_at_signature(&html);
        let html = remove_hidden_divs(&html);
        let html = hide_cid_images(&html);
        let html = trim_trailing_breaks(&html);
        encoding::to_utf8(html.as_bytes(), None)
    }

    fn soft_wraps(&self, sender: &str) -> bool {
        let sender = sender.to_lowercase();
        self.soft_wrap_providers
            .iter()
            .any(|provider| sender.contains(&provider.to_lowercase()))
    }
}

// ── Plain stages ────────────────────────────────────────────────────

/// Blank out embedded base64 images (`<img src>` and CSS `url()`).
pub fn strip_data_images(body: &str) -> String {
    let body = DATA_URI_SRC.replace_all(body, r#"src="""#);
    DATA_URI_CSS.replace_all(&body, "url()").into_owned()
}

/// Normalize runs of three or more line breaks to two.
pub fn collapse_triple_breaks(body: &str) -> String {
    BLANK_RUN.replace_all(body, "\n\n").into_owned()
}

/// Re-flow hard-wrapped plain text into paragraphs.
///
/// Short lines, indented lines and bullet lines keep their break; other
/// lines are joined to the next with a space. Blank lines become paragraph
/// breaks.
pub fn unfold_paragraphs(body: &str) -> String {
    let mut text = String::with_capacity(body.len());
    for line in body.split('\n') {
        if line.trim().is_empty() {
            text.push_str("\n\n");
        } else if line.chars().count() < UNFOLD_MIN_LINE || keeps_break(line) {
            text.push_str(line.trim_end());
            text.push('\n');
        } else {
            text.push_str(line.trim_end());
            text.push(' ');
        }
    }
    collapse_triple_breaks(&text).trim_end().to_string()
}

fn keeps_break(line: &str) -> bool {
    line.starts_with(char::is_whitespace) || line.starts_with(['*', '-', '•'])
}

/// Replace Gmail's "[image: Inline image 1]" placeholders.
pub fn replace_inline_image_tokens(body: &str) -> String {
    INLINE_IMAGE_TOKEN
        .replace_all(body, "(see attached image)")
        .into_owned()
}

/// Wrap in a paragraph unless already wrapped.
fn wrap_paragraph(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.starts_with("<p>") && trimmed.ends_with("</p>") {
        trimmed.to_string()
    } else {
        format!("<p>{body}</p>")
    }
}

/// `<https://x>` → `(https://x)` so the URL survives as text.
pub fn unbracket_urls(body: &str) -> String {
    BRACKETED_URL.replace_all(body, "($1)").into_owned()
}

/// Drop up to two trailing `<br>`s, keeping a closing `</p>`.
pub fn trim_trailing_breaks(body: &str) -> String {
    let once = TRAILING_BREAK.replace(body, "$1");
    TRAILING_BREAK.replace(&once, "$1").into_owned()
}

/// Drop a trailing `--` signature marker, keeping a closing `</p>`.
fn trim_signature_marker(body: &str) -> String {
    TRAILING_SIGNATURE.replace(body, "$2").into_owned()
}

// ── HTML stages ─────────────────────────────────────────────────────

/// Remove `<html>`, `<head>` and `<body>` wrapper tags.
pub fn strip_document_tags(html: &str) -> String {
    DOCUMENT_TAG.replace_all(html, "").into_owned()
}

/// Link bare URLs and email addresses in text, outside tags and anchors.
pub fn auto_link(html: &str) -> String {
    let mut finder = LinkFinder::new();
    finder.kinds(&[LinkKind::Url, LinkKind::Email]);

    let mut out = String::with_capacity(html.len());
    let mut in_anchor = 0usize;
    let mut last = 0;

    for tag in TAG.find_iter(html) {
        let text = &html[last..tag.start()];
        if in_anchor == 0 {
            link_text(&finder, text, &mut out);
        } else {
            out.push_str(text);
        }

        let lower = tag.as_str().to_ascii_lowercase();
        if lower.starts_with("<a ") || lower == "<a>" {
            in_anchor += 1;
        } else if lower.starts_with("</a") {
            in_anchor = in_anchor.saturating_sub(1);
        }
        out.push_str(tag.as_str());
        last = tag.end();
    }

    let rest = &html[last..];
    if in_anchor == 0 {
        link_text(&finder, rest, &mut out);
    } else {
        out.push_str(rest);
    }
    out
}

fn link_text(finder: &LinkFinder, text: &str, out: &mut String) {
    for span in finder.spans(text) {
        match span.kind() {
            Some(LinkKind::Email) => out.push_str(&format!(
                r#"<a href="mailto:{0}" target="_blank">{0}</a>"#,
                span.as_str()
            )),
            Some(_) => out.push_str(&format!(
                r#"<a href="{0}" target="_blank">{0}</a>"#,
                span.as_str()
            )),
            None => out.push_str(span.as_str()),
        }
    }
}

/// Keep only what precedes a `<br>--<br>` signature separator.
pub fn cut_at_signature(html: &str) -> String {
    html.split(HTML_SIGNATURE_SEPARATOR)
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Remove zero-size hidden divs (tracking pixels).
pub fn remove_hidden_divs(html: &str) -> String {
    HIDDEN_DIV.replace_all(html, "").into_owned()
}

/// Suppress `cid:` images, which render broken outside the message.
pub fn hide_cid_images(html: &str) -> String {
    CID_SRC
        .replace_all(html, r#"src="" style="display: none;""#)
        .into_owned()
}
