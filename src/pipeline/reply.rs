//! Quoted-reply trimming.
//!
//! Replies carry the previous message underneath. Everything from the
//! point where the quote starts is dropped, for both plain and HTML bodies.

use std::sync::LazyLock;

use regex::Regex;

/// Attribution line: "On Mon, Jan 1, 2024 at 10:00 AM Alice <a@x.com> wrote:".
static ATTRIBUTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*On\s.+\s(?:wrote|schrieb|a écrit):\s*$").unwrap());

/// Start of an attribution line wrapped over two lines.
static ATTRIBUTION_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*On\s.*\d").unwrap());

/// Forward/quote separators used by desktop and web clients.
static SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:-{2,}\s*(?:Original|Forwarded) Message\s*-{2,}|_{20,}|Begin forwarded message:)\s*$")
        .unwrap()
});

/// Outlook-style header block: "From: ..." followed by "Sent:"/"Date:".
static HEADER_FROM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*\*?From:\*?\s").unwrap());
static HEADER_FOLLOW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*\*?(?:Sent|Date|To|Subject):\*?\s").unwrap());

/// Markers where a quoted message begins in HTML mail. An inline
/// attribution must carry a date or time and end its block at "wrote:".
static HTML_QUOTE_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<div[^>]*class="?[^">]*gmail_quote|<blockquote[^>]*type="?cite|<div[^>]*class="?[^">]*yahoo_quoted|<div[^>]*id="?(?:appendonsend|divRplyFwdMsg)|<hr[^>]*id="?stopSpelling|(?:<br\s*/?>|<div[^>]*>|<p[^>]*>|^)\s*On\s[^<>]{0,200}?\d[^<>]{0,200}?\s(?:wrote|schrieb|a écrit):\s*(?:<br\s*/?>|</div>|</p>|$)"#,
    )
    .unwrap()
});

/// Remove the quoted history from a plain-text reply.
///
/// Lines prefixed with `>` are dropped; everything from an attribution
/// line or client separator onward is dropped.
pub fn trim_reply(body: &str) -> String {
    let lines: Vec<&str> = body.lines().collect();
    let mut result = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();

        if trimmed.starts_with('>') {
            continue;
        }

        if ATTRIBUTION.is_match(line) || SEPARATOR.is_match(line) {
            break;
        }

        // "On <date>, Alice <alice@example.com>\nwrote:"
        if ATTRIBUTION_START.is_match(line)
            && lines
                .get(i + 1)
                .is_some_and(|next| next.trim().to_lowercase().ends_with("wrote:"))
        {
            break;
        }

        if HEADER_FROM.is_match(line)
            && lines
                .get(i + 1)
                .is_some_and(|next| HEADER_FOLLOW.is_match(next))
        {
            break;
        }

        result.push(*line);
    }

    // Trim surrounding blank lines
    while result.last().is_some_and(|l| l.trim().is_empty()) {
        result.pop();
    }
    while result.first().is_some_and(|l| l.trim().is_empty()) {
        result.remove(0);
    }

    result.join("\n")
}

/// Remove the quoted history from an HTML reply.
///
/// Cuts at the earliest quote marker; unbalanced tags left behind are
/// repaired by the sanitizer later in the pipeline.
pub fn trim_html_reply(html: &str) -> String {
    match HTML_QUOTE_START.find(html) {
        Some(m) => html[..m.start()].trim_end().to_string(),
        None => html.trim().to_string(),
    }
}
