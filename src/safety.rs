//! Safety layer: allow-list HTML sanitization for entry bodies.
//!
//! Entry bodies are embedded into pages as fragments, so only inline and
//! simple structural markup survives. Everything else is stripped, script
//! and style contents included.

use std::collections::{HashMap, HashSet};

/// Tags kept in a stored entry body.
pub const ALLOWED_TAGS: &[&str] = &[
    "strong", "em", "a", "div", "span", "ul", "ol", "li", "b", "i", "br", "p", "hr", "u",
    "blockquote",
];

/// Attributes kept on any allowed tag.
pub const ALLOWED_ATTRIBUTES: &[&str] = &["href", "target"];

/// Sanitize an HTML fragment down to the entry allow-list.
pub fn sanitize_html(html: &str) -> String {
    let mut builder = ammonia::Builder::default();
    builder
        .tags(ALLOWED_TAGS.iter().copied().collect::<HashSet<&str>>())
        .generic_attributes(ALLOWED_ATTRIBUTES.iter().copied().collect::<HashSet<&str>>())
        .tag_attributes(HashMap::<&str, HashSet<&str>>::new())
        .link_rel(None);
    builder.clean(html).to_string()
}
