//! Message parser — split model replies into prose and fenced code.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

const DEFAULT_LANGUAGE: &str = "plaintext";

/// A fence: three backticks, optional ASCII word tag, newline, a non-empty body,
/// newline, three backticks. The body match is lazy so adjacent fences stay
/// separate.
static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```((?-u:\w)+)?\n(.+?)\n```").expect("code fence pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PartKind {
    Text,
    Code,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessagePart {
    pub kind: PartKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl MessagePart {
    fn text(content: &str) -> Self {
        Self { kind: PartKind::Text, content: content.to_string(), language: None }
    }
}

/// Parts of `text` in document order. Blank parts are dropped; text is kept
/// verbatim, code bodies are trimmed and their tag lower-cased.
#[must_use]
pub fn parse(text: &str) -> Vec<MessagePart> {
    let mut parts = Vec::new();
    let mut last = 0;
    for caps in CODE_FENCE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > last {
            parts.push(MessagePart::text(&text[last..whole.start()]));
        }
        let language = caps
            .get(1)
            .map_or_else(|| DEFAULT_LANGUAGE.to_string(), |m| m.as_str().to_lowercase());
        let body = caps.get(2).map_or("", |m| m.as_str()).trim();
        parts.push(MessagePart { kind: PartKind::Code, content: body.to_string(), language: Some(language) });
        last = whole.end();
    }
    if last < text.len() {
        parts.push(MessagePart::text(&text[last..]));
    }
    parts.retain(|p| !p.content.trim().is_empty());
    parts
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
