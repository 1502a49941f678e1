//! JSON recovery from free-form model text
//!
//! Models wrap their structured output in Markdown fences, prepend prose, or
//! return bare JSON, depending on the day. This module digs the object out
//! with a fixed preference order:
//!
//! 1. a fenced code block (optionally tagged `json`)
//! 2. the first balanced `{...}` span
//! 3. the entire trimmed text

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no valid JSON found in model response")]
    NoJsonFound,
}

fn fence_pattern() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").unwrap())
}

/// Extract a JSON value from model output text.
///
/// A fenced block always wins when present, even over an earlier `{...}` span:
/// responses with explanatory prose followed by a fenced object must resolve
/// to the fence. A fence that fails to parse is an error, not a signal to keep
/// scanning.
pub fn extract_json(text: &str) -> Result<Value, ExtractError> {
    if let Some(caps) = fence_pattern().captures(text) {
        let inner = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        debug!("extracting JSON from fenced block");
        return serde_json::from_str(inner.trim()).map_err(|_| ExtractError::NoJsonFound);
    }

    if let Some(span) = first_object_span(text) {
        debug!("extracting JSON from embedded object span");
        return serde_json::from_str(span).map_err(|_| ExtractError::NoJsonFound);
    }

    debug!("attempting to parse entire content as JSON");
    serde_json::from_str(text.trim()).map_err(|_| ExtractError::NoJsonFound)
}

/// Locate the first top-level balanced `{...}` span.
///
/// Brace counting, not parsing: braces inside string literals will fool it,
/// which is acceptable for a heuristic that only sees model chatter.
fn first_object_span(text: &str) -> Option<&str> {
    let mut start = None;
    let mut depth: i32 = 0;
    for (idx, ch) in text.char_indices() {
        if ch == '{' {
            if start.is_none() {
                start = Some(idx);
            }
            depth += 1;
        } else if ch == '}' && depth > 0 {
            depth -= 1;
            if depth == 0 {
                if let Some(s) = start {
                    return Some(&text[s..=idx]);
                }
            }
        }
    }
    None
}
