//! Decoding of structured model output.
//!
//! Every model response is untrusted: it may be wrapped in Markdown fences,
//! prefixed with prose, or truncated. These helpers locate the first
//! well-formed JSON value and hand back a `serde_json::Value`, or `None`.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("FENCE_RE regex should compile")
});

/// Return the body of the first fenced code block, or the input with any
/// dangling opening fence removed.
pub fn strip_code_fences(raw: &str) -> &str {
    if let Some(body) = FENCE_RE.captures(raw).and_then(|c| c.get(1)) {
        return body.as_str().trim();
    }
    let trimmed = raw.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => rest
            .trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            .trim(),
        None => trimmed,
    }
}

/// Find the balanced `[...]` or `{...}` starting at byte offset `start`.
///
/// Brackets inside string literals are ignored. Returns the end offset
/// (exclusive) or `None` if the brackets never balance.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => stack.push(']'),
            '{' => stack.push('}'),
            ']' | '}' => {
                if stack.pop() != Some(c) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(start + offset + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Locate and parse the first well-formed JSON array or object in `text`.
pub fn find_json_value(text: &str) -> Option<Value> {
    text.char_indices()
        .filter(|(_, c)| *c == '[' || *c == '{')
        .find_map(|(start, _)| {
            let end = balanced_end(text, start)?;
            serde_json::from_str(&text[start..end]).ok()
        })
}

/// Strip fences, then locate and parse the first JSON value.
pub fn decode_json_payload(raw: &str) -> Option<Value> {
    find_json_value(strip_code_fences(raw)).or_else(|| find_json_value(raw))
}

/// Coerce a decoded payload into a list: arrays pass through, a single
/// object becomes a one-element list, anything else is empty.
pub fn into_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(_) => vec![value],
        _ => Vec::new(),
    }
}

/// First `max_chars` characters of `text`, for logs and fallbacks.
pub fn snippet(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Read a string field, accepting numbers and booleans as text.
pub(crate) fn string_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Read a numeric field, accepting numeric strings.
pub(crate) fn number_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<f64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
