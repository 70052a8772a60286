//! JSON extraction from free-form model output
//!
//! Chat models wrap their answer in prose or code fences. Instead of guessing
//! with the first `{` and last `}`, the scanner walks the text tracking
//! bracket nesting (skipping string literals) and keeps only the balanced
//! candidates that parse as JSON.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{Error, Result};

/// Return every top-level JSON value (object or array) embedded in `text`,
/// in order of appearance. Nested values are part of their parent and are not
/// reported separately.
pub fn extract_json(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if matches!(bytes[i], b'{' | b'[') {
            if let Some(end) = balanced_end(bytes, i) {
                // Delimiters are ASCII, so both ends sit on char boundaries
                let candidate = &text[i..=end];
                if serde_json::from_str::<Value>(candidate).is_ok() {
                    found.push(candidate);
                    i = end + 1;
                    continue;
                }
            }
        }
        i += 1;
    }

    found
}

/// Index of the bracket closing the one at `start`, if the nesting balances
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' | b'[' => stack.push(b),
            b'}' | b']' => {
                let opening = if b == b'}' { b'{' } else { b'[' };
                if stack.pop() != Some(opening) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }

    None
}

/// First embedded JSON object in `text`, if any
pub fn first_json_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    extract_json(text)
        .into_iter()
        .find_map(|candidate| match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
}

/// Parse a payee -> category map out of a categorizer response.
///
/// Non-string values are ignored. A response without any JSON object is an
/// upstream failure.
pub fn parse_category_map(response: &str) -> Result<HashMap<String, String>> {
    let object = first_json_object(response).ok_or_else(|| {
        Error::upstream(format!(
            "No JSON object found in categorizer response | Raw: {}",
            truncate(response.trim(), 200)
        ))
    })?;

    Ok(object
        .into_iter()
        .filter_map(|(name, value)| match value {
            Value::String(category) => Some((name, category)),
            _ => None,
        })
        .collect())
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
