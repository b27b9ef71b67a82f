//! Reduces free-form model text to an ordered list of call descriptions.

use super::call::{BatchReply, kind_of};
use crate::error::NormalizeError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;

const FENCE: &str = "```";

static EMBEDDED_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)\r?\n[ \t]*```").expect("valid fence regex")
});

/// Turns raw model output into a [`BatchReply`].
///
/// A single object becomes a one-element batch, an array is taken as is,
/// and a `{"tool_calls": [...]}` wrapper is unwrapped. When the whole text
/// does not decode, a fenced block or the outermost bracketed span inside
/// it is tried before giving up.
pub fn normalize(raw: &str) -> Result<BatchReply, NormalizeError> {
    let trimmed = raw.trim();
    let candidate = strip_code_fence(trimmed);

    match serde_json::from_str::<Value>(&candidate) {
        Ok(value) => into_batch(value).map_err(|reason| NormalizeError::new(reason, raw)),
        Err(error) => {
            let recovered = embedded_json(trimmed)
                .and_then(|text| serde_json::from_str::<Value>(text).ok());
            match recovered {
                Some(value) => {
                    tracing::debug!("recovered call JSON embedded in model prose");
                    into_batch(value).map_err(|reason| NormalizeError::new(reason, raw))
                }
                None => Err(NormalizeError::new(format!("invalid JSON: {error}"), raw)),
            }
        }
    }
}

/// Drops the opening and closing fence lines of a fenced block.
///
/// Text with fewer than three lines is left alone, as is text that does
/// not open with a fence.
pub fn strip_code_fence(text: &str) -> Cow<'_, str> {
    if !text.starts_with(FENCE) {
        return Cow::Borrowed(text);
    }
    let lines = text.lines().collect::<Vec<_>>();
    if lines.len() < 3 {
        return Cow::Borrowed(text);
    }
    let end = if lines[lines.len() - 1].trim_start().starts_with(FENCE) {
        lines.len() - 1
    } else {
        lines.len()
    };
    Cow::Owned(lines[1..end].join("\n"))
}

fn embedded_json(text: &str) -> Option<&str> {
    if let Some(captures) = EMBEDDED_FENCE.captures(text) {
        if let Some(body) = captures.get(1) {
            return Some(body.as_str());
        }
    }
    let start = text.find(['{', '['])?;
    let end = text.rfind(['}', ']'])?;
    (end > start).then(|| &text[start..=end])
}

fn into_batch(value: Value) -> Result<BatchReply, String> {
    match value {
        Value::Object(mut map) => match map.remove("tool_calls") {
            Some(Value::Array(calls)) => Ok(BatchReply::new(calls)),
            Some(other) => {
                map.insert("tool_calls".to_string(), other);
                Ok(BatchReply::new(vec![Value::Object(map)]))
            }
            None => Ok(BatchReply::new(vec![Value::Object(map)])),
        },
        Value::Array(calls) => Ok(BatchReply::new(calls)),
        other => Err(format!(
            "expected a JSON object or array, got {}",
            kind_of(&other)
        )),
    }
}
