//! Tolerant decoding of agent reply payloads.
//!
//! Agents answer with JSON that is frequently wrapped several times: a
//! stringified object under a `data` key, inside another envelope, inside a
//! Markdown code fence. [`unwrap_payload`] peels those layers off and returns
//! the innermost value.
//!
//! Payloads that cannot be decoded at all are written to a
//! [`PayloadArchive`] so they can be inspected offline.

use std::path::{Path, PathBuf};

use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::{error, warn};
use uuid::Uuid;

/// Maximum number of nested `data` layers that will be unwrapped.
pub const MAX_UNWRAP_DEPTH: usize = 10;

lazy_static! {
    static ref CODE_FENCE: Regex =
        Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("valid fence regex");
    static ref OPEN_FENCE: Regex =
        Regex::new(r"^```[A-Za-z0-9_+-]*[ \t]*\r?\n?").expect("valid open fence regex");
}

/// A payload that survived every decoding fallback.
#[derive(Debug, Clone, thiserror::Error)]
#[error("malformed payload: {reason}")]
pub struct MalformedPayload {
    pub reason: String,
    pub raw: String,
}

impl MalformedPayload {
    fn new(raw: &str, reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            raw: raw.to_string(),
        }
    }
}

/// Decode `raw` into the innermost JSON value.
///
/// Each step either parses a string (after stripping code fences and, if
/// needed, un-escaping or cutting out the outermost `{...}`/`[...]`), or
/// descends into the `data` key of an object. A string that no longer looks
/// like JSON after at least one layer has been removed is returned as a plain
/// string value.
pub fn unwrap_payload(raw: &str) -> Result<Value, MalformedPayload> {
    let mut current =
        parse_text(raw).ok_or_else(|| MalformedPayload::new(raw, "no JSON structure found"))?;
    let mut layers = 0;

    // Every `data` layer costs at most two steps (descend, then parse).
    for _ in 0..=(MAX_UNWRAP_DEPTH * 2 + 1) {
        current = match current {
            Value::String(text) => match parse_text(&text) {
                Some(parsed) => parsed,
                None => return Ok(Value::String(text)),
            },
            Value::Object(mut map) if map.get("data").is_some_and(|d| !d.is_null()) => {
                layers += 1;
                if layers > MAX_UNWRAP_DEPTH {
                    break;
                }
                map.remove("data").unwrap_or(Value::Null)
            }
            other => return Ok(other),
        };
    }

    Err(MalformedPayload::new(raw, "exceeded maximum unwrap depth"))
}

/// Try every textual fallback on one string.
pub fn parse_text(text: &str) -> Option<Value> {
    let stripped = strip_code_fences(text);
    let candidate = stripped.trim();
    if candidate.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        return Some(value);
    }

    let unescaped = unescape(candidate);
    if let Ok(value) = serde_json::from_str::<Value>(&unescaped) {
        return Some(value);
    }

    extract_structure(candidate)
        .or_else(|| extract_structure(&unescaped))
        .and_then(|slice| serde_json::from_str::<Value>(&slice).ok())
}

/// Remove a Markdown code fence, keeping only its body.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(captures) = CODE_FENCE.captures(trimmed) {
        if let Some(body) = captures.get(1) {
            return body.as_str().to_string();
        }
    }
    // Unterminated fence: drop the opening marker only.
    if trimmed.starts_with("```") {
        return OPEN_FENCE.replace(trimmed, "").to_string();
    }
    trimmed.to_string()
}

fn unescape(text: &str) -> String {
    text.replace("\\n", "\n")
        .replace("\\\"", "\"")
        .replace("\\\\", "\\")
}

/// Cut from the first `{` or `[` to the last matching closer.
fn extract_structure(text: &str) -> Option<String> {
    let start = text.find(['{', '['])?;
    let closer = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(closer)?;
    (end > start).then(|| text[start..=end].to_string())
}

/// Side location for payloads that could not be decoded.
#[derive(Debug, Clone)]
pub struct PayloadArchive {
    dir: PathBuf,
}

impl PayloadArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `payload` to the archive. Never fails the caller.
    pub async fn store(&self, context: &str, payload: &str) -> Option<PathBuf> {
        let context: String = context
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let file_name = format!(
            "{}-{}-{}.txt",
            Utc::now().format("%Y%m%dT%H%M%S%.3f"),
            context,
            Uuid::new_v4()
        );
        let path = self.dir.join(file_name);

        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            error!(dir = %self.dir.display(), error = %e, "failed to create payload archive dir");
            return None;
        }
        match tokio::fs::write(&path, payload).await {
            Ok(()) => {
                warn!(path = %path.display(), context = %context, "archived malformed payload");
                Some(path)
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to archive malformed payload");
                None
            }
        }
    }
}
