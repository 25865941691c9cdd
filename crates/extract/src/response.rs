//! Defensive parsing of the extractor's raw reply.
//!
//! The reply must be a single JSON object with the keys `from`, `to`, `date`,
//! `subject` (string or null) and `confidence_score` (number), optionally
//! wrapped in a Markdown code fence. Anything else is rejected as a whole.

use std::sync::OnceLock;

use lettermark_core::{clamp_unit, AiExtraction};
use regex::Regex;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Textual stand-in for a missing value that the extractor sometimes emits.
pub const SENTINEL_NULL: &str = "null";

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("reply is not valid JSON of the expected shape: {0}")]
    Json(#[from] serde_json::Error),
    #[error("reply is JSON but not an object")]
    NotAnObject,
}

#[derive(Debug, Deserialize)]
struct WireExtraction {
    #[serde(deserialize_with = "required_nullable")]
    from: Option<String>,
    #[serde(deserialize_with = "required_nullable")]
    to: Option<String>,
    #[serde(deserialize_with = "required_nullable")]
    date: Option<String>,
    #[serde(deserialize_with = "required_nullable")]
    subject: Option<String>,
    confidence_score: f32,
}

// With `deserialize_with` serde no longer treats a missing Option as None,
// so each key has to be present (its value may still be null).
fn required_nullable<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)
}

fn re_opening_fence() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"^```[A-Za-z0-9_-]*[ \t]*\r?\n?").expect("invalid regex"))
}

/// Remove a leading ```` ```lang ```` line and a trailing ```` ``` ````.
/// Either side may be missing.
pub fn strip_fences(raw: &str) -> &str {
    let mut s = raw.trim();
    if let Some(open) = re_opening_fence().find(s) {
        s = &s[open.end()..];
    }
    if let Some(rest) = s.trim_end().strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

/// Blank values and the sentinel `"null"` both mean "absent".
pub fn normalize_value(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(SENTINEL_NULL) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn parse_reply(raw: &str) -> Result<AiExtraction, ResponseError> {
    let value: serde_json::Value = serde_json::from_str(strip_fences(raw))?;
    if !value.is_object() {
        return Err(ResponseError::NotAnObject);
    }
    let wire: WireExtraction = serde_json::from_value(value)?;
    Ok(AiExtraction {
        from: normalize_value(wire.from),
        to: normalize_value(wire.to),
        date: normalize_value(wire.date),
        subject: normalize_value(wire.subject),
        confidence: clamp_unit(wire.confidence_score),
    })
}
