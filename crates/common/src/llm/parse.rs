//! Structured-output parsing
//!
//! LLM output is free text that usually, but not always, contains the JSON we
//! asked for. Parsers return [`Parsed`]: either the decoded value or a
//! [`Fallback`] carrying a deterministic placeholder and the reason the real
//! output was rejected. A fallback is not an error; the caller logs it and
//! carries on with the placeholder.

use crate::metrics;
use regex_lite::Regex;
use serde::de::DeserializeOwned;
use std::sync::OnceLock;

/// Placeholder used when structured output could not be decoded
#[derive(Debug, Clone, PartialEq)]
pub struct Fallback<T> {
    pub value: T,
    pub reason: String,
}

impl<T> Fallback<T> {
    pub fn new(value: T, reason: impl Into<String>) -> Self {
        Self {
            value,
            reason: reason.into(),
        }
    }
}

/// Outcome of parsing structured LLM output
pub type Parsed<T> = std::result::Result<T, Fallback<T>>;

/// Unwrap either branch, logging and counting the fallback
pub fn settle<T>(parsed: Parsed<T>, what: &'static str) -> T {
    match parsed {
        Ok(value) => value,
        Err(fallback) => {
            tracing::warn!(output = what, reason = %fallback.reason, "Using placeholder for unparseable LLM output");
            metrics::record_parse_fallback(what);
            fallback.value
        }
    }
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("fence pattern is valid")
    })
}

/// Locate the JSON payload inside free text: the body of a code fence when
/// present, otherwise the span from the first `{`/`[` to the last `}`/`]`.
pub fn extract_json(text: &str) -> Option<&str> {
    let body = fence_regex()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text);

    let start = body.find(['{', '['])?;
    let end = body.rfind(['}', ']'])?;
    if end < start {
        return None;
    }
    Some(body[start..=end].trim())
}

/// Decode `T` from the JSON embedded in `text`
pub fn parse_json<T: DeserializeOwned>(text: &str) -> std::result::Result<T, String> {
    let payload = extract_json(text).ok_or_else(|| "no JSON found in completion".to_string())?;
    serde_json::from_str(payload).map_err(|e| format!("invalid JSON: {}", e))
}
