//! Response extraction: pull the JSON payload out of a model reply.
//!
//! Models do not perfectly honour the JSON-only contract. Replies arrive
//! fenced in ```` ```json ````, prefixed with "Sure! Here is…", or followed by
//! a closing remark. The extractor tries, in order:
//!
//! 1. the first fenced code block (```` ```json ```` or bare ```` ``` ````),
//! 2. the whole reply,
//! 3. the substring from the first `{` to the last `}`,
//!
//! and accepts the first candidate that parses as a JSON object or array.

use crate::error::AnalysisError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n?(.*?)```").expect("valid regex"));

/// Extract and parse the JSON payload of a model reply.
///
/// On failure the error carries the original text for diagnostics.
pub fn extract_json(raw: &str) -> Result<Value, AnalysisError> {
    let text = raw.trim().trim_start_matches('\u{feff}');

    if let Some(caps) = RE_FENCE.captures(text) {
        if let Some(v) = parse_structured(caps[1].trim()) {
            return Ok(v);
        }
    }

    if let Some(v) = parse_structured(text) {
        return Ok(v);
    }

    let reason = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => {
            if let Some(v) = parse_structured(&text[start..=end]) {
                return Ok(v);
            }
            "braced substring is not valid JSON"
        }
        _ if text.is_empty() => "response is empty",
        _ => "no JSON object found",
    };

    Err(AnalysisError::UnparsableResponse {
        reason: reason.to_string(),
        raw: raw.to_string(),
    })
}

fn parse_structured(candidate: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(v @ (Value::Object(_) | Value::Array(_))) => Some(v),
        _ => None,
    }
}
