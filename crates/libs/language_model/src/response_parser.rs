use common_types::{EvaluationFailure, FailureKind};
use serde_json::Value;
use thiserror::Error;

const FENCE: &str = "```";

/// Completion text that could not be decoded as JSON.
#[derive(Error, Debug)]
#[error("response is not valid JSON: {source}")]
pub struct ResponseParseError {
    /// The completion exactly as the model returned it.
    pub raw_text: String,
    #[source]
    pub source: serde_json::Error,
}

impl From<ResponseParseError> for EvaluationFailure {
    fn from(err: ResponseParseError) -> Self {
        Self::new(FailureKind::ParseError, err.source.to_string()).with_raw_text(err.raw_text)
    }
}

/// Removes a surrounding markdown code fence, with or without a language tag.
#[must_use]
pub fn strip_code_fence(raw: &str) -> &str {
    let text = raw.trim();
    let Some(rest) = text.strip_prefix(FENCE) else {
        return text;
    };
    // The opening fence line may carry a language tag such as `json`.
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    let body = body.trim_end();
    body.strip_suffix(FENCE).unwrap_or(body).trim()
}

/// Strictly decodes a completion as JSON after stripping code fences. Nothing is repaired.
pub fn parse_json_response(raw: &str) -> Result<Value, ResponseParseError> {
    serde_json::from_str(strip_code_fence(raw)).map_err(|source| ResponseParseError {
        raw_text: raw.to_string(),
        source,
    })
}
