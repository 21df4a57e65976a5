use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Which component a per-record failure came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ImageReadError,
    ImageFormatError,
    Timeout,
    NetworkError,
    ApiError,
    ParseError,
}

impl FailureKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ImageReadError => "image_read_error",
            Self::ImageFormatError => "image_format_error",
            Self::Timeout => "timeout",
            Self::NetworkError => "network_error",
            Self::ApiError => "api_error",
            Self::ParseError => "parse_error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EvaluationFailure {
    #[serde(rename = "error")]
    pub kind: FailureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(
        rename = "raw_response",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub raw_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl EvaluationFailure {
    pub fn new(kind: FailureKind, details: impl Into<String>) -> Self {
        Self {
            kind,
            details: Some(details.into()),
            raw_text: None,
            status_code: None,
        }
    }

    #[must_use]
    pub fn with_raw_text(mut self, raw_text: impl Into<String>) -> Self {
        self.raw_text = Some(raw_text.into());
        self
    }

    #[must_use]
    pub const fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// Whether the endpoint rejected the request payload itself.
    ///
    /// In a multi-turn run this means the accumulated conversation can not be sent again
    /// and a fresh context has to be started.
    #[must_use]
    pub fn requires_fresh_context(&self) -> bool {
        self.kind == FailureKind::ApiError && matches!(self.status_code, Some(400 | 413 | 422))
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self.kind {
            FailureKind::Timeout | FailureKind::NetworkError => true,
            FailureKind::ApiError => matches!(self.status_code, Some(408 | 429 | 500..=599)),
            FailureKind::ImageReadError | FailureKind::ImageFormatError | FailureKind::ParseError => {
                false
            }
        }
    }
}

/// Outcome of evaluating a single record, attached to the record before it is written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EvaluationResult {
    Failure(EvaluationFailure),
    Success(Value),
}

impl EvaluationResult {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub const fn failure(&self) -> Option<&EvaluationFailure> {
        match self {
            Self::Failure(f) => Some(f),
            Self::Success(_) => None,
        }
    }

    #[must_use]
    pub const fn parsed(&self) -> Option<&Value> {
        match self {
            Self::Success(v) => Some(v),
            Self::Failure(_) => None,
        }
    }

    /// JSON written to the output field: the parsed object on success, an error object otherwise.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl From<EvaluationFailure> for EvaluationResult {
    fn from(failure: EvaluationFailure) -> Self {
        Self::Failure(failure)
    }
}
