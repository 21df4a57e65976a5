use common_types::{EvaluationFailure, FailureKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },
}

pub type LlmResult<T> = Result<T, LlmError>;

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<LlmError> for EvaluationFailure {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout(details) => Self::new(FailureKind::Timeout, details),
            LlmError::Network(details) => Self::new(FailureKind::NetworkError, details),
            LlmError::Api { status, body } => {
                Self::new(FailureKind::ApiError, body).with_status(status)
            }
        }
    }
}
