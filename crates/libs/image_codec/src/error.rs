use common_types::{EvaluationFailure, FailureKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    /// The source could not be obtained: missing file, failed fetch, empty content.
    #[error("cannot read image {source_ref}: {details}")]
    Read { source_ref: String, details: String },
    /// The bytes were read but are not a decodable image.
    #[error("cannot decode image {source_ref}: {details}")]
    Format { source_ref: String, details: String },
}

impl ImageError {
    pub(crate) fn read(source_ref: &str, details: impl ToString) -> Self {
        Self::Read {
            source_ref: source_ref.to_string(),
            details: details.to_string(),
        }
    }

    pub(crate) fn format(source_ref: &str, details: impl ToString) -> Self {
        Self::Format {
            source_ref: source_ref.to_string(),
            details: details.to_string(),
        }
    }
}

impl From<ImageError> for EvaluationFailure {
    fn from(err: ImageError) -> Self {
        let kind = match err {
            ImageError::Read { .. } => FailureKind::ImageReadError,
            ImageError::Format { .. } => FailureKind::ImageFormatError,
        };
        Self::new(kind, err.to_string())
    }
}
