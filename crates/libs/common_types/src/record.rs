use serde_json::{Map, Value};
use thiserror::Error;

use crate::EvaluationResult;

pub const SOURCE_TEXT_FIELD: &str = "source_text";
pub const IMAGE_PATH_FIELD: &str = "image_path";

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("line {line}: invalid JSON: {source}")]
    InvalidJson {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("line {line}: expected a JSON object, found {found}")]
    NotAnObject { line: usize, found: &'static str },
    #[error("array element {element}: expected a JSON object, found {found}")]
    NotAnObjectElement { element: usize, found: &'static str },
}

/// One unit of work read from an input file.
///
/// The input row is kept as-is so that every passthrough field (and its key order) survives
/// into the output. `index` is the record's position in the input sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub index: usize,
    pub fields: Map<String, Value>,
}

impl Record {
    #[must_use]
    pub const fn new(index: usize, fields: Map<String, Value>) -> Self {
        Self { index, fields }
    }

    /// Parse a JSON value as a record. `line` is only used for error reporting.
    pub fn from_value(index: usize, line: usize, value: Value) -> Result<Self, RecordError> {
        match value {
            Value::Object(fields) => Ok(Self::new(index, fields)),
            other => Err(RecordError::NotAnObject {
                line,
                found: json_type_name(&other),
            }),
        }
    }

    /// Parse the `index`th element of a JSON array input as a record.
    pub fn from_element(index: usize, value: Value) -> Result<Self, RecordError> {
        match value {
            Value::Object(fields) => Ok(Self::new(index, fields)),
            other => Err(RecordError::NotAnObjectElement {
                element: index,
                found: json_type_name(&other),
            }),
        }
    }

    /// The free-form text substituted into the prompt. Missing or non-string is empty.
    #[must_use]
    pub fn source_text(&self) -> &str {
        self.str_field(SOURCE_TEXT_FIELD).map_or("", str::trim)
    }

    /// Local path or remote URL of the record's image, if it has a non-blank one.
    #[must_use]
    pub fn image_path(&self) -> Option<&str> {
        self.str_field(IMAGE_PATH_FIELD)
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Consume the record, returning its fields with `result` attached under `output_field`.
    #[must_use]
    pub fn into_output(self, output_field: &str, result: &EvaluationResult) -> Map<String, Value> {
        let mut fields = self.fields;
        fields.insert(output_field.to_string(), result.to_value());
        fields
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
