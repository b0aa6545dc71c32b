use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building or validating an [`crate::ir::Ir`].
///
/// Validation errors carry a field path (dotted, matching the offending
/// JSON pointer-ish location) so callers can surface the same
/// "validation failed at field X" messages the Python reference raises.
#[derive(Error, Debug)]
pub enum Error {
    #[error("validation failed at {field}: {message}")]
    Validation { field: String, message: String },

    #[error("safety refusal: {0}")]
    SafetyRefusal(String),

    #[error("invalid ISO-8601 duration: {0}")]
    InvalidDuration(String),

    #[error("invalid ISO-8601 timestamp: {0}")]
    InvalidTimestamp(String),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}
