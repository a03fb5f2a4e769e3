//! Error types for sensor line parsing.

use thiserror::Error;

/// Errors that can occur when parsing a sensor line.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The line ended before the named field.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// A field was present but could not be converted.
    #[error("Invalid {field}: '{value}'")]
    InvalidField {
        /// Name of the field that failed to parse.
        field: &'static str,
        /// The raw text of the field.
        value: String,
    },
}

impl ParseError {
    /// Create an invalid field error.
    pub fn invalid(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            value: value.into(),
        }
    }
}

/// Result type alias using sht4x-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
