//! Error types for the value codec.

use tablet_common::error::TabletError;
use thiserror::Error;

/// Errors that can occur while encoding or decoding wire values.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Truncated input: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Unknown bind variable tag: {0}")]
    UnknownTag(u8),

    #[error("Payload of {actual} bytes does not match tag {tag} (expected {expected})")]
    PayloadMismatch {
        tag: u8,
        expected: String,
        actual: usize,
    },

    #[error("{remaining} trailing bytes after '{field}'")]
    TrailingBytes { field: String, remaining: usize },

    #[error("Unknown field type: {0}")]
    UnknownFieldType(u8),

    #[error("Invalid UTF-8 in field '{field}': {source}")]
    InvalidUtf8 {
        field: String,
        source: std::string::FromUtf8Error,
    },

    #[error("Invalid cell for column '{column}': {reason}")]
    InvalidCell { column: String, reason: String },

    #[error("Row has {actual} cells, result has {expected} fields")]
    RowWidth { expected: usize, actual: usize },

    #[error("{0} rows declared with zero columns")]
    ZeroWidthRows(usize),

    #[error("{0} value cannot be a result cell")]
    NonScalarCell(&'static str),

    #[error("Bind variable '{0}' is an empty list")]
    EmptyList(String),

    #[error("Bind variable name is empty")]
    EmptyName,

    #[error("'{field}' too long: {len} bytes (max {max})")]
    TooLong { field: String, len: usize, max: usize },
}

impl From<ProtocolError> for TabletError {
    fn from(e: ProtocolError) -> Self {
        TabletError::Malformed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablet_common::error::ErrorKind;

    #[test]
    fn test_converts_to_malformed() {
        let err: TabletError = ProtocolError::UnknownTag(42).into();
        assert_eq!(err.kind(), ErrorKind::Malformed);
        assert!(err.to_string().contains("42"));
    }
}
