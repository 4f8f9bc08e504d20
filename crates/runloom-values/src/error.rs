// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for value construction and conversion.

use std::fmt;

use thiserror::Error;

/// Result type using [`ValueError`].
pub type Result<T> = std::result::Result<T, ValueError>;

/// Errors raised while building, validating or converting values.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ValueError {
    /// The native value has a shape the codec cannot represent.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// Two dict entries have keys with the same content hash.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// The value kind does not fit the requested destination.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// What the destination accepts.
        expected: String,
        /// Kind of the value that was supplied.
        actual: &'static str,
    },

    /// A fixed-size destination received a sequence of a different length.
    #[error("length mismatch: expected {expected} elements, got {actual}")]
    LengthMismatch {
        /// Destination length.
        expected: usize,
        /// Source length.
        actual: usize,
    },

    /// The value carries a field the destination record does not declare.
    #[error("unknown field '{0}'")]
    UnknownField(String),

    /// A symbol name is not a valid identifier.
    #[error("invalid symbol '{0}'")]
    InvalidSymbol(String),

    /// A mandatory field is missing or malformed.
    #[error("invalid argument '{field}': {message}")]
    InvalidArgument {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Conversion of a sequence element failed.
    #[error("element {index}: {source}")]
    Element {
        /// Index of the element within its sequence.
        index: usize,
        /// Underlying failure.
        #[source]
        source: Box<ValueError>,
    },

    /// Conversion of a record field failed.
    #[error("field '{name}': {source}")]
    Field {
        /// Field name as it appears in the value.
        name: String,
        /// Underlying failure.
        #[source]
        source: Box<ValueError>,
    },

    /// Reading a byte stream failed.
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding of the wire form failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Free-form error raised by serde-derived code.
    #[error("{0}")]
    Custom(String),
}

impl ValueError {
    /// Shorthand for [`ValueError::InvalidArgument`].
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Prefix a field path onto an [`ValueError::InvalidArgument`], leaving other errors untouched.
    pub(crate) fn within(self, parent: &str) -> Self {
        match self {
            Self::InvalidArgument { field, message } => Self::InvalidArgument {
                field: format!("{parent}.{field}"),
                message,
            },
            other => other,
        }
    }

    pub(crate) fn at_index(self, index: usize) -> Self {
        Self::Element {
            index,
            source: Box::new(self),
        }
    }

    pub(crate) fn at_field(self, name: impl Into<String>) -> Self {
        Self::Field {
            name: name.into(),
            source: Box::new(self),
        }
    }
}

impl serde::ser::Error for ValueError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self::Custom(msg.to_string())
    }
}

impl serde::de::Error for ValueError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self::Custom(msg.to_string())
    }

    fn unknown_field(field: &str, _expected: &'static [&'static str]) -> Self {
        Self::UnknownField(field.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_prefixes_invalid_argument() {
        let err = ValueError::invalid("name", "missing").within("function");
        assert_eq!(err.to_string(), "invalid argument 'function.name': missing");
    }

    #[test]
    fn test_within_leaves_other_errors() {
        let err = ValueError::UnknownField("x".to_string()).within("record");
        assert!(matches!(err, ValueError::UnknownField(ref f) if f == "x"));
    }

    #[test]
    fn test_element_error_display() {
        let err = ValueError::UnsupportedType("fn item".to_string()).at_index(3);
        assert_eq!(err.to_string(), "element 3: unsupported type: fn item");
    }
}
