// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for runloom-core.
//!
//! Every failure surfaced by the tracker, the session service and the stores
//! is an [`EngineError`]. Callers that need to map errors onto a transport
//! use [`EngineError::error_code`] or [`EngineError::kind`].

use std::fmt;

use runloom_values::ValueError;

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Coarse classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The addressed session, call spec or attempt does not exist.
    NotFound,
    /// The request itself is malformed.
    InvalidArgument,
    /// The request is well-formed but not allowed in the current state.
    FailedPrecondition,
    /// The record being created is already present.
    AlreadyExists,
    /// Storage or encoding failure.
    Internal,
}

/// Errors raised by the session engine.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum EngineError {
    /// Session was not found.
    SessionNotFound {
        /// The session ID that was not found.
        session_id: String,
    },

    /// No attempt matches the query.
    AttemptNotFound {
        /// The session ID.
        session_id: String,
        /// Call sequence number.
        seq: i64,
        /// Requested attempt; `-1` means "latest completed".
        attempt: i64,
    },

    /// No call spec has been recorded for the sequence number.
    CallSpecNotFound {
        /// The session ID.
        session_id: String,
        /// Call sequence number.
        seq: i64,
    },

    /// A request field is missing or malformed.
    InvalidArgument {
        /// The offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// The session cannot move between the two states.
    InvalidTransition {
        /// The session ID.
        session_id: String,
        /// Current state type.
        from: String,
        /// Requested state type.
        to: String,
    },

    /// A record with the same key already exists.
    AlreadyExists {
        /// Kind of record.
        entity: &'static str,
        /// Its key.
        key: String,
    },

    /// A value could not be built, validated or converted.
    ValueError {
        /// Error details.
        details: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl EngineError {
    /// Shorthand for [`EngineError::InvalidArgument`].
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            Self::AttemptNotFound { .. } => "ATTEMPT_NOT_FOUND",
            Self::CallSpecNotFound { .. } => "CALL_SPEC_NOT_FOUND",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::ValueError { .. } => "VALUE_ERROR",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionNotFound { .. }
            | Self::AttemptNotFound { .. }
            | Self::CallSpecNotFound { .. } => ErrorKind::NotFound,
            Self::InvalidArgument { .. } | Self::ValueError { .. } => ErrorKind::InvalidArgument,
            Self::InvalidTransition { .. } => ErrorKind::FailedPrecondition,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::DatabaseError { .. } => ErrorKind::Internal,
        }
    }

    /// Whether this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionNotFound { session_id } => {
                write!(f, "Session '{}' not found", session_id)
            }
            Self::AttemptNotFound {
                session_id,
                seq,
                attempt,
            } => {
                if *attempt < 0 {
                    write!(
                        f,
                        "No completed attempt for call {} in session '{}'",
                        seq, session_id
                    )
                } else {
                    write!(
                        f,
                        "Attempt {} of call {} not found in session '{}'",
                        attempt, seq, session_id
                    )
                }
            }
            Self::CallSpecNotFound { session_id, seq } => {
                write!(f, "Call {} not recorded in session '{}'", seq, session_id)
            }
            Self::InvalidArgument { field, message } => {
                write!(f, "Invalid argument '{}': {}", field, message)
            }
            Self::InvalidTransition {
                session_id,
                from,
                to,
            } => {
                write!(
                    f,
                    "Session '{}' cannot transition from '{}' to '{}'",
                    session_id, from, to
                )
            }
            Self::AlreadyExists { entity, key } => {
                write!(f, "{} '{}' already exists", entity, key)
            }
            Self::ValueError { details } => write!(f, "Value error: {}", details),
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db) = err.as_database_error()
            && db.is_unique_violation()
        {
            return EngineError::AlreadyExists {
                entity: "record",
                key: db.constraint().unwrap_or("unique").to_string(),
            };
        }
        EngineError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for EngineError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        EngineError::DatabaseError {
            operation: "migrate".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<ValueError> for EngineError {
    fn from(err: ValueError) -> Self {
        match err {
            ValueError::InvalidArgument { field, message } => {
                EngineError::InvalidArgument { field, message }
            }
            other => EngineError::ValueError {
                details: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_and_kinds() {
        let test_cases = vec![
            (
                EngineError::SessionNotFound {
                    session_id: "ses_1".to_string(),
                },
                "SESSION_NOT_FOUND",
                ErrorKind::NotFound,
            ),
            (
                EngineError::AttemptNotFound {
                    session_id: "ses_1".to_string(),
                    seq: 0,
                    attempt: -1,
                },
                "ATTEMPT_NOT_FOUND",
                ErrorKind::NotFound,
            ),
            (
                EngineError::CallSpecNotFound {
                    session_id: "ses_1".to_string(),
                    seq: 2,
                },
                "CALL_SPEC_NOT_FOUND",
                ErrorKind::NotFound,
            ),
            (
                EngineError::invalid("seq", "duplicate"),
                "INVALID_ARGUMENT",
                ErrorKind::InvalidArgument,
            ),
            (
                EngineError::InvalidTransition {
                    session_id: "ses_1".to_string(),
                    from: "completed".to_string(),
                    to: "running".to_string(),
                },
                "INVALID_TRANSITION",
                ErrorKind::FailedPrecondition,
            ),
            (
                EngineError::AlreadyExists {
                    entity: "session",
                    key: "ses_1".to_string(),
                },
                "ALREADY_EXISTS",
                ErrorKind::AlreadyExists,
            ),
            (
                EngineError::ValueError {
                    details: "duplicate key".to_string(),
                },
                "VALUE_ERROR",
                ErrorKind::InvalidArgument,
            ),
            (
                EngineError::DatabaseError {
                    operation: "insert".to_string(),
                    details: "connection refused".to_string(),
                },
                "DATABASE_ERROR",
                ErrorKind::Internal,
            ),
        ];

        for (error, code, kind) in test_cases {
            assert_eq!(error.error_code(), code, "{:?}", error);
            assert_eq!(error.kind(), kind, "{:?}", error);
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_attempt_not_found_display() {
        let latest = EngineError::AttemptNotFound {
            session_id: "ses_1".to_string(),
            seq: 3,
            attempt: -1,
        };
        assert_eq!(
            latest.to_string(),
            "No completed attempt for call 3 in session 'ses_1'"
        );

        let specific = EngineError::AttemptNotFound {
            session_id: "ses_1".to_string(),
            seq: 3,
            attempt: 1,
        };
        assert_eq!(
            specific.to_string(),
            "Attempt 1 of call 3 not found in session 'ses_1'"
        );
    }

    #[test]
    fn test_value_error_conversion() {
        let err: EngineError = ValueError::invalid("return_value", "missing").into();
        assert!(matches!(
            err,
            EngineError::InvalidArgument { ref field, .. } if field == "return_value"
        ));

        let err: EngineError = ValueError::DuplicateKey("a".to_string()).into();
        assert_eq!(err.error_code(), "VALUE_ERROR");
    }
}
