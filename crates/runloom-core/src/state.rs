// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session states and the transitions allowed between them.
//!
//! ```text
//! Created ──► Running ──┬─► Completed
//!                       ├─► Error
//!                       └─► Stopped
//! ```
//!
//! There is no in-memory cursor: the current state of a session is whatever
//! the last `State` record in its log says (see [`crate::log::fold`]).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use runloom_values::Value;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::ids::RunId;

/// A failure captured from user code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramError {
    /// Human-readable message.
    pub message: String,
    /// Call stack frames, innermost last.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub callstack: Vec<String>,
    /// Structured detail supplied by the runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

impl ProgramError {
    /// An error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            callstack: Vec::new(),
            extra: None,
        }
    }

    /// Attach a call stack.
    pub fn with_callstack(mut self, callstack: Vec<String>) -> Self {
        self.callstack = callstack;
        self
    }

    /// Attach structured detail.
    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = Some(extra);
        self
    }

    pub(crate) fn check(&self, strict: bool) -> Result<()> {
        if strict && self.message.trim().is_empty() {
            return Err(EngineError::invalid("error.message", "missing"));
        }
        if let Some(extra) = &self.extra {
            check_value(extra, strict, "error.extra")?;
        }
        Ok(())
    }
}

impl fmt::Display for ProgramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Validate a value, prefixing any field path with `field`.
pub(crate) fn check_value(value: &Value, strict: bool, field: &str) -> Result<()> {
    let checked = if strict {
        value.strict_validate()
    } else {
        value.validate()
    };
    checked.map_err(|e| match EngineError::from(e) {
        EngineError::InvalidArgument { field: inner, message } => {
            EngineError::invalid(format!("{field}.{inner}"), message)
        }
        EngineError::ValueError { details } => EngineError::invalid(field, details),
        other => other,
    })
}

/// The state payload recorded in a session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// The session exists but no worker has claimed it.
    Created,
    /// A worker is executing the session.
    Running {
        /// The run executing the session.
        run_id: RunId,
        /// The call currently in flight, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call: Option<Value>,
    },
    /// The entrypoint returned.
    Completed {
        /// Everything printed during the run.
        #[serde(default)]
        prints: Vec<String>,
        /// Bindings exported by the entrypoint.
        #[serde(default)]
        exports: BTreeMap<String, Value>,
        /// The entrypoint's return value. Required by strict validation.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        return_value: Option<Value>,
    },
    /// The entrypoint, or a call it made, failed.
    Error {
        /// Everything printed during the run.
        #[serde(default)]
        prints: Vec<String>,
        /// The failure.
        error: ProgramError,
    },
    /// The session was stopped on request.
    Stopped {
        /// Why it was stopped.
        reason: String,
    },
}

impl SessionState {
    /// A running state with no call in flight.
    pub fn running(run_id: RunId) -> Self {
        Self::Running { run_id, call: None }
    }

    /// A completed state.
    pub fn completed(
        prints: Vec<String>,
        exports: BTreeMap<String, Value>,
        return_value: Value,
    ) -> Self {
        Self::Completed {
            prints,
            exports,
            return_value: Some(return_value),
        }
    }

    /// An error state.
    pub fn error(prints: Vec<String>, error: ProgramError) -> Self {
        Self::Error { prints, error }
    }

    /// A stopped state.
    pub fn stopped(reason: impl Into<String>) -> Self {
        Self::Stopped {
            reason: reason.into(),
        }
    }

    /// Which variant this is.
    pub fn state_type(&self) -> SessionStateType {
        match self {
            Self::Created => SessionStateType::Created,
            Self::Running { .. } => SessionStateType::Running,
            Self::Completed { .. } => SessionStateType::Completed,
            Self::Error { .. } => SessionStateType::Error,
            Self::Stopped { .. } => SessionStateType::Stopped,
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        self.state_type().is_terminal()
    }

    /// Check fields that are present.
    pub fn validate(&self) -> Result<()> {
        self.check(false)
    }

    /// Check that every mandatory field is present and well-formed.
    pub fn strict_validate(&self) -> Result<()> {
        self.check(true)
    }

    fn check(&self, strict: bool) -> Result<()> {
        match self {
            Self::Created | Self::Stopped { .. } => Ok(()),
            Self::Running { call, .. } => match call {
                Some(call) => check_value(call, strict, "call"),
                None => Ok(()),
            },
            Self::Completed {
                exports,
                return_value,
                ..
            } => {
                match return_value {
                    Some(value) => check_value(value, strict, "return_value")?,
                    None if strict => {
                        return Err(EngineError::invalid("return_value", "missing"));
                    }
                    None => {}
                }
                for (name, value) in exports {
                    check_value(value, strict, &format!("exports.{name}"))?;
                }
                Ok(())
            }
            Self::Error { error, .. } => error.check(strict),
        }
    }
}

/// The kind of a [`SessionState`], as cached on the session row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStateType {
    /// See [`SessionState::Created`].
    Created,
    /// See [`SessionState::Running`].
    Running,
    /// See [`SessionState::Completed`].
    Completed,
    /// See [`SessionState::Error`].
    Error,
    /// See [`SessionState::Stopped`].
    Stopped,
}

impl SessionStateType {
    /// Storage spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Stopped => "stopped",
        }
    }

    /// Completed, Error and Stopped are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Stopped)
    }

    /// Whether a session in this state may move to `next`.
    pub fn can_transition_to(&self, next: SessionStateType) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Error)
                | (Self::Running, Self::Stopped)
        )
    }
}

impl fmt::Display for SessionStateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStateType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            "stopped" => Ok(Self::Stopped),
            other => Err(EngineError::invalid(
                "state_type",
                format!("unknown state type '{}'", other),
            )),
        }
    }
}

/// Fail unless a session currently in `from` may move to `to`.
///
/// `from` is `None` only for a session with no state record at all, which
/// may only receive `Created`.
pub fn check_transition(
    session_id: &str,
    from: Option<SessionStateType>,
    to: SessionStateType,
) -> Result<()> {
    let allowed = match from {
        None => to == SessionStateType::Created,
        Some(from) => from.can_transition_to(to),
    };
    if allowed {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            session_id: session_id.to_string(),
            from: from.map_or("none", |s| s.as_str()).to_string(),
            to: to.as_str().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runloom_values::{ExecutorId, FunctionValue};

    fn run_id() -> RunId {
        RunId::parse("run_1").unwrap()
    }

    #[test]
    fn test_allowed_transitions() {
        use SessionStateType::*;

        assert!(check_transition("ses_1", None, Created).is_ok());
        assert!(check_transition("ses_1", Some(Created), Running).is_ok());
        assert!(check_transition("ses_1", Some(Running), Completed).is_ok());
        assert!(check_transition("ses_1", Some(Running), Error).is_ok());
        assert!(check_transition("ses_1", Some(Running), Stopped).is_ok());
    }

    #[test]
    fn test_rejected_transitions() {
        use SessionStateType::*;

        let rejected = [
            (None, Running),
            (Some(Created), Created),
            (Some(Created), Completed),
            (Some(Created), Stopped),
            (Some(Running), Running),
            (Some(Completed), Running),
            (Some(Error), Stopped),
            (Some(Stopped), Running),
            (Some(Stopped), Completed),
        ];
        for (from, to) in rejected {
            let err = check_transition("ses_1", from, to).unwrap_err();
            assert_eq!(err.error_code(), "INVALID_TRANSITION", "{from:?} -> {to:?}");
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SessionState::Created.is_terminal());
        assert!(!SessionState::running(run_id()).is_terminal());
        assert!(SessionState::stopped("bye").is_terminal());
        assert!(SessionState::error(vec![], ProgramError::new("boom")).is_terminal());
    }

    #[test]
    fn test_completed_requires_return_value() {
        let state = SessionState::Completed {
            prints: vec![],
            exports: BTreeMap::new(),
            return_value: None,
        };
        assert!(state.validate().is_ok());

        let err = state.strict_validate().unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidArgument { ref field, .. } if field == "return_value"
        ));

        let ok = SessionState::completed(vec![], BTreeMap::new(), Value::Integer(1));
        assert!(ok.strict_validate().is_ok());
    }

    #[test]
    fn test_strict_validation_reaches_nested_values() {
        let incomplete = Value::Function(FunctionValue::new(ExecutorId::default(), "f"));
        let mut exports = BTreeMap::new();
        exports.insert("handler".to_string(), incomplete);
        let state = SessionState::completed(vec![], exports, Value::Nothing);

        assert!(state.validate().is_ok());
        let err = state.strict_validate().unwrap_err();
        assert!(
            matches!(err, EngineError::InvalidArgument { ref field, .. } if field.starts_with("exports.handler")),
            "{err}"
        );
    }

    #[test]
    fn test_error_requires_message() {
        let state = SessionState::error(vec![], ProgramError::new(""));
        assert!(state.validate().is_ok());
        assert!(state.strict_validate().is_err());
    }

    #[test]
    fn test_state_wire_form() {
        let state = SessionState::running(run_id());
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json, serde_json::json!({"running": {"run_id": "run_1"}}));
        assert_eq!(
            serde_json::to_value(SessionState::Created).unwrap(),
            serde_json::json!("created")
        );
    }

    #[test]
    fn test_state_type_parse() {
        for t in [
            SessionStateType::Created,
            SessionStateType::Running,
            SessionStateType::Completed,
            SessionStateType::Error,
            SessionStateType::Stopped,
        ] {
            assert_eq!(t.as_str().parse::<SessionStateType>().unwrap(), t);
        }
        assert!("paused".parse::<SessionStateType>().is_err());
    }
}
