// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session log records and the fold that derives a session's current view.
//!
//! The log is append-only and is the only source of truth. Cached columns
//! (such as the session's state type) are conveniences that must always agree
//! with [`fold`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use runloom_values::{FunctionValue, Value};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{EngineError, Result};
use crate::ids::{Clock, SessionId};
use crate::state::{ProgramError, SessionState, SessionStateType, check_value};
use crate::store::SessionStore;

/// One outbound call as recorded before its first attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSpec {
    /// The function being called.
    pub function: FunctionValue,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments.
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
    /// Sequence number of the call within its session.
    pub seq: i64,
}

impl CallSpec {
    /// Check every argument strictly.
    pub fn strict_validate(&self) -> Result<()> {
        if self.seq < 0 {
            return Err(EngineError::invalid("seq", "must not be negative"));
        }
        check_value(&Value::Function(self.function.clone()), true, "function")?;
        for (i, arg) in self.args.iter().enumerate() {
            check_value(arg, true, &format!("args[{i}]"))?;
        }
        for (name, arg) in &self.kwargs {
            check_value(arg, true, &format!("kwargs.{name}"))?;
        }
        Ok(())
    }
}

/// What an attempt produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptResult {
    /// The call returned.
    Value(Value),
    /// The call raised.
    Error(ProgramError),
}

impl AttemptResult {
    /// Whether the call raised.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// The returned value, if any.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Error(_) => None,
        }
    }

    pub(crate) fn strict_validate(&self) -> Result<()> {
        match self {
            Self::Value(v) => check_value(v, true, "result"),
            Self::Error(e) => e.check(true),
        }
    }
}

/// The payload of a log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogData {
    /// Text printed by user code.
    Print {
        /// The printed text.
        text: String,
    },
    /// Someone asked for the session to stop.
    StopRequest {
        /// Why.
        reason: String,
    },
    /// The session changed state.
    State(SessionState),
    /// A call was recorded.
    CallSpec(CallSpec),
    /// An attempt at a call started.
    CallAttemptStart {
        /// Call sequence number.
        seq: i64,
        /// Attempt number.
        attempt: i64,
    },
    /// An attempt at a call finished.
    CallAttemptComplete {
        /// Call sequence number.
        seq: i64,
        /// Attempt number.
        attempt: i64,
        /// What the attempt produced.
        result: AttemptResult,
        /// No further attempt will follow.
        is_last: bool,
        /// Advisory backoff before the next attempt.
        #[serde(default, with = "retry_interval", skip_serializing_if = "Option::is_none")]
        retry_interval: Option<Duration>,
    },
}

impl LogData {
    /// Every kind string [`LogData::kind`] can return.
    pub const KINDS: [&'static str; 6] = [
        "print",
        "stop_request",
        "state",
        "call_spec",
        "call_attempt_start",
        "call_attempt_complete",
    ];

    /// Storage spelling of the record kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Print { .. } => "print",
            Self::StopRequest { .. } => "stop_request",
            Self::State(_) => "state",
            Self::CallSpec(_) => "call_spec",
            Self::CallAttemptStart { .. } => "call_attempt_start",
            Self::CallAttemptComplete { .. } => "call_attempt_complete",
        }
    }

    /// Decode a persisted record.
    ///
    /// # Panics
    ///
    /// An unrecognised `kind` means the log was written by an incompatible
    /// version or the store is corrupt, and panics.
    pub fn decode(kind: &str, data: &str) -> Result<Self> {
        if !Self::KINDS.contains(&kind) {
            panic!("unrecognised session log record kind '{kind}'");
        }
        let decoded: Self = serde_json::from_str(data)?;
        if decoded.kind() != kind {
            return Err(EngineError::DatabaseError {
                operation: "decode_log_record".to_string(),
                details: format!("record kind '{}' stored as '{}'", decoded.kind(), kind),
            });
        }
        Ok(decoded)
    }

    /// Encode for storage.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check the payload before it is persisted.
    pub fn strict_validate(&self) -> Result<()> {
        match self {
            Self::Print { .. } | Self::StopRequest { .. } => Ok(()),
            Self::State(state) => state.strict_validate(),
            Self::CallSpec(spec) => spec.strict_validate(),
            Self::CallAttemptStart { seq, attempt } => check_position(*seq, *attempt),
            Self::CallAttemptComplete {
                seq,
                attempt,
                result,
                ..
            } => {
                check_position(*seq, *attempt)?;
                result.strict_validate()
            }
        }
    }
}

fn check_position(seq: i64, attempt: i64) -> Result<()> {
    if seq < 0 {
        return Err(EngineError::invalid("seq", "must not be negative"));
    }
    if attempt < 0 {
        return Err(EngineError::invalid("attempt", "must not be negative"));
    }
    Ok(())
}

/// Durations as integer milliseconds.
mod retry_interval {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_u64(d.as_millis() as u64),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// A timestamped log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLogRecord {
    /// When the record was appended.
    pub t: DateTime<Utc>,
    /// The process that produced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,
    /// The payload.
    pub data: LogData,
}

impl SessionLogRecord {
    /// Stamp `data` with a time and producer.
    pub fn new(t: DateTime<Utc>, process_id: Option<String>, data: LogData) -> Self {
        Self {
            t,
            process_id,
            data,
        }
    }

    /// The state carried by a `State` record.
    pub fn state(&self) -> Option<&SessionState> {
        match &self.data {
            LogData::State(s) => Some(s),
            _ => None,
        }
    }
}

/// How an attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptCompletion {
    /// What the attempt produced.
    pub result: AttemptResult,
    /// No further attempt will follow.
    pub is_last: bool,
    /// Advisory backoff before the next attempt.
    pub retry_interval: Option<Duration>,
    /// When the completion was recorded.
    pub completed_at: DateTime<Utc>,
}

/// One attempt at one call: a start plus at most one completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CallAttempt {
    /// Call sequence number.
    pub seq: i64,
    /// Attempt number.
    pub attempt: i64,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// Set once the attempt completes.
    pub completion: Option<AttemptCompletion>,
}

impl CallAttempt {
    /// Whether the attempt has completed.
    pub fn is_completed(&self) -> bool {
        self.completion.is_some()
    }

    /// The attempt's result, if completed.
    pub fn result(&self) -> Option<&AttemptResult> {
        self.completion.as_ref().map(|c| &c.result)
    }
}

/// The current view of a session, derived from its log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionView {
    /// Payload of the last `State` record.
    pub state: Option<SessionState>,
    /// Recorded calls, by sequence number.
    pub calls: BTreeMap<i64, CallSpec>,
    /// Highest-numbered attempt of each call, by sequence number.
    pub latest_attempts: BTreeMap<i64, CallAttempt>,
    /// Everything printed so far.
    pub prints: Vec<String>,
    /// Reason of a stop request not yet followed by a terminal state.
    pub stop_requested: Option<String>,
}

impl SessionView {
    /// Kind of the current state.
    pub fn state_type(&self) -> Option<SessionStateType> {
        self.state.as_ref().map(SessionState::state_type)
    }
}

/// Fold a session's log, in append order, into its current view.
pub fn fold<'a>(records: impl IntoIterator<Item = &'a SessionLogRecord>) -> SessionView {
    let mut view = SessionView::default();

    for record in records {
        match &record.data {
            LogData::Print { text } => view.prints.push(text.clone()),
            LogData::StopRequest { reason } => {
                if !view.state.as_ref().is_some_and(SessionState::is_terminal) {
                    view.stop_requested = Some(reason.clone());
                }
            }
            LogData::State(state) => {
                if state.is_terminal() {
                    view.stop_requested = None;
                }
                view.state = Some(state.clone());
            }
            LogData::CallSpec(spec) => {
                view.calls.insert(spec.seq, spec.clone());
            }
            LogData::CallAttemptStart { seq, attempt } => {
                let newer = view
                    .latest_attempts
                    .get(seq)
                    .is_none_or(|latest| *attempt > latest.attempt);
                if newer {
                    view.latest_attempts.insert(
                        *seq,
                        CallAttempt {
                            seq: *seq,
                            attempt: *attempt,
                            started_at: record.t,
                            completion: None,
                        },
                    );
                }
            }
            LogData::CallAttemptComplete {
                seq,
                attempt,
                result,
                is_last,
                retry_interval,
            } => {
                if let Some(latest) = view.latest_attempts.get_mut(seq)
                    && latest.attempt == *attempt
                {
                    latest.completion = Some(AttemptCompletion {
                        result: result.clone(),
                        is_last: *is_last,
                        retry_interval: *retry_interval,
                        completed_at: record.t,
                    });
                }
            }
        }
    }

    view
}

/// Appends to, reads and folds session logs held by a [`SessionStore`].
///
/// Call specs and attempts have their own rows and go through
/// [`crate::tracker::CallTracker`]; this type only appends prints, stop
/// requests and state records.
#[derive(Clone)]
pub struct SessionLog {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    process_id: Option<String>,
}

impl std::fmt::Debug for SessionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLog")
            .field("store", &"...")
            .field("process_id", &self.process_id)
            .finish()
    }
}

impl SessionLog {
    /// A log over `store`, stamping records with `clock` and `process_id`.
    pub fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        process_id: Option<String>,
    ) -> Self {
        Self {
            store,
            clock,
            process_id,
        }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// The clock stamping records.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Stamp `data` without persisting it.
    pub fn stamp(&self, data: LogData) -> SessionLogRecord {
        SessionLogRecord::new(self.clock.now(), self.process_id.clone(), data)
    }

    /// Validate, stamp and append a record.
    #[instrument(skip(self, data), fields(session_id = %session_id, kind = data.kind()))]
    pub async fn append(&self, session_id: &SessionId, data: LogData) -> Result<SessionLogRecord> {
        if matches!(
            data,
            LogData::CallSpec(_)
                | LogData::CallAttemptStart { .. }
                | LogData::CallAttemptComplete { .. }
        ) {
            return Err(EngineError::invalid(
                "kind",
                format!("'{}' records are appended by the call tracker", data.kind()),
            ));
        }
        data.strict_validate()?;

        let record = self.stamp(data);
        self.store.append_log_record(session_id, &record).await?;

        match record.state() {
            Some(state) => info!(state = %state.state_type(), "Session state changed"),
            None => debug!("Log record appended"),
        }
        Ok(record)
    }

    /// Every record persisted so far, in append order.
    pub async fn read(&self, session_id: &SessionId) -> Result<Vec<SessionLogRecord>> {
        self.store.list_log_records(session_id).await
    }

    /// The session's current view.
    pub async fn fold(&self, session_id: &SessionId) -> Result<SessionView> {
        Ok(fold(&self.read(session_id).await?))
    }
}
