// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for runloom-core.
//!
//! A [`SessionStore`] keeps sessions, their append-only logs, call specs and
//! call attempts. Every write that creates a row also appends the matching
//! log record, atomically.

pub mod memory;
pub mod postgres;
pub mod sqlite;

pub use self::memory::MemorySessionStore;
pub use self::postgres::PostgresSessionStore;
pub use self::sqlite::SqliteSessionStore;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use runloom_values::Value;

use crate::error::{EngineError, Result};
use crate::ids::{DeploymentId, EventId, SessionId};
use crate::log::{AttemptCompletion, AttemptResult, CallAttempt, CallSpec, LogData, SessionLogRecord};
use crate::session::{CodeLocation, SessionFilter, SessionRecord};
use crate::state::{SessionStateType, check_transition};

/// Storage for sessions and their logs.
///
/// Implementations must give read-your-writes consistency within a session
/// and enforce uniqueness of `(session, seq)` for call specs and of
/// `(session, seq, attempt)` for attempts.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a session together with its `Created` record.
    async fn create_session(
        &self,
        session: &SessionRecord,
        created: &SessionLogRecord,
    ) -> Result<()>;

    /// Fetch a session.
    async fn get_session(&self, session_id: &SessionId) -> Result<Option<SessionRecord>>;

    /// Sessions matching `filter`, newest first.
    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<SessionRecord>>;

    /// Number of sessions matching `filter`, ignoring paging.
    async fn count_sessions(&self, filter: &SessionFilter) -> Result<u64>;

    /// Append a record to a session's log.
    ///
    /// A `State` record is checked against the cached state type and updates
    /// it in the same transaction.
    async fn append_log_record(
        &self,
        session_id: &SessionId,
        record: &SessionLogRecord,
    ) -> Result<()>;

    /// Every record of a session's log, in append order.
    async fn list_log_records(&self, session_id: &SessionId) -> Result<Vec<SessionLogRecord>>;

    /// Insert a call spec together with its `CallSpec` record.
    async fn create_call_spec(
        &self,
        session_id: &SessionId,
        spec: &CallSpec,
        record: &SessionLogRecord,
    ) -> Result<()>;

    /// Fetch a call spec.
    async fn get_call_spec(&self, session_id: &SessionId, seq: i64) -> Result<Option<CallSpec>>;

    /// Number of attempts started for a call.
    async fn count_attempts(&self, session_id: &SessionId, seq: i64) -> Result<i64>;

    /// Insert an attempt together with its `CallAttemptStart` record.
    async fn create_attempt_start(
        &self,
        session_id: &SessionId,
        seq: i64,
        attempt: i64,
        record: &SessionLogRecord,
    ) -> Result<()>;

    /// Complete a started attempt together with its `CallAttemptComplete`
    /// record. Fails if the attempt never started or already completed.
    async fn update_attempt_complete(
        &self,
        session_id: &SessionId,
        seq: i64,
        attempt: i64,
        completion: &AttemptCompletion,
        record: &SessionLogRecord,
    ) -> Result<()>;

    /// Fetch one attempt.
    async fn get_attempt(
        &self,
        session_id: &SessionId,
        seq: i64,
        attempt: i64,
    ) -> Result<Option<CallAttempt>>;

    /// The highest-numbered completed attempt of a call.
    async fn latest_completed_attempt(
        &self,
        session_id: &SessionId,
        seq: i64,
    ) -> Result<Option<CallAttempt>>;

    /// Whether the backend is reachable.
    async fn health_check(&self) -> Result<bool>;
}

/// Check a `State` record against the session's current state type.
pub(crate) fn check_state_record(
    session_id: &SessionId,
    current: SessionStateType,
    record: &SessionLogRecord,
) -> Result<Option<SessionStateType>> {
    match &record.data {
        LogData::State(state) => {
            let next = state.state_type();
            check_transition(session_id.as_str(), Some(current), next)?;
            Ok(Some(next))
        }
        _ => Ok(None),
    }
}

/// Reject work on a session that has already ended.
pub(crate) fn require_live(session_id: &SessionId, current: SessionStateType) -> Result<()> {
    if current.is_terminal() {
        return Err(EngineError::InvalidTransition {
            session_id: session_id.to_string(),
            from: current.to_string(),
            to: "call attempt".to_string(),
        });
    }
    Ok(())
}

pub(crate) fn session_not_found(session_id: &SessionId) -> EngineError {
    EngineError::SessionNotFound {
        session_id: session_id.to_string(),
    }
}

pub(crate) fn attempt_not_found(session_id: &SessionId, seq: i64, attempt: i64) -> EngineError {
    EngineError::AttemptNotFound {
        session_id: session_id.to_string(),
        seq,
        attempt,
    }
}

/// Map a unique violation onto [`EngineError::AlreadyExists`] for `entity`.
pub(crate) fn unique_as(err: sqlx::Error, entity: &'static str, key: String) -> EngineError {
    match err.as_database_error() {
        Some(db) if db.is_unique_violation() => EngineError::AlreadyExists { entity, key },
        _ => err.into(),
    }
}

pub(crate) fn already_completed(session_id: &SessionId, seq: i64, attempt: i64) -> EngineError {
    EngineError::AlreadyExists {
        entity: "attempt completion",
        key: format!("{}/{}/{}", session_id, seq, attempt),
    }
}

/// Session row as stored by the SQL backends.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SessionRow {
    pub session_id: String,
    pub deployment_id: String,
    pub event_id: Option<String>,
    pub entrypoint_path: String,
    pub entrypoint_name: String,
    pub inputs: String,
    pub memo: String,
    pub state_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for SessionRecord {
    type Error = EngineError;

    fn try_from(row: SessionRow) -> Result<Self> {
        Ok(Self {
            session_id: SessionId::parse(row.session_id)?,
            deployment_id: DeploymentId::parse(row.deployment_id)?,
            event_id: row.event_id.map(EventId::parse).transpose()?,
            entrypoint: CodeLocation::new(row.entrypoint_path, row.entrypoint_name),
            inputs: serde_json::from_str::<BTreeMap<String, Value>>(&row.inputs)?,
            memo: serde_json::from_str::<BTreeMap<String, String>>(&row.memo)?,
            state_type: row.state_type.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Log row as stored by the SQL backends.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct LogRow {
    pub kind: String,
    pub data: String,
    pub process_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<LogRow> for SessionLogRecord {
    type Error = EngineError;

    fn try_from(row: LogRow) -> Result<Self> {
        Ok(Self {
            t: row.created_at,
            process_id: row.process_id,
            data: LogData::decode(&row.kind, &row.data)?,
        })
    }
}

/// Attempt row as stored by the SQL backends.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AttemptRow {
    pub seq: i64,
    pub attempt: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub is_last: Option<bool>,
    pub retry_interval_ms: Option<i64>,
}

impl TryFrom<AttemptRow> for CallAttempt {
    type Error = EngineError;

    fn try_from(row: AttemptRow) -> Result<Self> {
        let completion = match (row.completed_at, row.result) {
            (Some(completed_at), Some(result)) => Some(AttemptCompletion {
                result: serde_json::from_str::<AttemptResult>(&result)?,
                is_last: row.is_last.unwrap_or(false),
                retry_interval: row
                    .retry_interval_ms
                    .and_then(|ms| u64::try_from(ms).ok())
                    .map(Duration::from_millis),
                completed_at,
            }),
            _ => None,
        };
        Ok(Self {
            seq: row.seq,
            attempt: row.attempt,
            started_at: row.started_at,
            completion,
        })
    }
}

pub(crate) fn retry_interval_ms(completion: &AttemptCompletion) -> Option<i64> {
    completion
        .retry_interval
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
