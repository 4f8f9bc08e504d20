// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed session store.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{EngineError, Result};
use crate::ids::SessionId;
use crate::log::{AttemptCompletion, CallAttempt, CallSpec, LogData, SessionLogRecord};
use crate::migrations;
use crate::session::{SessionFilter, SessionRecord};
use crate::state::{SessionStateType, check_transition};

use super::{
    AttemptRow, LogRow, SessionRow, SessionStore, already_completed, attempt_not_found,
    check_state_record, require_live, retry_interval_ms, session_not_found, unique_as,
};

/// SQLite-backed session store.
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Wrap an existing pool. The schema must already be migrated.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `path` and migrate it.
    ///
    /// ```ignore
    /// let store = SqliteSessionStore::from_path(".data/runloom.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url, 5).await
    }

    /// Connect to `url` and migrate the schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| EngineError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {}: {}", url, e),
            })?;

        migrations::run_sqlite(&pool).await?;

        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn insert_log(
    conn: &mut SqliteConnection,
    session_id: &SessionId,
    record: &SessionLogRecord,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO session_log (session_id, kind, data, process_id, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(session_id.as_str())
    .bind(record.data.kind())
    .bind(record.data.encode()?)
    .bind(record.process_id.as_deref())
    .bind(record.t)
    .execute(conn)
    .await?;

    Ok(())
}

async fn require_session(conn: &mut SqliteConnection, session_id: &SessionId) -> Result<()> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM sessions WHERE session_id = ?")
        .bind(session_id.as_str())
        .fetch_optional(conn)
        .await?;
    found.map(|_| ()).ok_or_else(|| session_not_found(session_id))
}

async fn session_state(conn: &mut SqliteConnection, session_id: &SessionId) -> Result<SessionStateType> {
    let state: Option<String> =
        sqlx::query_scalar("SELECT state_type FROM sessions WHERE session_id = ?")
            .bind(session_id.as_str())
            .fetch_optional(conn)
            .await?;
    state.ok_or_else(|| session_not_found(session_id))?.parse()
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create_session(
        &self,
        session: &SessionRecord,
        created: &SessionLogRecord,
    ) -> Result<()> {
        if let LogData::State(state) = &created.data {
            check_transition(session.session_id.as_str(), None, state.state_type())?;
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, deployment_id, event_id, entrypoint_path,
                                  entrypoint_name, inputs, memo, state_type, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session.session_id.as_str())
        .bind(session.deployment_id.as_str())
        .bind(session.event_id.as_ref().map(|e| e.as_str()))
        .bind(&session.entrypoint.path)
        .bind(&session.entrypoint.name)
        .bind(serde_json::to_string(&session.inputs)?)
        .bind(serde_json::to_string(&session.memo)?)
        .bind(session.state_type.as_str())
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| unique_as(e, "session", session.session_id.to_string()))?;

        insert_log(&mut tx, &session.session_id, created).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_session(&self, session_id: &SessionId) -> Result<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT session_id, deployment_id, event_id, entrypoint_path, entrypoint_name,
                   inputs, memo, state_type, created_at, updated_at
            FROM sessions
            WHERE session_id = ?
            "#,
        )
        .bind(session_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SessionRecord::try_from).transpose()
    }

    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<SessionRecord>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT session_id, deployment_id, event_id, entrypoint_path, entrypoint_name,
                   inputs, memo, state_type, created_at, updated_at
            FROM sessions
            WHERE (?1 IS NULL OR deployment_id = ?1)
              AND (?2 IS NULL OR state_type = ?2)
            ORDER BY created_at DESC, session_id DESC
            LIMIT ?3 OFFSET ?4
            "#,
        )
        .bind(filter.deployment_id.as_ref().map(|d| d.as_str()))
        .bind(filter.state_type.map(|s| s.as_str()))
        .bind(i64::from(filter.effective_limit()))
        .bind(i64::from(filter.offset.unwrap_or(0)))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SessionRecord::try_from).collect()
    }

    async fn count_sessions(&self, filter: &SessionFilter) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM sessions
            WHERE (?1 IS NULL OR deployment_id = ?1)
              AND (?2 IS NULL OR state_type = ?2)
            "#,
        )
        .bind(filter.deployment_id.as_ref().map(|d| d.as_str()))
        .bind(filter.state_type.map(|s| s.as_str()))
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn append_log_record(
        &self,
        session_id: &SessionId,
        record: &SessionLogRecord,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT state_type FROM sessions WHERE session_id = ?")
                .bind(session_id.as_str())
                .fetch_optional(&mut *tx)
                .await?;
        let current: SessionStateType = current
            .ok_or_else(|| session_not_found(session_id))?
            .parse()?;

        if let Some(next) = check_state_record(session_id, current, record)? {
            // Guarded on the state read above.
            let result = sqlx::query(
                r#"
                UPDATE sessions
                SET state_type = ?, updated_at = ?
                WHERE session_id = ? AND state_type = ?
                "#,
            )
            .bind(next.as_str())
            .bind(record.t)
            .bind(session_id.as_str())
            .bind(current.as_str())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(EngineError::InvalidTransition {
                    session_id: session_id.to_string(),
                    from: current.to_string(),
                    to: next.to_string(),
                });
            }
        }

        insert_log(&mut tx, session_id, record).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_log_records(&self, session_id: &SessionId) -> Result<Vec<SessionLogRecord>> {
        let mut conn = self.pool.acquire().await?;
        require_session(&mut conn, session_id).await?;

        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT kind, data, process_id, created_at
            FROM session_log
            WHERE session_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(session_id.as_str())
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(SessionLogRecord::try_from).collect()
    }

    async fn create_call_spec(
        &self,
        session_id: &SessionId,
        spec: &CallSpec,
        record: &SessionLogRecord,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        require_session(&mut tx, session_id).await?;

        sqlx::query(
            r#"
            INSERT INTO call_specs (session_id, seq, spec, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(session_id.as_str())
        .bind(spec.seq)
        .bind(serde_json::to_string(spec)?)
        .bind(record.t)
        .execute(&mut *tx)
        .await
        .map_err(|e| unique_as(e, "call spec", format!("{}/{}", session_id, spec.seq)))?;

        insert_log(&mut tx, session_id, record).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_call_spec(&self, session_id: &SessionId, seq: i64) -> Result<Option<CallSpec>> {
        let spec: Option<String> =
            sqlx::query_scalar("SELECT spec FROM call_specs WHERE session_id = ? AND seq = ?")
                .bind(session_id.as_str())
                .bind(seq)
                .fetch_optional(&self.pool)
                .await?;

        Ok(spec.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    async fn count_attempts(&self, session_id: &SessionId, seq: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM call_attempts WHERE session_id = ? AND seq = ?",
        )
        .bind(session_id.as_str())
        .bind(seq)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn create_attempt_start(
        &self,
        session_id: &SessionId,
        seq: i64,
        attempt: i64,
        record: &SessionLogRecord,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let current = session_state(&mut tx, session_id).await?;
        require_live(session_id, current)?;

        let spec: Option<i64> =
            sqlx::query_scalar("SELECT seq FROM call_specs WHERE session_id = ? AND seq = ?")
                .bind(session_id.as_str())
                .bind(seq)
                .fetch_optional(&mut *tx)
                .await?;
        if spec.is_none() {
            return Err(EngineError::CallSpecNotFound {
                session_id: session_id.to_string(),
                seq,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO call_attempts (session_id, seq, attempt, started_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(session_id.as_str())
        .bind(seq)
        .bind(attempt)
        .bind(record.t)
        .execute(&mut *tx)
        .await
        .map_err(|e| unique_as(e, "attempt", format!("{}/{}/{}", session_id, seq, attempt)))?;

        insert_log(&mut tx, session_id, record).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_attempt_complete(
        &self,
        session_id: &SessionId,
        seq: i64,
        attempt: i64,
        completion: &AttemptCompletion,
        record: &SessionLogRecord,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE call_attempts
            SET completed_at = ?, result = ?, is_last = ?, retry_interval_ms = ?
            WHERE session_id = ? AND seq = ? AND attempt = ? AND completed_at IS NULL
            "#,
        )
        .bind(completion.completed_at)
        .bind(serde_json::to_string(&completion.result)?)
        .bind(completion.is_last)
        .bind(retry_interval_ms(completion))
        .bind(session_id.as_str())
        .bind(seq)
        .bind(attempt)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists: Option<i64> = sqlx::query_scalar(
                "SELECT attempt FROM call_attempts WHERE session_id = ? AND seq = ? AND attempt = ?",
            )
            .bind(session_id.as_str())
            .bind(seq)
            .bind(attempt)
            .fetch_optional(&mut *tx)
            .await?;
            return Err(match exists {
                Some(_) => already_completed(session_id, seq, attempt),
                None => attempt_not_found(session_id, seq, attempt),
            });
        }

        insert_log(&mut tx, session_id, record).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_attempt(
        &self,
        session_id: &SessionId,
        seq: i64,
        attempt: i64,
    ) -> Result<Option<CallAttempt>> {
        let row = sqlx::query_as::<_, AttemptRow>(
            r#"
            SELECT seq, attempt, started_at, completed_at, result, is_last, retry_interval_ms
            FROM call_attempts
            WHERE session_id = ? AND seq = ? AND attempt = ?
            "#,
        )
        .bind(session_id.as_str())
        .bind(seq)
        .bind(attempt)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CallAttempt::try_from).transpose()
    }

    async fn latest_completed_attempt(
        &self,
        session_id: &SessionId,
        seq: i64,
    ) -> Result<Option<CallAttempt>> {
        let row = sqlx::query_as::<_, AttemptRow>(
            r#"
            SELECT seq, attempt, started_at, completed_at, result, is_last, retry_interval_ms
            FROM call_attempts
            WHERE session_id = ? AND seq = ? AND completed_at IS NOT NULL
            ORDER BY attempt DESC
            LIMIT 1
            "#,
        )
        .bind(session_id.as_str())
        .bind(seq)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CallAttempt::try_from).transpose()
    }

    async fn health_check(&self) -> Result<bool> {
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }
}
