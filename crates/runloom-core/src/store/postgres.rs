// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed session store.
//!
//! JSON payloads live in `JSONB` columns. They are bound as text and cast on
//! the way in, and selected as `::text` on the way out so the row types are
//! shared with the SQLite backend.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};

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

/// PostgreSQL-backed session store.
#[derive(Clone)]
pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    /// Wrap an existing pool. The schema must already be migrated.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `url` and migrate the schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| EngineError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to PostgreSQL: {}", e),
            })?;

        migrations::run_postgres(&pool).await?;

        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn insert_log(
    conn: &mut PgConnection,
    session_id: &SessionId,
    record: &SessionLogRecord,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO session_log (session_id, kind, data, process_id, created_at)
        VALUES ($1, $2, $3::jsonb, $4, $5)
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

/// Lock the session row for the rest of the transaction.
async fn lock_session(conn: &mut PgConnection, session_id: &SessionId) -> Result<SessionStateType> {
    let state: Option<String> =
        sqlx::query_scalar("SELECT state_type FROM sessions WHERE session_id = $1 FOR UPDATE")
            .bind(session_id.as_str())
            .fetch_optional(conn)
            .await?;
    state.ok_or_else(|| session_not_found(session_id))?.parse()
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
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
            VALUES ($1, $2, $3, $4, $5, $6::jsonb, $7::jsonb, $8, $9, $10)
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
                   inputs::text AS inputs, memo::text AS memo, state_type,
                   created_at, updated_at
            FROM sessions
            WHERE session_id = $1
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
                   inputs::text AS inputs, memo::text AS memo, state_type,
                   created_at, updated_at
            FROM sessions
            WHERE ($1::text IS NULL OR deployment_id = $1)
              AND ($2::text IS NULL OR state_type = $2)
            ORDER BY created_at DESC, session_id DESC
            LIMIT $3 OFFSET $4
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
            WHERE ($1::text IS NULL OR deployment_id = $1)
              AND ($2::text IS NULL OR state_type = $2)
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
        let current = lock_session(&mut tx, session_id).await?;

        if let Some(next) = check_state_record(session_id, current, record)? {
            sqlx::query(
                r#"
                UPDATE sessions
                SET state_type = $1, updated_at = $2
                WHERE session_id = $3
                "#,
            )
            .bind(next.as_str())
            .bind(record.t)
            .bind(session_id.as_str())
            .execute(&mut *tx)
            .await?;
        }

        insert_log(&mut tx, session_id, record).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_log_records(&self, session_id: &SessionId) -> Result<Vec<SessionLogRecord>> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM sessions WHERE session_id = $1")
            .bind(session_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(session_not_found(session_id));
        }

        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT kind, data::text AS data, process_id, created_at
            FROM session_log
            WHERE session_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(session_id.as_str())
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        rows.into_iter().map(SessionLogRecord::try_from).collect()
    }

    async fn create_call_spec(
        &self,
        session_id: &SessionId,
        spec: &CallSpec,
        record: &SessionLogRecord,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        lock_session(&mut tx, session_id).await?;

        sqlx::query(
            r#"
            INSERT INTO call_specs (session_id, seq, spec, created_at)
            VALUES ($1, $2, $3::jsonb, $4)
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
        let spec: Option<String> = sqlx::query_scalar(
            "SELECT spec::text FROM call_specs WHERE session_id = $1 AND seq = $2",
        )
        .bind(session_id.as_str())
        .bind(seq)
        .fetch_optional(&self.pool)
        .await?;

        Ok(spec.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    async fn count_attempts(&self, session_id: &SessionId, seq: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM call_attempts WHERE session_id = $1 AND seq = $2",
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
        let current = lock_session(&mut tx, session_id).await?;
        require_live(session_id, current)?;

        let spec: Option<i64> =
            sqlx::query_scalar("SELECT seq FROM call_specs WHERE session_id = $1 AND seq = $2")
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
            VALUES ($1, $2, $3, $4)
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

        let completed: Option<Option<chrono::DateTime<chrono::Utc>>> = sqlx::query_scalar(
            r#"
            SELECT completed_at FROM call_attempts
            WHERE session_id = $1 AND seq = $2 AND attempt = $3
            FOR UPDATE
            "#,
        )
        .bind(session_id.as_str())
        .bind(seq)
        .bind(attempt)
        .fetch_optional(&mut *tx)
        .await?;

        match completed {
            None => return Err(attempt_not_found(session_id, seq, attempt)),
            Some(Some(_)) => return Err(already_completed(session_id, seq, attempt)),
            Some(None) => {}
        }

        sqlx::query(
            r#"
            UPDATE call_attempts
            SET completed_at = $1, result = $2::jsonb, is_last = $3, retry_interval_ms = $4
            WHERE session_id = $5 AND seq = $6 AND attempt = $7
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
            SELECT seq, attempt, started_at, completed_at, result::text AS result,
                   is_last, retry_interval_ms
            FROM call_attempts
            WHERE session_id = $1 AND seq = $2 AND attempt = $3
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
            SELECT seq, attempt, started_at, completed_at, result::text AS result,
                   is_last, retry_interval_ms
            FROM call_attempts
            WHERE session_id = $1 AND seq = $2 AND completed_at IS NOT NULL
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
        let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }
}
