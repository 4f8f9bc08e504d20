// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The API upstream callers use to start, inspect and stop sessions.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::error::{EngineError, Result};
use crate::ids::{IdGenerator, SessionId};
use crate::log::{AttemptResult, LogData, SessionLog, SessionLogRecord, SessionView};
use crate::session::{Session, SessionFilter, SessionRecord};
use crate::state::{SessionState, SessionStateType};
use crate::tracker::CallTracker;

/// Upstream session API.
#[derive(Clone)]
pub struct SessionService {
    log: SessionLog,
    tracker: CallTracker,
    ids: Arc<dyn IdGenerator>,
}

impl std::fmt::Debug for SessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionService")
            .field("log", &self.log)
            .finish()
    }
}

impl SessionService {
    /// A service appending through `log`, assigning ids from `ids`.
    pub fn new(log: SessionLog, tracker: CallTracker, ids: Arc<dyn IdGenerator>) -> Self {
        Self { log, tracker, ids }
    }

    /// Create a session in `Created` and return its id.
    ///
    /// The caller may choose the id; otherwise one is generated.
    #[instrument(skip(self, session), fields(deployment_id = ?session.deployment_id))]
    pub async fn start_session(&self, session: Session) -> Result<SessionId> {
        session.strict_validate()?;

        let session_id = session
            .session_id
            .clone()
            .unwrap_or_else(|| self.ids.session_id());
        let created = self.log.stamp(LogData::State(SessionState::Created));
        let record = SessionRecord::from_session(session_id.clone(), session, created.t)?;

        self.log.store().create_session(&record, &created).await?;

        info!(session_id = %session_id, "Session created");
        Ok(session_id)
    }

    /// Fetch a session.
    pub async fn get(&self, session_id: &SessionId) -> Result<SessionRecord> {
        self.log
            .store()
            .get_session(session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Every record of the session's log, in append order.
    pub async fn get_log(&self, session_id: &SessionId) -> Result<Vec<SessionLogRecord>> {
        self.log.read(session_id).await
    }

    /// The session's current view, folded from its log.
    pub async fn view(&self, session_id: &SessionId) -> Result<SessionView> {
        self.log.fold(session_id).await
    }

    /// Ask a session to stop.
    ///
    /// The request is logged and the worker stops the run at its next
    /// event. With `terminate`, a running session is moved to `Stopped`
    /// immediately instead. Stopping an ended session does nothing.
    #[instrument(skip(self, reason), fields(session_id = %session_id))]
    pub async fn stop(
        &self,
        session_id: &SessionId,
        reason: impl Into<String>,
        terminate: bool,
    ) -> Result<()> {
        let reason = reason.into();
        let current = self.get(session_id).await?.state_type;
        if current.is_terminal() {
            debug!(state = %current, "Session already ended, ignoring stop");
            return Ok(());
        }

        self.log
            .append(
                session_id,
                LogData::StopRequest {
                    reason: reason.clone(),
                },
            )
            .await?;
        info!(%reason, terminate, "Stop requested");

        if terminate && current == SessionStateType::Running {
            match self
                .log
                .append(session_id, LogData::State(SessionState::stopped(reason)))
                .await
            {
                Ok(_) => {}
                // The run finished first.
                Err(EngineError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// The result of an attempt; `-1` selects the latest completed one.
    pub async fn get_attempt_result(
        &self,
        session_id: &SessionId,
        seq: i64,
        attempt: i64,
    ) -> Result<AttemptResult> {
        self.get(session_id).await?;
        self.tracker
            .get_attempt_result(session_id, seq, attempt)
            .await
    }

    /// Sessions matching `filter`, newest first.
    pub async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<SessionRecord>> {
        self.log.store().list_sessions(filter).await
    }

    /// Number of sessions matching `filter`.
    pub async fn count_sessions(&self, filter: &SessionFilter) -> Result<u64> {
        self.log.store().count_sessions(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{DeploymentId, FixedClock, SequentialIdGenerator};
    use crate::session::CodeLocation;
    use crate::store::{MemorySessionStore, SessionStore};
    use chrono::{TimeZone, Utc};
    use runloom_values::Value;

    fn service() -> SessionService {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let now = Utc.with_ymd_and_hms(2025, 4, 2, 8, 0, 0).unwrap();
        let log = SessionLog::new(store, Arc::new(FixedClock::new(now)), Some("svc".into()));
        SessionService::new(
            log.clone(),
            CallTracker::new(log),
            Arc::new(SequentialIdGenerator::new()),
        )
    }

    fn request() -> Session {
        Session::new(
            DeploymentId::parse("dep_shop").unwrap(),
            CodeLocation::new("orders.py", "handle"),
        )
        .with_input("order", Value::Integer(17))
    }

    #[tokio::test]
    async fn test_start_session_assigns_id_and_logs_created() {
        let service = service();
        let id = service.start_session(request()).await.unwrap();
        assert_eq!(id.as_str(), "ses_000000000001");

        let log = service.get_log(&id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].state(), Some(&SessionState::Created));
        assert_eq!(service.get(&id).await.unwrap().inputs["order"], Value::Integer(17));
    }

    #[tokio::test]
    async fn test_start_session_keeps_caller_id() {
        let service = service();
        let mut session = request();
        session.session_id = Some(SessionId::parse("ses_mine").unwrap());
        let id = service.start_session(session.clone()).await.unwrap();
        assert_eq!(id.as_str(), "ses_mine");

        let err = service.start_session(session).await.unwrap_err();
        assert_eq!(err.error_code(), "ALREADY_EXISTS");
    }

    #[tokio::test]
    async fn test_start_session_rejects_incomplete_request() {
        let service = service();
        let err = service.start_session(Session::default()).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
        assert_eq!(
            service.count_sessions(&SessionFilter::default()).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_stop_created_session_only_logs_request() {
        let service = service();
        let id = service.start_session(request()).await.unwrap();

        service.stop(&id, "changed my mind", true).await.unwrap();
        let view = service.view(&id).await.unwrap();
        assert_eq!(view.state_type(), Some(SessionStateType::Created));
        assert_eq!(view.stop_requested.as_deref(), Some("changed my mind"));
    }

    #[tokio::test]
    async fn test_terminate_running_session() {
        let service = service();
        let id = service.start_session(request()).await.unwrap();
        service
            .log
            .append(
                &id,
                LogData::State(SessionState::running(
                    crate::ids::RunId::parse("run_1").unwrap(),
                )),
            )
            .await
            .unwrap();

        service.stop(&id, "shutdown", true).await.unwrap();
        let view = service.view(&id).await.unwrap();
        assert_eq!(view.state, Some(SessionState::stopped("shutdown")));
        assert_eq!(view.stop_requested, None);

        // A second stop on an ended session is ignored.
        service.stop(&id, "again", false).await.unwrap();
        assert_eq!(service.get_log(&id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_missing_session_is_not_found() {
        let service = service();
        let missing = SessionId::parse("ses_nope").unwrap();
        assert!(service.get(&missing).await.unwrap_err().is_not_found());
        assert!(service.get_log(&missing).await.unwrap_err().is_not_found());
        assert!(service.stop(&missing, "x", false).await.unwrap_err().is_not_found());
        assert!(
            service
                .get_attempt_result(&missing, 0, -1)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }
}
