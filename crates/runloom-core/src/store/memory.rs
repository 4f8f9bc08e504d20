// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process session store. Nothing survives a restart.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{EngineError, Result};
use crate::ids::SessionId;
use crate::log::{AttemptCompletion, CallAttempt, CallSpec, LogData, SessionLogRecord};
use crate::session::{SessionFilter, SessionRecord};
use crate::state::check_transition;

use super::{
    SessionStore, already_completed, attempt_not_found, check_state_record, require_live,
    session_not_found,
};

#[derive(Debug)]
struct Entry {
    record: SessionRecord,
    log: Vec<SessionLogRecord>,
    specs: BTreeMap<i64, CallSpec>,
    attempts: BTreeMap<(i64, i64), CallAttempt>,
}

/// Session store backed by a mutex-guarded map.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<SessionId, Entry>>,
}

impl MemorySessionStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Entry>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn entry_mut<'a>(
    sessions: &'a mut HashMap<SessionId, Entry>,
    session_id: &SessionId,
) -> Result<&'a mut Entry> {
    sessions
        .get_mut(session_id)
        .ok_or_else(|| session_not_found(session_id))
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(
        &self,
        session: &SessionRecord,
        created: &SessionLogRecord,
    ) -> Result<()> {
        if let LogData::State(state) = &created.data {
            check_transition(session.session_id.as_str(), None, state.state_type())?;
        }
        let mut sessions = self.lock();
        if sessions.contains_key(&session.session_id) {
            return Err(EngineError::AlreadyExists {
                entity: "session",
                key: session.session_id.to_string(),
            });
        }
        sessions.insert(
            session.session_id.clone(),
            Entry {
                record: session.clone(),
                log: vec![created.clone()],
                specs: BTreeMap::new(),
                attempts: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn get_session(&self, session_id: &SessionId) -> Result<Option<SessionRecord>> {
        Ok(self.lock().get(session_id).map(|e| e.record.clone()))
    }

    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<SessionRecord>> {
        let mut matching: Vec<SessionRecord> = self
            .lock()
            .values()
            .filter(|e| filter.matches(&e.record))
            .map(|e| e.record.clone())
            .collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.session_id.cmp(&a.session_id))
        });
        Ok(matching
            .into_iter()
            .skip(filter.offset.unwrap_or(0) as usize)
            .take(filter.effective_limit() as usize)
            .collect())
    }

    async fn count_sessions(&self, filter: &SessionFilter) -> Result<u64> {
        Ok(self
            .lock()
            .values()
            .filter(|e| filter.matches(&e.record))
            .count() as u64)
    }

    async fn append_log_record(
        &self,
        session_id: &SessionId,
        record: &SessionLogRecord,
    ) -> Result<()> {
        let mut sessions = self.lock();
        let entry = entry_mut(&mut sessions, session_id)?;
        if let Some(next) = check_state_record(session_id, entry.record.state_type, record)? {
            entry.record.state_type = next;
            entry.record.updated_at = record.t;
        }
        entry.log.push(record.clone());
        Ok(())
    }

    async fn list_log_records(&self, session_id: &SessionId) -> Result<Vec<SessionLogRecord>> {
        let sessions = self.lock();
        let entry = sessions
            .get(session_id)
            .ok_or_else(|| session_not_found(session_id))?;
        Ok(entry.log.clone())
    }

    async fn create_call_spec(
        &self,
        session_id: &SessionId,
        spec: &CallSpec,
        record: &SessionLogRecord,
    ) -> Result<()> {
        let mut sessions = self.lock();
        let entry = entry_mut(&mut sessions, session_id)?;
        if entry.specs.contains_key(&spec.seq) {
            return Err(EngineError::AlreadyExists {
                entity: "call spec",
                key: format!("{}/{}", session_id, spec.seq),
            });
        }
        entry.specs.insert(spec.seq, spec.clone());
        entry.log.push(record.clone());
        Ok(())
    }

    async fn get_call_spec(&self, session_id: &SessionId, seq: i64) -> Result<Option<CallSpec>> {
        Ok(self
            .lock()
            .get(session_id)
            .and_then(|e| e.specs.get(&seq).cloned()))
    }

    async fn count_attempts(&self, session_id: &SessionId, seq: i64) -> Result<i64> {
        Ok(self.lock().get(session_id).map_or(0, |e| {
            e.attempts.range((seq, i64::MIN)..=(seq, i64::MAX)).count() as i64
        }))
    }

    async fn create_attempt_start(
        &self,
        session_id: &SessionId,
        seq: i64,
        attempt: i64,
        record: &SessionLogRecord,
    ) -> Result<()> {
        let mut sessions = self.lock();
        let entry = entry_mut(&mut sessions, session_id)?;
        require_live(session_id, entry.record.state_type)?;
        if !entry.specs.contains_key(&seq) {
            return Err(EngineError::CallSpecNotFound {
                session_id: session_id.to_string(),
                seq,
            });
        }
        if entry.attempts.contains_key(&(seq, attempt)) {
            return Err(EngineError::AlreadyExists {
                entity: "attempt",
                key: format!("{}/{}/{}", session_id, seq, attempt),
            });
        }
        entry.attempts.insert(
            (seq, attempt),
            CallAttempt {
                seq,
                attempt,
                started_at: record.t,
                completion: None,
            },
        );
        entry.log.push(record.clone());
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
        let mut sessions = self.lock();
        let entry = entry_mut(&mut sessions, session_id)?;
        let stored = entry
            .attempts
            .get_mut(&(seq, attempt))
            .ok_or_else(|| attempt_not_found(session_id, seq, attempt))?;
        if stored.completion.is_some() {
            return Err(already_completed(session_id, seq, attempt));
        }
        stored.completion = Some(completion.clone());
        entry.log.push(record.clone());
        Ok(())
    }

    async fn get_attempt(
        &self,
        session_id: &SessionId,
        seq: i64,
        attempt: i64,
    ) -> Result<Option<CallAttempt>> {
        Ok(self
            .lock()
            .get(session_id)
            .and_then(|e| e.attempts.get(&(seq, attempt)).cloned()))
    }

    async fn latest_completed_attempt(
        &self,
        session_id: &SessionId,
        seq: i64,
    ) -> Result<Option<CallAttempt>> {
        Ok(self.lock().get(session_id).and_then(|e| {
            e.attempts
                .range((seq, i64::MIN)..=(seq, i64::MAX))
                .rev()
                .map(|(_, a)| a)
                .find(|a| a.is_completed())
                .cloned()
        }))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
