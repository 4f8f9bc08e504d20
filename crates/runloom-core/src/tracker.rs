// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Outbound calls and their attempts.
//!
//! The tracker performs no locking of its own. Attempt numbers are the count
//! of attempts already started, so concurrent starts for one call must be
//! serialized by the caller; the store's `(session, seq, attempt)` key turns
//! a lost race into [`EngineError::AlreadyExists`].

use std::collections::BTreeMap;
use std::time::Duration;

use runloom_values::{FunctionValue, Value};
use tracing::{debug, instrument, warn};

use crate::error::{EngineError, Result};
use crate::ids::SessionId;
use crate::log::{AttemptCompletion, AttemptResult, CallSpec, LogData, SessionLog};

/// Records call specs and attempts and answers result queries.
#[derive(Debug, Clone)]
pub struct CallTracker {
    log: SessionLog,
}

impl CallTracker {
    /// A tracker appending through `log`.
    pub fn new(log: SessionLog) -> Self {
        Self { log }
    }

    /// Record call `seq` of a session.
    ///
    /// Fails with `InvalidArgument` when `seq` is already recorded or an
    /// argument fails strict validation.
    #[instrument(skip(self, function, args, kwargs), fields(session_id = %session_id, function = function.name()))]
    pub async fn record_call_spec(
        &self,
        session_id: &SessionId,
        function: FunctionValue,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
        seq: i64,
    ) -> Result<CallSpec> {
        let spec = CallSpec {
            function,
            args,
            kwargs,
            seq,
        };
        spec.strict_validate()?;

        let record = self.log.stamp(LogData::CallSpec(spec.clone()));
        match self
            .log
            .store()
            .create_call_spec(session_id, &spec, &record)
            .await
        {
            Ok(()) => {
                debug!("Call spec recorded");
                Ok(spec)
            }
            Err(EngineError::AlreadyExists { .. }) => Err(EngineError::invalid(
                "seq",
                format!("call {} is already recorded", seq),
            )),
            Err(e) => Err(e),
        }
    }

    /// Start the next attempt of call `seq` and return its number.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn start_attempt(&self, session_id: &SessionId, seq: i64) -> Result<i64> {
        let store = self.log.store();
        if store.get_call_spec(session_id, seq).await?.is_none() {
            return Err(EngineError::CallSpecNotFound {
                session_id: session_id.to_string(),
                seq,
            });
        }

        let attempt = store.count_attempts(session_id, seq).await?;
        let record = self
            .log
            .stamp(LogData::CallAttemptStart { seq, attempt });
        store
            .create_attempt_start(session_id, seq, attempt, &record)
            .await?;

        debug!(attempt, "Attempt started");
        Ok(attempt)
    }

    /// Complete a started attempt. Each attempt completes at most once.
    #[instrument(skip(self, result), fields(session_id = %session_id, error = result.is_error()))]
    pub async fn complete_attempt(
        &self,
        session_id: &SessionId,
        seq: i64,
        attempt: i64,
        result: AttemptResult,
        is_last: bool,
        retry_interval: Option<Duration>,
    ) -> Result<()> {
        let data = LogData::CallAttemptComplete {
            seq,
            attempt,
            result: result.clone(),
            is_last,
            retry_interval,
        };
        data.strict_validate()?;

        let record = self.log.stamp(data);
        let completion = AttemptCompletion {
            result,
            is_last,
            retry_interval,
            completed_at: record.t,
        };
        self.log
            .store()
            .update_attempt_complete(session_id, seq, attempt, &completion, &record)
            .await?;

        if let AttemptResult::Error(error) = &completion.result {
            warn!(%error, is_last, "Attempt failed");
        } else {
            debug!("Attempt completed");
        }
        Ok(())
    }

    /// The result of attempt `attempt` of call `seq`.
    ///
    /// `-1` selects the highest-numbered completed attempt. An attempt that
    /// started but never completed is not found.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn get_attempt_result(
        &self,
        session_id: &SessionId,
        seq: i64,
        attempt: i64,
    ) -> Result<AttemptResult> {
        let store = self.log.store();
        let found = match attempt {
            -1 => store.latest_completed_attempt(session_id, seq).await?,
            n if n >= 0 => store.get_attempt(session_id, seq, n).await?,
            _ => {
                return Err(EngineError::invalid(
                    "attempt",
                    "must be -1 (latest) or a non-negative attempt number",
                ));
            }
        };

        found
            .and_then(|a| a.completion)
            .map(|c| c.result)
            .ok_or(EngineError::AttemptNotFound {
                session_id: session_id.to_string(),
                seq,
                attempt,
            })
    }
}
