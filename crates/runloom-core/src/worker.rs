// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Drives one session through a [`Runtime`] from `Created` to a terminal state.

use std::collections::BTreeMap;
use std::sync::Arc;

use runloom_values::{FunctionValue, Value};
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};

use crate::config::RetryPolicy;
use crate::error::{EngineError, Result};
use crate::ids::{IdGenerator, SessionId};
use crate::log::{AttemptResult, LogData, SessionLog};
use crate::runtime::{ActivityRequest, RunContext, RunHandle, RunOutcome, Runtime};
use crate::state::{ProgramError, SessionState, SessionStateType, check_transition};
use crate::tracker::CallTracker;

/// Runs sessions one at a time on behalf of a worker process.
#[derive(Clone)]
pub struct SessionWorker {
    log: SessionLog,
    tracker: CallTracker,
    runtime: Arc<dyn Runtime>,
    ids: Arc<dyn IdGenerator>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for SessionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionWorker")
            .field("runtime", &"...")
            .field("policy", &self.policy)
            .finish()
    }
}

/// What stopped the event loop.
enum Exit {
    /// Append this terminal state.
    Finish(SessionState),
    /// Someone else already moved the session to a terminal state.
    Superseded,
}

impl SessionWorker {
    /// A worker appending through `log` and `tracker`.
    pub fn new(
        log: SessionLog,
        tracker: CallTracker,
        runtime: Arc<dyn Runtime>,
        ids: Arc<dyn IdGenerator>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            log,
            tracker,
            runtime,
            ids,
            policy,
        }
    }

    /// Run a `Created` session to completion and return its terminal state.
    ///
    /// User-code failures end the session in `Error` and are not returned as
    /// `Err`; errors are reserved for store failures and misuse.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn run(&self, session_id: &SessionId) -> Result<SessionState> {
        let store = self.log.store();
        let session = store
            .get_session(session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        check_transition(
            session_id.as_str(),
            Some(session.state_type),
            SessionStateType::Running,
        )?;

        let run_id = self.ids.run_id();
        self.log
            .append(session_id, LogData::State(SessionState::running(run_id.clone())))
            .await?;
        info!(run_id = %run_id, "Session claimed");

        let ctx = RunContext {
            session_id: session_id.clone(),
            run_id,
            deployment_id: session.deployment_id,
            event_id: session.event_id,
        };

        let exit = match self.check_stop(session_id).await? {
            Some(exit) => exit,
            None => match self
                .runtime
                .start(ctx.clone(), session.entrypoint, session.inputs)
                .await
            {
                Ok(handle) => self.drive(&ctx, handle).await?,
                Err(error) => Exit::Finish(SessionState::error(Vec::new(), error)),
            },
        };

        match exit {
            Exit::Finish(state) => self.finish(session_id, state).await,
            Exit::Superseded => {
                let view = self.log.fold(session_id).await?;
                view.state
                    .ok_or_else(|| EngineError::SessionNotFound {
                        session_id: session_id.to_string(),
                    })
            }
        }
    }

    async fn drive(&self, ctx: &RunContext, mut handle: RunHandle) -> Result<Exit> {
        let session_id = &ctx.session_id;
        let mut prints: Vec<String> = Vec::new();
        let mut seq = self.log.fold(session_id).await?.calls.len() as i64;

        loop {
            tokio::select! {
                biased;

                Some(text) = handle.prints.recv() => {
                    self.log.append(session_id, LogData::Print { text: text.clone() }).await?;
                    prints.push(text);
                }
                Some(request) = handle.activities.recv() => {
                    let function = request.function.name().to_string();
                    let outcome = if runs_inline(&request.function) {
                        self.inline(ctx, request).await
                    } else {
                        seq += 1;
                        self.activity(ctx, seq - 1, request).await?
                    };
                    if let Err(error) = outcome {
                        // A stop that cut the retries short wins over the call error.
                        if let Some(exit) = self.check_stop(session_id).await? {
                            return Ok(exit);
                        }
                        error!(function = %function, %error, "Call failed");
                        return Ok(Exit::Finish(SessionState::error(prints, error)));
                    }
                }
                outcome = &mut handle.completion => {
                    while let Ok(text) = handle.prints.try_recv() {
                        self.log.append(session_id, LogData::Print { text: text.clone() }).await?;
                        prints.push(text);
                    }
                    let state = match outcome {
                        Ok(RunOutcome::Done { return_value, exports }) => {
                            SessionState::completed(prints, exports, return_value)
                        }
                        Ok(RunOutcome::Failed(error)) => SessionState::error(prints, error),
                        Err(_) => SessionState::error(
                            prints,
                            ProgramError::new("runtime exited without reporting an outcome"),
                        ),
                    };
                    return Ok(Exit::Finish(state));
                }
            }

            if let Some(exit) = self.check_stop(session_id).await? {
                return Ok(exit);
            }
        }
    }

    /// Run a pure call in place. Nothing is recorded and it is never retried.
    async fn inline(
        &self,
        ctx: &RunContext,
        request: ActivityRequest,
    ) -> std::result::Result<Value, ProgramError> {
        let ActivityRequest {
            function,
            args,
            kwargs,
            reply,
        } = request;

        let outcome = self
            .runtime
            .execute(ctx, &function, &args, &kwargs)
            .await
            .and_then(|value| match value.strict_validate() {
                Ok(()) => Ok(value),
                Err(e) => Err(ProgramError::new(format!(
                    "'{}' returned an invalid value: {}",
                    function.name(),
                    e
                ))),
            });
        debug!(function = %function.name(), ok = outcome.is_ok(), "Pure call ran inline");
        send_reply(reply, &outcome);
        outcome
    }

    /// Perform one requested call with retries and reply to the run.
    ///
    /// Returns the final error when every attempt failed or the session
    /// stopped between attempts.
    async fn activity(
        &self,
        ctx: &RunContext,
        seq: i64,
        request: ActivityRequest,
    ) -> Result<std::result::Result<Value, ProgramError>> {
        let ActivityRequest {
            function,
            args,
            kwargs,
            reply,
        } = request;

        if function.is_privileged() {
            info!(seq, function = %function.name(), "Privileged call");
        }

        let outcome = match self
            .tracker
            .record_call_spec(
                &ctx.session_id,
                function.clone(),
                args.clone(),
                kwargs.clone(),
                seq,
            )
            .await
        {
            Ok(_) => self.attempts(ctx, seq, &function, &args, &kwargs).await?,
            // Malformed arguments are the run's fault, not the store's.
            Err(EngineError::InvalidArgument { field, message }) => Err(ProgramError::new(
                format!("invalid call to '{}': {}: {}", function.name(), field, message),
            )),
            Err(e) => return Err(e),
        };

        send_reply(reply, &outcome);
        Ok(outcome)
    }

    async fn attempts(
        &self,
        ctx: &RunContext,
        seq: i64,
        function: &FunctionValue,
        args: &[Value],
        kwargs: &BTreeMap<String, Value>,
    ) -> Result<std::result::Result<Value, ProgramError>> {
        let session_id = &ctx.session_id;
        loop {
            let attempt = match self.tracker.start_attempt(session_id, seq).await {
                Ok(attempt) => attempt,
                // The session ended after the last stop check.
                Err(EngineError::InvalidTransition { .. }) => return Ok(Err(session_stopped())),
                Err(e) => return Err(e),
            };
            match self.runtime.execute(ctx, function, args, kwargs).await {
                Ok(value) => {
                    let result = AttemptResult::Value(value.clone());
                    match self
                        .tracker
                        .complete_attempt(session_id, seq, attempt, result, true, None)
                        .await
                    {
                        Ok(()) => return Ok(Ok(value)),
                        // A result that fails strict validation counts as a failed call.
                        Err(EngineError::InvalidArgument { field, message }) => {
                            let error = ProgramError::new(format!(
                                "'{}' returned an invalid value: {}: {}",
                                function.name(),
                                field,
                                message
                            ));
                            self.tracker
                                .complete_attempt(
                                    session_id,
                                    seq,
                                    attempt,
                                    AttemptResult::Error(error.clone()),
                                    true,
                                    None,
                                )
                                .await?;
                            return Ok(Err(error));
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(error) => {
                    let is_last = function.is_no_poll() || self.policy.is_last(attempt);
                    let retry_interval = (!is_last).then_some(self.policy.retry_interval);
                    self.tracker
                        .complete_attempt(
                            session_id,
                            seq,
                            attempt,
                            AttemptResult::Error(error.clone()),
                            is_last,
                            retry_interval,
                        )
                        .await?;
                    match retry_interval {
                        None => return Ok(Err(error)),
                        Some(delay) => {
                            warn!(seq, attempt, %error, "Retrying call");
                            tokio::time::sleep(delay).await;
                            if self.check_stop(session_id).await?.is_some() {
                                info!(seq, "Session stopping, no further attempts");
                                return Ok(Err(session_stopped()));
                            }
                        }
                    }
                }
            }
        }
    }

    /// Stop the run if a stop was requested or the session already ended.
    async fn check_stop(&self, session_id: &SessionId) -> Result<Option<Exit>> {
        let view = self.log.fold(session_id).await?;
        if view.state.as_ref().is_some_and(SessionState::is_terminal) {
            info!("Session ended elsewhere");
            return Ok(Some(Exit::Superseded));
        }
        Ok(view
            .stop_requested
            .map(|reason| Exit::Finish(SessionState::stopped(reason))))
    }

    async fn finish(&self, session_id: &SessionId, state: SessionState) -> Result<SessionState> {
        let state = match self.log.append(session_id, LogData::State(state.clone())).await {
            Ok(_) => state,
            // A return value that fails strict validation ends the session in Error.
            Err(EngineError::InvalidArgument { field, message })
                if state.state_type() == SessionStateType::Completed =>
            {
                let prints = match state {
                    SessionState::Completed { prints, .. } => prints,
                    _ => Vec::new(),
                };
                let error = SessionState::error(
                    prints,
                    ProgramError::new(format!("invalid return value: {}: {}", field, message)),
                );
                self.log
                    .append(session_id, LogData::State(error.clone()))
                    .await?;
                error
            }
            // Terminated concurrently; the log already holds the terminal state.
            Err(EngineError::InvalidTransition { .. }) => {
                return self.log.fold(session_id).await?.state.ok_or_else(|| {
                    EngineError::SessionNotFound {
                        session_id: session_id.to_string(),
                    }
                });
            }
            Err(e) => return Err(e),
        };

        info!(state = %state.state_type(), "Session finished");
        Ok(state)
    }
}

/// Pure calls run inline unless they are privileged, which are always tracked.
fn runs_inline(function: &FunctionValue) -> bool {
    function.is_pure() && !function.is_privileged()
}

fn session_stopped() -> ProgramError {
    ProgramError::new("session stopped")
}

fn send_reply(reply: oneshot::Sender<AttemptResult>, outcome: &std::result::Result<Value, ProgramError>) {
    let result = match outcome {
        Ok(value) => AttemptResult::Value(value.clone()),
        Err(error) => AttemptResult::Error(error.clone()),
    };
    if reply.send(result).is_err() {
        warn!("Run stopped waiting for call result");
    }
}
