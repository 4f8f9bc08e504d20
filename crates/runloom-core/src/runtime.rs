// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The boundary to the runtimes that execute user code.
//!
//! A [`Runtime`] starts an entrypoint and hands back a [`RunHandle`]. While
//! the entrypoint runs it may ask the engine to perform calls
//! ([`ActivityRequest`]), print text, and finally report a [`RunOutcome`].
//! Each activity request is answered exactly once through its own reply
//! channel.
//!
//! [`LocalRuntime`] runs Rust closures in-process and is what the tests and
//! embedded deployments use.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use runloom_values::{FunctionValue, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::ids::{DeploymentId, EventId, RunId, SessionId};
use crate::log::AttemptResult;
use crate::session::CodeLocation;
use crate::state::ProgramError;

/// Identity of one run, passed to every runtime call.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    /// The session being run.
    pub session_id: SessionId,
    /// This run.
    pub run_id: RunId,
    /// The deployment the code comes from.
    pub deployment_id: DeploymentId,
    /// The triggering event, if any.
    pub event_id: Option<EventId>,
}

/// A call requested by running user code.
#[derive(Debug)]
pub struct ActivityRequest {
    /// The function to call.
    pub function: FunctionValue,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Keyword arguments.
    pub kwargs: BTreeMap<String, Value>,
    /// Where the result goes.
    pub reply: oneshot::Sender<AttemptResult>,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The entrypoint returned.
    Done {
        /// Its return value.
        return_value: Value,
        /// Bindings it exported.
        exports: BTreeMap<String, Value>,
    },
    /// The entrypoint raised.
    Failed(ProgramError),
}

/// The engine's side of a run.
#[derive(Debug)]
pub struct RunHandle {
    /// Calls requested by the run.
    pub activities: mpsc::Receiver<ActivityRequest>,
    /// Text printed by the run.
    pub prints: mpsc::Receiver<String>,
    /// The single outcome.
    pub completion: oneshot::Receiver<RunOutcome>,
}

/// The runtime's side of a run.
#[derive(Debug, Clone)]
pub struct RunChannels {
    activities: mpsc::Sender<ActivityRequest>,
    prints: mpsc::Sender<String>,
}

impl RunHandle {
    /// A connected handle, the channels feeding it, and the outcome sender.
    pub fn channel(buffer: usize) -> (RunChannels, oneshot::Sender<RunOutcome>, RunHandle) {
        let (activity_tx, activity_rx) = mpsc::channel(buffer);
        let (print_tx, print_rx) = mpsc::channel(buffer);
        let (done_tx, done_rx) = oneshot::channel();
        (
            RunChannels {
                activities: activity_tx,
                prints: print_tx,
            },
            done_tx,
            RunHandle {
                activities: activity_rx,
                prints: print_rx,
                completion: done_rx,
            },
        )
    }
}

impl RunChannels {
    /// Print a line. Dropped silently once the engine stops listening.
    pub async fn print(&self, text: impl Into<String>) {
        let _ = self.prints.send(text.into()).await;
    }

    /// Ask the engine to perform a call and wait for its result.
    pub async fn call(
        &self,
        function: FunctionValue,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
    ) -> Result<Value, ProgramError> {
        let (reply, result) = oneshot::channel();
        let request = ActivityRequest {
            function,
            args,
            kwargs,
            reply,
        };
        if self.activities.send(request).await.is_err() {
            return Err(ProgramError::new("run was stopped"));
        }
        match result.await {
            Ok(AttemptResult::Value(value)) => Ok(value),
            Ok(AttemptResult::Error(error)) => Err(error),
            Err(_) => Err(ProgramError::new("run was stopped")),
        }
    }
}

/// A language runtime.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Whether the runtime can accept work.
    async fn health(&self) -> bool;

    /// Start `entrypoint` with `inputs`.
    async fn start(
        &self,
        ctx: RunContext,
        entrypoint: CodeLocation,
        inputs: BTreeMap<String, Value>,
    ) -> Result<RunHandle, ProgramError>;

    /// Execute one call on behalf of a run.
    async fn execute(
        &self,
        ctx: &RunContext,
        function: &FunctionValue,
        args: &[Value],
        kwargs: &BTreeMap<String, Value>,
    ) -> Result<Value, ProgramError>;
}

/// Boxed future returned by [`LocalRuntime`] handlers.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Arguments handed to an entrypoint registered with [`LocalRuntime`].
#[derive(Debug, Clone)]
pub struct EntrypointCall {
    /// Identity of the run.
    pub ctx: RunContext,
    /// The session's inputs.
    pub inputs: BTreeMap<String, Value>,
    /// Channels back to the engine.
    pub channels: RunChannels,
}

type EntrypointFuture = BoxFuture<Result<(Value, BTreeMap<String, Value>), ProgramError>>;
type EntrypointFn = dyn Fn(EntrypointCall) -> EntrypointFuture + Send + Sync;

type FunctionFuture = BoxFuture<Result<Value, ProgramError>>;
type FunctionFn = dyn Fn(Vec<Value>, BTreeMap<String, Value>) -> FunctionFuture + Send + Sync;

/// In-process runtime dispatching to registered Rust closures.
///
/// Entrypoints are keyed by [`CodeLocation::name`] and functions by
/// [`FunctionValue::name`].
#[derive(Default, Clone)]
pub struct LocalRuntime {
    entrypoints: HashMap<String, Arc<EntrypointFn>>,
    functions: HashMap<String, Arc<FunctionFn>>,
}

impl std::fmt::Debug for LocalRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRuntime")
            .field("entrypoints", &self.entrypoints.keys().collect::<Vec<_>>())
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LocalRuntime {
    /// A runtime with nothing registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entrypoint. It returns its return value and exports.
    pub fn entrypoint<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(EntrypointCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(Value, BTreeMap<String, Value>), ProgramError>>
            + Send
            + 'static,
    {
        let handler: Arc<EntrypointFn> = Arc::new(move |call: EntrypointCall| -> EntrypointFuture {
            Box::pin(f(call))
        });
        self.entrypoints.insert(name.into(), handler);
        self
    }

    /// Register a function callable through activity requests.
    pub fn function<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>, BTreeMap<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ProgramError>> + Send + 'static,
    {
        let handler: Arc<FunctionFn> = Arc::new(
            move |args: Vec<Value>, kwargs: BTreeMap<String, Value>| -> FunctionFuture {
                Box::pin(f(args, kwargs))
            },
        );
        self.functions.insert(name.into(), handler);
        self
    }
}

#[async_trait]
impl Runtime for LocalRuntime {
    async fn health(&self) -> bool {
        true
    }

    async fn start(
        &self,
        ctx: RunContext,
        entrypoint: CodeLocation,
        inputs: BTreeMap<String, Value>,
    ) -> Result<RunHandle, ProgramError> {
        let handler = self.entrypoints.get(&entrypoint.name).cloned().ok_or_else(|| {
            ProgramError::new(format!("entrypoint '{}' is not defined", entrypoint.name))
        })?;

        let (channels, done, handle) = RunHandle::channel(16);
        let call = EntrypointCall {
            ctx,
            inputs,
            channels,
        };
        tokio::spawn(async move {
            let outcome = match handler(call).await {
                Ok((return_value, exports)) => RunOutcome::Done {
                    return_value,
                    exports,
                },
                Err(error) => RunOutcome::Failed(error),
            };
            if done.send(outcome).is_err() {
                debug!("Run outcome dropped, engine stopped listening");
            }
        });

        Ok(handle)
    }

    async fn execute(
        &self,
        _ctx: &RunContext,
        function: &FunctionValue,
        args: &[Value],
        kwargs: &BTreeMap<String, Value>,
    ) -> Result<Value, ProgramError> {
        let handler = self.functions.get(function.name()).cloned().ok_or_else(|| {
            ProgramError::new(format!("function '{}' is not defined", function.name()))
        })?;
        handler(args.to_vec(), kwargs.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runloom_values::ExecutorId;

    fn ctx() -> RunContext {
        RunContext {
            session_id: SessionId::parse("ses_1").unwrap(),
            run_id: RunId::parse("run_1").unwrap(),
            deployment_id: DeploymentId::parse("dep_1").unwrap(),
            event_id: None,
        }
    }

    #[tokio::test]
    async fn test_local_runtime_round_trip() {
        let runtime = LocalRuntime::new()
            .function("double", |args, _| async move {
                let n = args.first().and_then(Value::as_i64).unwrap_or(0);
                Ok(Value::Integer(n * 2))
            })
            .entrypoint("main", |call: EntrypointCall| async move {
                call.channels.print("starting").await;
                let f = FunctionValue::new(call.ctx.run_id.executor_id(), "double");
                let v = call.channels.call(f, vec![Value::Integer(21)], BTreeMap::new()).await?;
                Ok::<_, ProgramError>((v, BTreeMap::new()))
            });
        assert!(runtime.health().await);

        let mut handle = runtime
            .start(ctx(), CodeLocation::new("main.rs", "main"), BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(handle.prints.recv().await.as_deref(), Some("starting"));
        let request = handle.activities.recv().await.unwrap();
        let result = runtime
            .execute(&ctx(), &request.function, &request.args, &request.kwargs)
            .await
            .unwrap();
        request.reply.send(AttemptResult::Value(result)).unwrap();

        assert_eq!(
            handle.completion.await.unwrap(),
            RunOutcome::Done {
                return_value: Value::Integer(42),
                exports: BTreeMap::new(),
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_names_are_program_errors() {
        let runtime = LocalRuntime::new();
        let err = runtime
            .start(ctx(), CodeLocation::new("main.rs", "missing"), BTreeMap::new())
            .await
            .unwrap_err();
        assert!(err.message.contains("missing"));

        let f = FunctionValue::new(ExecutorId::new("run_1"), "nope");
        let err = runtime
            .execute(&ctx(), &f, &[], &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(err.message.contains("nope"));
    }
}
