// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runloom Core - Session Execution Engine
//!
//! This crate records what a session does so it can be inspected, retried
//! and stopped. Every session has an append-only log; its current state is
//! whatever folding that log yields.
//!
//! # Architecture
//!
//! ```text
//!   upstream caller ──► SessionService ──┐
//!                                        ├──► SessionLog ──► SessionStore
//!   Runtime ◄──► SessionWorker ──► CallTracker ─┘           (SQLite / PostgreSQL / memory)
//! ```
//!
//! # Session lifecycle
//!
//! | State | Entered when |
//! |-------|--------------|
//! | `created` | [`SessionService::start_session`] stores the session |
//! | `running` | a [`SessionWorker`] claims it and starts the runtime |
//! | `completed` | the entrypoint returns |
//! | `error` | the entrypoint, or a call that ran out of attempts, fails |
//! | `stopped` | a stop request is honoured |
//!
//! # Log records
//!
//! | Kind | Written by |
//! |------|------------|
//! | `state` | service and worker, on every transition |
//! | `print` | worker, for text the run prints |
//! | `stop_request` | [`SessionService::stop`] |
//! | `call_spec` | [`CallTracker::record_call_spec`] |
//! | `call_attempt_start` | [`CallTracker::start_attempt`] |
//! | `call_attempt_complete` | [`CallTracker::complete_attempt`] |
//!
//! # Configuration
//!
//! See [`config::Config::from_env`].

pub mod config;
pub mod engine;
pub mod error;
pub mod ids;
pub mod log;
pub mod migrations;
pub mod runtime;
pub mod service;
pub mod session;
pub mod state;
pub mod store;
pub mod tracker;
pub mod worker;

pub use config::{Config, ConfigError, RetryPolicy};
pub use engine::{EngineRuntime, EngineRuntimeBuilder, connect_store};
pub use error::{EngineError, ErrorKind, Result};
pub use ids::{
    Clock, DeploymentId, EventId, ExecutorId, FixedClock, IdGenerator, RunId,
    SequentialIdGenerator, SessionId, SystemClock, UuidIdGenerator,
};
pub use log::{
    AttemptCompletion, AttemptResult, CallAttempt, CallSpec, LogData, SessionLog,
    SessionLogRecord, SessionView, fold,
};
pub use runtime::{
    ActivityRequest, EntrypointCall, LocalRuntime, RunChannels, RunContext, RunHandle,
    RunOutcome, Runtime,
};
pub use service::SessionService;
pub use session::{CodeLocation, Session, SessionFilter, SessionRecord};
pub use state::{ProgramError, SessionState, SessionStateType, check_transition};
pub use store::{MemorySessionStore, PostgresSessionStore, SessionStore, SqliteSessionStore};
pub use tracker::CallTracker;
pub use worker::SessionWorker;

pub use runloom_values as values;
