// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for runloom-core integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use sqlx::sqlite::SqlitePoolOptions;

use runloom_core::{
    CallTracker, CodeLocation, DeploymentId, EngineRuntime, FixedClock, LocalRuntime,
    RetryPolicy, SequentialIdGenerator, Session, SessionId, SessionLog, SessionStore,
    SqliteSessionStore, migrations,
};

/// An engine over a fresh in-memory SQLite database.
pub struct TestContext {
    pub engine: EngineRuntime,
    pub store: Arc<dyn SessionStore>,
    pub clock: Arc<FixedClock>,
}

impl TestContext {
    /// Engine running `runtime` with up to `max_attempts` attempts per call.
    pub async fn new(runtime: LocalRuntime, max_attempts: u32) -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");
        migrations::run_sqlite(&pool)
            .await
            .expect("Failed to run migrations");

        let store: Arc<dyn SessionStore> = Arc::new(SqliteSessionStore::new(pool));
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap(),
        ));

        let engine = EngineRuntime::builder()
            .store(store.clone())
            .runtime(Arc::new(runtime))
            .clock(clock.clone())
            .id_generator(Arc::new(SequentialIdGenerator::new()))
            .retry_policy(RetryPolicy {
                max_attempts,
                retry_interval: Duration::from_millis(1),
            })
            .process_id("test-worker")
            .build()
            .expect("Failed to build engine");

        Self {
            engine,
            store,
            clock,
        }
    }

    /// Create a session for `entrypoint` and return its id.
    pub async fn start(&self, entrypoint: &str) -> SessionId {
        self.engine
            .service()
            .start_session(session(entrypoint))
            .await
            .expect("Failed to start session")
    }

    /// A log handle over the same store and clock as the engine.
    pub fn log(&self) -> SessionLog {
        SessionLog::new(
            self.store.clone(),
            self.clock.clone(),
            Some("test-worker".into()),
        )
    }

    /// A call tracker over the same store and clock as the engine.
    pub fn tracker(&self) -> CallTracker {
        CallTracker::new(self.log())
    }

    /// Kinds of the session's log records, in order.
    pub async fn log_kinds(&self, session_id: &SessionId) -> Vec<&'static str> {
        self.engine
            .service()
            .get_log(session_id)
            .await
            .expect("Failed to read log")
            .iter()
            .map(|r| r.data.kind())
            .collect()
    }

    /// Wait until the session's log contains a record of `kind`.
    pub async fn wait_for(&self, session_id: &SessionId, kind: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if self.log_kinds(session_id).await.iter().any(|k| *k == kind) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no '{kind}' record within 5s"));
    }
}

/// A session request for `entrypoint` in a test deployment.
pub fn session(entrypoint: &str) -> Session {
    Session::new(
        DeploymentId::parse("dep_test").unwrap(),
        CodeLocation::new("workflow.rs", entrypoint),
    )
}
