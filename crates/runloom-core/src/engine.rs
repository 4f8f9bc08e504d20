// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable engine.
//!
//! [`EngineRuntime`] wires a store, a runtime and the engine components into
//! one handle that an existing tokio application can hold.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use runloom_core::engine::{EngineRuntime, connect_store};
//! use runloom_core::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let engine = EngineRuntime::builder()
//!         .store(connect_store(&config.database_url).await?)
//!         .runtime(Arc::new(my_runtime()))
//!         .config(&config)
//!         .build()?;
//!
//!     let session_id = engine.service().start_session(session).await?;
//!     let state = engine.spawn(session_id).await??;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{Config, RetryPolicy};
use crate::ids::{Clock, IdGenerator, SessionId, SystemClock, UuidIdGenerator};
use crate::log::SessionLog;
use crate::runtime::Runtime;
use crate::service::SessionService;
use crate::session::Session;
use crate::state::SessionState;
use crate::store::{PostgresSessionStore, SessionStore, SqliteSessionStore};
use crate::tracker::CallTracker;
use crate::worker::SessionWorker;

/// Open the store named by a `sqlite:` or `postgres://` URL and migrate it.
pub async fn connect_store(database_url: &str) -> Result<Arc<dyn SessionStore>> {
    if database_url.starts_with("sqlite:") {
        // Every connection to an in-memory database sees its own database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        Ok(Arc::new(
            SqliteSessionStore::connect(database_url, max_connections).await?,
        ))
    } else if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://")
    {
        Ok(Arc::new(PostgresSessionStore::connect(database_url, 10).await?))
    } else {
        anyhow::bail!("unsupported database URL scheme: {}", database_url)
    }
}

/// Builder for an [`EngineRuntime`].
pub struct EngineRuntimeBuilder {
    store: Option<Arc<dyn SessionStore>>,
    runtime: Option<Arc<dyn Runtime>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    policy: RetryPolicy,
    process_id: Option<String>,
}

impl std::fmt::Debug for EngineRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRuntimeBuilder")
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("runtime", &self.runtime.as_ref().map(|_| "..."))
            .field("policy", &self.policy)
            .field("process_id", &self.process_id)
            .finish()
    }
}

impl Default for EngineRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            runtime: None,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidIdGenerator),
            policy: RetryPolicy::default(),
            process_id: None,
        }
    }
}

impl EngineRuntimeBuilder {
    /// A builder with the system clock, UUID ids and the default retry policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the session store (required).
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the language runtime (required).
    pub fn runtime(mut self, runtime: Arc<dyn Runtime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Take the retry policy and process id from `config`.
    pub fn config(mut self, config: &Config) -> Self {
        self.policy = config.retry_policy();
        self.process_id = Some(config.process_id.clone());
        self
    }

    /// Override the retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the clock stamping log records.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override the id generator.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Set the id stamped on log records.
    pub fn process_id(mut self, process_id: impl Into<String>) -> Self {
        self.process_id = Some(process_id.into());
        self
    }

    /// Build the engine. Fails if the store or runtime is missing.
    pub fn build(self) -> Result<EngineRuntime> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let runtime = self
            .runtime
            .ok_or_else(|| anyhow::anyhow!("runtime is required"))?;

        let log = SessionLog::new(store, self.clock, self.process_id);
        let tracker = CallTracker::new(log.clone());
        let service = SessionService::new(log.clone(), tracker.clone(), self.ids.clone());
        let worker = SessionWorker::new(log, tracker, runtime, self.ids, self.policy);

        Ok(EngineRuntime { service, worker })
    }
}

/// A wired engine: the upstream service plus a worker.
#[derive(Debug, Clone)]
pub struct EngineRuntime {
    service: SessionService,
    worker: SessionWorker,
}

impl EngineRuntime {
    /// Start building an engine.
    pub fn builder() -> EngineRuntimeBuilder {
        EngineRuntimeBuilder::new()
    }

    /// The upstream session API.
    pub fn service(&self) -> &SessionService {
        &self.service
    }

    /// The worker.
    pub fn worker(&self) -> &SessionWorker {
        &self.worker
    }

    /// Run a created session on a background task.
    pub fn spawn(&self, session_id: SessionId) -> JoinHandle<crate::Result<SessionState>> {
        let worker = self.worker.clone();
        tokio::spawn(async move { worker.run(&session_id).await })
    }

    /// Create a session and run it to a terminal state.
    pub async fn execute(&self, session: Session) -> Result<(SessionId, SessionState)> {
        let session_id = self.service.start_session(session).await?;
        let state = self.worker.run(&session_id).await?;
        info!(session_id = %session_id, state = %state.state_type(), "Session executed");
        Ok((session_id, state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::LocalRuntime;
    use crate::store::MemorySessionStore;

    #[test]
    fn test_builder_requires_store_and_runtime() {
        let err = EngineRuntime::builder().build().unwrap_err();
        assert!(err.to_string().contains("store is required"));

        let err = EngineRuntime::builder()
            .store(Arc::new(MemorySessionStore::new()))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("runtime is required"));

        assert!(
            EngineRuntime::builder()
                .store(Arc::new(MemorySessionStore::new()))
                .runtime(Arc::new(LocalRuntime::new()))
                .build()
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_connect_store_rejects_unknown_scheme() {
        let err = connect_store("mysql://localhost/db").await.err().unwrap();
        assert!(err.to_string().contains("unsupported"));
    }

    #[tokio::test]
    async fn test_connect_store_sqlite_memory() {
        let store = connect_store("sqlite::memory:").await.unwrap();
        assert!(store.health_check().await.unwrap());
    }
}
