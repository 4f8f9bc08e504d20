// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sessions as requested by callers and as stored.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use runloom_values::{Symbol, Value};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::ids::{DeploymentId, EventId, SessionId};
use crate::state::{SessionStateType, check_value};

/// Where the code a session runs lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeLocation {
    /// Module or file path inside the deployment.
    pub path: String,
    /// Function name.
    pub name: String,
}

impl CodeLocation {
    /// A location.
    pub fn new(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }

    fn check(&self, strict: bool) -> Result<()> {
        if strict && self.path.trim().is_empty() {
            return Err(EngineError::invalid("entrypoint.path", "missing"));
        }
        if strict && self.name.is_empty() {
            return Err(EngineError::invalid("entrypoint.name", "missing"));
        }
        if !self.name.is_empty() && !Symbol::is_valid(&self.name) {
            return Err(EngineError::invalid(
                "entrypoint.name",
                format!("'{}' is not an identifier", self.name),
            ));
        }
        Ok(())
    }
}

/// A request to run a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Assigned by the service when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// The deployment whose code runs. Required by strict validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<DeploymentId>,
    /// The event that triggered the session, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
    /// The entrypoint. Required by strict validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<CodeLocation>,
    /// Named inputs passed to the entrypoint.
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    /// Free-form annotations.
    #[serde(default)]
    pub memo: BTreeMap<String, String>,
}

impl Session {
    /// A session request for `entrypoint` in `deployment_id`.
    pub fn new(deployment_id: DeploymentId, entrypoint: CodeLocation) -> Self {
        Self {
            deployment_id: Some(deployment_id),
            entrypoint: Some(entrypoint),
            ..Default::default()
        }
    }

    /// Add an input.
    pub fn with_input(mut self, name: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    /// Set the triggering event.
    pub fn with_event(mut self, event_id: EventId) -> Self {
        self.event_id = Some(event_id);
        self
    }

    /// Add an annotation.
    pub fn with_memo(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.memo.insert(key.into(), value.into());
        self
    }

    /// Check fields that are present.
    pub fn validate(&self) -> Result<()> {
        self.check(false)
    }

    /// Check that every mandatory field is present and well-formed.
    pub fn strict_validate(&self) -> Result<()> {
        self.check(true)
    }

    fn check(&self, strict: bool) -> Result<()> {
        if strict && self.deployment_id.is_none() {
            return Err(EngineError::invalid("deployment_id", "missing"));
        }
        match &self.entrypoint {
            Some(entrypoint) => entrypoint.check(strict)?,
            None if strict => return Err(EngineError::invalid("entrypoint", "missing")),
            None => {}
        }
        for (name, value) in &self.inputs {
            check_value(value, strict, &format!("inputs.{name}"))?;
        }
        Ok(())
    }
}

/// A stored session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    /// Session id.
    pub session_id: SessionId,
    /// The deployment whose code runs.
    pub deployment_id: DeploymentId,
    /// The event that triggered the session, if any.
    pub event_id: Option<EventId>,
    /// The entrypoint.
    pub entrypoint: CodeLocation,
    /// Named inputs passed to the entrypoint.
    pub inputs: BTreeMap<String, Value>,
    /// Free-form annotations.
    pub memo: BTreeMap<String, String>,
    /// Kind of the latest `State` record.
    pub state_type: SessionStateType,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the latest `State` record was appended.
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Build the stored form of a strictly valid `session`.
    pub fn from_session(
        session_id: SessionId,
        session: Session,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        session.strict_validate()?;
        let (Some(deployment_id), Some(entrypoint)) = (session.deployment_id, session.entrypoint)
        else {
            return Err(EngineError::invalid("session", "incomplete"));
        };
        Ok(Self {
            session_id,
            deployment_id,
            event_id: session.event_id,
            entrypoint,
            inputs: session.inputs,
            memo: session.memo,
            state_type: SessionStateType::Created,
            created_at,
            updated_at: created_at,
        })
    }

    /// The caller-facing form.
    pub fn to_session(&self) -> Session {
        Session {
            session_id: Some(self.session_id.clone()),
            deployment_id: Some(self.deployment_id.clone()),
            event_id: self.event_id.clone(),
            entrypoint: Some(self.entrypoint.clone()),
            inputs: self.inputs.clone(),
            memo: self.memo.clone(),
        }
    }
}

/// Filter for listing sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Only sessions of this deployment.
    pub deployment_id: Option<DeploymentId>,
    /// Only sessions currently in this state.
    pub state_type: Option<SessionStateType>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Results to skip.
    pub offset: Option<u32>,
}

impl SessionFilter {
    /// Default page size when no limit is given.
    pub const DEFAULT_LIMIT: u32 = 100;

    /// The limit to apply.
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }

    /// Whether `record` passes the filter, ignoring paging.
    pub fn matches(&self, record: &SessionRecord) -> bool {
        self.deployment_id
            .as_ref()
            .is_none_or(|d| *d == record.deployment_id)
            && self.state_type.is_none_or(|s| s == record.state_type)
    }
}
