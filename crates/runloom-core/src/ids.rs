// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed identifiers, id generators and clocks.
//!
//! Identifiers are prefixed strings (`ses_…`, `run_…`) so they are
//! recognisable in logs and cannot be mixed up at the type level.
//! Generators and clocks are injected so tests can be deterministic.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

pub use runloom_values::ExecutorId;

macro_rules! prefixed_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Prefix every id of this type starts with.
            pub const PREFIX: &'static str = $prefix;

            /// Parse and validate an id.
            pub fn parse(s: impl Into<String>) -> Result<Self, EngineError> {
                let s = s.into();
                let valid = s.strip_prefix(Self::PREFIX).is_some_and(|rest| {
                    !rest.is_empty()
                        && rest
                            .chars()
                            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                });
                if valid {
                    Ok(Self(s))
                } else {
                    Err(EngineError::invalid(
                        stringify!($name),
                        format!("'{}' is not a valid id (expected prefix '{}')", s, Self::PREFIX),
                    ))
                }
            }

            #[allow(dead_code)]
            fn from_suffix(suffix: impl fmt::Display) -> Self {
                Self(format!("{}{}", Self::PREFIX, suffix))
            }

            /// The id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = EngineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = EngineError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

prefixed_id!(
    /// Identifies one session.
    SessionId,
    "ses_"
);
prefixed_id!(
    /// Identifies the deployment a session runs code from.
    DeploymentId,
    "dep_"
);
prefixed_id!(
    /// Identifies the event that triggered a session.
    EventId,
    "evt_"
);
prefixed_id!(
    /// Identifies one execution of a session inside a runtime.
    RunId,
    "run_"
);

impl RunId {
    /// Executor identity of functions owned by this run.
    pub fn executor_id(&self) -> ExecutorId {
        ExecutorId::new(self.as_str())
    }
}

/// Source of fresh identifiers.
pub trait IdGenerator: Send + Sync {
    /// A new session id.
    fn session_id(&self) -> SessionId;

    /// A new run id.
    fn run_id(&self) -> RunId;
}

/// Random ids from UUID v4.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn session_id(&self) -> SessionId {
        SessionId::from_suffix(Uuid::new_v4().simple())
    }

    fn run_id(&self) -> RunId {
        RunId::from_suffix(Uuid::new_v4().simple())
    }
}

/// Zero-padded counters: `ses_000000000001`, `ses_000000000002`, …
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    sessions: AtomicU64,
    runs: AtomicU64,
}

impl SequentialIdGenerator {
    /// A generator starting at 1.
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn session_id(&self) -> SessionId {
        let n = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        SessionId::from_suffix(format_args!("{:012}", n))
    }

    fn run_id(&self) -> RunId {
        let n = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
        RunId::from_suffix(format_args!("{:012}", n))
    }
}

/// Source of timestamps for log records.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// A clock frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_validates_prefix() {
        assert!(SessionId::parse("ses_abc").is_ok());
        assert!(SessionId::parse("ses_").is_err());
        assert!(SessionId::parse("run_abc").is_err());
        assert!(SessionId::parse("ses_a b").is_err());

        let err = RunId::parse("nope").unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn test_serde_round_trip_validates() {
        let id = DeploymentId::parse("dep_1").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"dep_1\"");
        assert_eq!(serde_json::from_str::<DeploymentId>(&json).unwrap(), id);
        assert!(serde_json::from_str::<DeploymentId>("\"evt_1\"").is_err());
    }

    #[test]
    fn test_sequential_generator() {
        let generator = SequentialIdGenerator::new();
        assert_eq!(generator.session_id().as_str(), "ses_000000000001");
        assert_eq!(generator.session_id().as_str(), "ses_000000000002");
        assert_eq!(generator.run_id().as_str(), "run_000000000001");
    }

    #[test]
    fn test_uuid_generator_ids_parse() {
        let generator = UuidIdGenerator;
        let id = generator.session_id();
        assert_eq!(SessionId::parse(id.as_str()).unwrap(), id);
        assert_ne!(generator.session_id(), id);
    }

    #[test]
    fn test_fixed_clock_advances() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(5));
    }

    #[test]
    fn test_run_id_executor() {
        let run = RunId::parse("run_7").unwrap();
        assert_eq!(run.executor_id().as_str(), "run_7");
    }
}
