// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Runloom engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Attempts per call before the call is given up
    pub max_attempts: u32,
    /// Advisory backoff recorded on failed attempts
    pub retry_interval: Duration,
    /// Identifier stamped on every log record this process appends
    pub process_id: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `RUNLOOM_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `RUNLOOM_MAX_ATTEMPTS`: Attempts per call (default: 3)
    /// - `RUNLOOM_RETRY_INTERVAL_MS`: Backoff between attempts (default: 1000)
    /// - `RUNLOOM_PROCESS_ID`: Producing-process id (default: hostname-pid)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("RUNLOOM_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("RUNLOOM_DATABASE_URL"))?;

        let max_attempts: u32 = std::env::var("RUNLOOM_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "RUNLOOM_MAX_ATTEMPTS",
                "must be a positive integer",
            ))?;

        let retry_interval_ms: u64 = std::env::var("RUNLOOM_RETRY_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "RUNLOOM_RETRY_INTERVAL_MS",
                    "must be a non-negative integer",
                )
            })?;

        let process_id = std::env::var("RUNLOOM_PROCESS_ID")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(default_process_id);

        Ok(Self {
            database_url,
            max_attempts,
            retry_interval: Duration::from_millis(retry_interval_ms),
            process_id,
        })
    }

    /// Retry policy derived from this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            retry_interval: self.retry_interval,
        }
    }
}

fn default_process_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{}-{}", host, std::process::id())
}

/// How many times a call is attempted and how long callers should back off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    /// Advisory delay before the next attempt.
    pub retry_interval: Duration,
}

impl RetryPolicy {
    /// Whether `attempt` (zero-based) is the last one allowed.
    pub fn is_last(&self, attempt: i64) -> bool {
        attempt + 1 >= i64::from(self.max_attempts)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_interval: Duration::from_secs(1),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
