//! Runtime configuration.
//!
//! Sources, later ones winning:
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. `TASKQ__`-prefixed environment variables, `__` separating sections
//!    (`TASKQ__POSTGRES__URL`, `TASKQ__DISPATCHER__POLL_INTERVAL_MS`, ...)

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::domain::QueueError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub dispatcher: DispatcherConfig,
    pub postgres: PostgresConfig,
}

impl QueueConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, QueueError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        let loaded: QueueConfig = builder
            .add_source(
                Environment::with_prefix("TASKQ")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        self.dispatcher.validate()?;
        self.postgres.validate()
    }
}

/// Dispatcher loop timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Sleep between claim cycles.
    pub poll_interval_ms: u64,
    /// Minimum time between two `refresh_retry` calls.
    pub refresh_interval_ms: u64,
    /// Age after which a `Retry` task becomes `Ready` again.
    pub retry_age_secs: u64,
    /// Handlers running longer than this are treated as faulted.
    pub handler_timeout_secs: Option<u64>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            refresh_interval_ms: 4_000,
            retry_age_secs: 3_600,
            handler_timeout_secs: None,
        }
    }
}

impl DispatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn retry_age(&self) -> Duration {
        Duration::from_secs(self.retry_age_secs)
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.handler_timeout_secs == Some(0) {
            return Err(QueueError::Config(
                "dispatcher.handler_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub url: String,
    pub schema: Option<String>,
    pub table: String,
    pub stale_claim_window_secs: u64,
    pub max_connections: u32,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/taskq".to_string(),
            schema: None,
            table: "task_queue".to_string(),
            stale_claim_window_secs: 600,
            max_connections: 5,
        }
    }
}

impl PostgresConfig {
    pub fn stale_claim_window(&self) -> Duration {
        Duration::from_secs(self.stale_claim_window_secs)
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        validate_identifier("postgres.table", &self.table)?;
        if let Some(schema) = &self.schema {
            validate_identifier("postgres.schema", schema)?;
        }
        if self.max_connections == 0 {
            return Err(QueueError::Config(
                "postgres.max_connections must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Accepts `[A-Za-z_][A-Za-z0-9_]*`, the only names spliced into SQL.
pub fn validate_identifier(what: &str, value: &str) -> Result<(), QueueError> {
    let mut chars = value.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(QueueError::Config(format!(
            "{what} {value:?} is not a valid identifier"
        )))
    }
}
