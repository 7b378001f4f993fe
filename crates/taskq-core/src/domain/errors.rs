//! Error taxonomy.
//!
//! Everything except `NoTasks` is routed to the error sink by the dispatcher
//! and the stream scheduler; none of these terminate a loop.

use thiserror::Error;

use super::ids::TaskId;
use super::outcome::TaskResult;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Nothing eligible to claim. Expected, drives the poll-sleep cycle.
    #[error("no tasks available")]
    NoTasks,

    /// I/O, connectivity or constraint failure in the store.
    #[error("store error: {0}")]
    Store(String),

    /// A stored value could not be turned back into a task.
    #[error("decode error: {0}")]
    Decode(String),

    /// State mutation without a live claim, or an illegal transition.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("cancelling task {id} because there is no action to handle {name:?}")]
    Unroutable { id: TaskId, name: String },

    #[error("task {id} ({name}) reported {result}: {message}")]
    TaskFailed {
        id: TaskId,
        name: String,
        result: TaskResult,
        message: String,
    },

    /// The handler panicked or overran its timeout.
    #[error("handler for task {id} ({name}) faulted: {reason}")]
    HandlerFault {
        id: TaskId,
        name: String,
        reason: String,
    },

    #[error("scheduled action on stream {stream:?} failed: {source}")]
    Action {
        stream: String,
        #[source]
        source: ActionError,
    },

    #[error("scheduled action on stream {stream:?} panicked: {reason}")]
    ActionPanicked { stream: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl QueueError {
    pub fn is_no_tasks(&self) -> bool {
        matches!(self, QueueError::NoTasks)
    }

    /// Short stable label, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            QueueError::NoTasks => "no_tasks",
            QueueError::Store(_) => "store",
            QueueError::Decode(_) => "decode",
            QueueError::InvalidState(_) => "invalid_state",
            QueueError::Unroutable { .. } => "unroutable",
            QueueError::TaskFailed { .. } => "task_failed",
            QueueError::HandlerFault { .. } => "handler_fault",
            QueueError::Action { .. } => "action",
            QueueError::ActionPanicked { .. } => "action_panicked",
            QueueError::Config(_) => "config",
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(e: serde_json::Error) -> Self {
        QueueError::Decode(e.to_string())
    }
}

impl From<config::ConfigError> for QueueError {
    fn from(e: config::ConfigError) -> Self {
        QueueError::Config(e.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => QueueError::NoTasks,
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                QueueError::Decode(e.to_string())
            }
            other => QueueError::Store(other.to_string()),
        }
    }
}

/// Failure returned by a scheduled action.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ActionError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
