//! Task state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::QueueError;

/// Lifecycle state of a stored task.
///
/// State transitions:
/// - (new) -> Ready
/// - Ready -> Retry (claim)
/// - Retry/InProgress -> Retry (claim, only once the previous claim went stale)
/// - Retry -> Ready (retry aging)
/// - Retry/InProgress -> Done | Cancelled | Failed | Retry (resolution)
///
/// A claim always lands in `Retry`, never in `InProgress`: if the claiming
/// process dies before reporting, the task is already marked for a later
/// retry. `InProgress` is still recognized so that rows written in that state
/// stay reclaimable once stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Ready,
    InProgress,
    Retry,
    Cancelled,
    Failed,
    Done,
}

/// Something that moves a task from one state to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    Claim,
    RefreshRetry,
    Complete,
    Cancel,
    Fail,
    Retry,
}

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        TaskState::Ready,
        TaskState::InProgress,
        TaskState::Retry,
        TaskState::Cancelled,
        TaskState::Failed,
        TaskState::Done,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Ready => "READY",
            TaskState::InProgress => "IN_PROGRESS",
            TaskState::Retry => "RETRY",
            TaskState::Cancelled => "CANCELLED",
            TaskState::Failed => "FAILED",
            TaskState::Done => "DONE",
        }
    }

    /// No further claim or transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Cancelled | TaskState::Failed | TaskState::Done
        )
    }

    /// Counted by `task_count`: everything except `Cancelled` and `Done`.
    /// Failed tasks stay live until an operator clears them.
    pub fn is_live(self) -> bool {
        !matches!(self, TaskState::Cancelled | TaskState::Done)
    }

    /// Holds a claim that may go stale (and then be reclaimed).
    pub fn is_claimed(self) -> bool {
        matches!(self, TaskState::InProgress | TaskState::Retry)
    }

    /// Apply `event` and return the next state, or `InvalidState` if the
    /// transition is not in the table. Staleness and eligibility timing are
    /// the driver's business; this only checks the shape of the transition.
    pub fn apply(self, event: TaskEvent) -> Result<TaskState, QueueError> {
        use TaskEvent as E;
        use TaskState as S;

        let next = match (self, event) {
            (S::Ready, E::Claim) => S::Retry,
            (S::Retry | S::InProgress, E::Claim) => S::Retry,
            (S::Retry, E::RefreshRetry) => S::Ready,
            (S::Retry | S::InProgress, E::Complete) => S::Done,
            (S::Retry | S::InProgress, E::Cancel) => S::Cancelled,
            (S::Retry | S::InProgress, E::Fail) => S::Failed,
            (S::Retry | S::InProgress, E::Retry) => S::Retry,
            (from, event) => {
                return Err(QueueError::InvalidState(format!(
                    "no transition from {from} on {event:?}"
                )));
            }
        };
        Ok(next)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "IN PROGRESS" is what older rows were written with.
        match s {
            "READY" => Ok(TaskState::Ready),
            "IN_PROGRESS" | "IN PROGRESS" => Ok(TaskState::InProgress),
            "RETRY" => Ok(TaskState::Retry),
            "CANCELLED" => Ok(TaskState::Cancelled),
            "FAILED" => Ok(TaskState::Failed),
            "DONE" => Ok(TaskState::Done),
            other => Err(QueueError::Decode(format!("unknown task state {other:?}"))),
        }
    }
}
