//! Driver port - the durable task store.
//!
//! A driver hands out claims with `pop`. Each claim may carry a
//! driver-private continuation (for the Postgres driver, the transaction
//! holding the row lock). State mutations must go through that
//! continuation, and `cleanup` releases whatever is left of it.

use std::any::Any;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{QueueError, Task, TaskEvent, TaskInit, TaskState};

/// Opaque per-claim resource owned by the holder of a `ClaimedTask`.
pub struct Continuation(Box<dyn Any + Send>);

impl Continuation {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Box::new(value))
    }

    /// Recover the concrete value, or get the continuation back unchanged.
    pub fn downcast<T: Any + Send>(self) -> Result<T, Self> {
        self.0.downcast::<T>().map(|b| *b).map_err(Self)
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Continuation(..)")
    }
}

/// A task returned by `pop`, plus the claim that locks it.
#[derive(Debug)]
pub struct ClaimedTask {
    task: Task,
    continuation: Option<Continuation>,
}

impl ClaimedTask {
    pub fn new(task: Task, continuation: Continuation) -> Self {
        Self {
            task,
            continuation: Some(continuation),
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn into_task(self) -> Task {
        self.task
    }

    /// False once the claim was resolved or cleaned up.
    pub fn has_continuation(&self) -> bool {
        self.continuation.is_some()
    }

    pub fn take_continuation(&mut self) -> Option<Continuation> {
        self.continuation.take()
    }

    /// Take the continuation if it has type `T`. A continuation of another
    /// type stays in place.
    pub fn take_continuation_as<T: Any + Send>(&mut self) -> Option<T> {
        let continuation = self.continuation.take()?;
        match continuation.downcast::<T>() {
            Ok(value) => Some(value),
            Err(other) => {
                self.continuation = Some(other);
                None
            }
        }
    }
}

/// How a claimed task is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Complete,
    Cancel,
    Fail,
    Retry,
}

impl Resolution {
    pub fn event(self) -> TaskEvent {
        match self {
            Resolution::Complete => TaskEvent::Complete,
            Resolution::Cancel => TaskEvent::Cancel,
            Resolution::Fail => TaskEvent::Fail,
            Resolution::Retry => TaskEvent::Retry,
        }
    }

    /// State a claimed task lands in.
    pub fn target(self) -> TaskState {
        match self {
            Resolution::Complete => TaskState::Done,
            Resolution::Cancel => TaskState::Cancelled,
            Resolution::Fail => TaskState::Failed,
            Resolution::Retry => TaskState::Retry,
        }
    }
}

/// Default window after which an unacknowledged claim can be taken again.
pub const DEFAULT_STALE_CLAIM_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Durable store contract.
///
/// Implementations must guarantee that concurrent `pop` calls, from this
/// process or any other sharing the store, never return the same task.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Stable identifier for diagnostics.
    fn name(&self) -> &'static str;

    /// Delete every task regardless of state.
    async fn clear(&self) -> Result<(), QueueError>;

    /// Insert a `Ready` task created now.
    async fn add_task(&self, init: TaskInit) -> Result<(), QueueError>;

    /// Claim the oldest-attempted eligible task and mark it `Retry`.
    ///
    /// Returns `QueueError::NoTasks` when nothing is eligible.
    async fn pop(&self) -> Result<ClaimedTask, QueueError>;

    /// Release whatever remains of the claim. Safe to call more than once.
    async fn cleanup(&self, task: &mut ClaimedTask);

    /// Move every `Retry` task last attempted more than `age` ago back to
    /// `Ready`.
    async fn refresh_retry(&self, age: Duration) -> Result<(), QueueError>;

    /// Apply `resolution` through the claim's continuation and consume it.
    ///
    /// Fails with `InvalidState` when the claim has no live continuation.
    async fn resolve(
        &self,
        task: &mut ClaimedTask,
        resolution: Resolution,
        message: &str,
    ) -> Result<(), QueueError>;

    async fn complete(&self, task: &mut ClaimedTask, message: &str) -> Result<(), QueueError> {
        self.resolve(task, Resolution::Complete, message).await
    }

    async fn cancel(&self, task: &mut ClaimedTask, message: &str) -> Result<(), QueueError> {
        self.resolve(task, Resolution::Cancel, message).await
    }

    async fn fail(&self, task: &mut ClaimedTask, message: &str) -> Result<(), QueueError> {
        self.resolve(task, Resolution::Fail, message).await
    }

    async fn retry(&self, task: &mut ClaimedTask, message: &str) -> Result<(), QueueError> {
        self.resolve(task, Resolution::Retry, message).await
    }

    /// Number of tasks in any state.
    async fn queue_length(&self) -> Result<i64, QueueError>;

    /// Number of tasks named `name` that are neither `Done` nor `Cancelled`.
    async fn task_count(&self, name: &str) -> Result<i64, QueueError>;
}

pub(crate) fn missing_continuation(task: &ClaimedTask) -> QueueError {
    QueueError::InvalidState(format!(
        "task {} has no live claim (already resolved or cleaned up)",
        task.task().id()
    ))
}
