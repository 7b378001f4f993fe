//! In-memory driver.
//!
//! Implements the whole driver contract inside one process. A claim is
//! modelled as a row lock: while a claim token is registered for a task,
//! no other `pop` can see it, and only the holder of that token can
//! resolve it. A claim older than the stale-claim window no longer hides
//! its task, so a claim dropped without `cleanup` cannot strand it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::domain::{QueueError, Task, TaskEvent, TaskId, TaskInit, TaskRow, TaskState};
use crate::ports::clock::cutoff;
use crate::ports::driver::missing_continuation;
use crate::ports::{
    ClaimedTask, Clock, Continuation, DEFAULT_STALE_CLAIM_WINDOW, Driver, IdGenerator,
    Resolution, SystemClock, UlidGenerator,
};

/// Continuation for an in-memory claim.
#[derive(Debug)]
struct MemoryClaim {
    id: TaskId,
    token: u64,
}

/// In-memory store state.
#[derive(Default)]
struct MemoryState {
    /// Rows in insertion order; the index breaks `last_attempted` ties.
    tasks: Vec<TaskRow>,

    /// Claims, task id -> claim token. Stale entries are overwritten by
    /// the next claim of the same task.
    claims: HashMap<TaskId, u64>,

    /// Next claim token to hand out.
    next_token: u64,
}

impl MemoryState {
    fn position(&self, id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|row| row.id == id)
    }

    fn holds(&self, claim: &MemoryClaim) -> bool {
        self.claims.get(&claim.id) == Some(&claim.token)
    }
}

/// Driver keeping every task in process memory.
///
/// # Example
///
/// ```no_run
/// # use taskq_core::domain::TaskInit;
/// # use taskq_core::drivers::InMemoryDriver;
/// # use taskq_core::ports::Driver;
/// # async fn demo() -> Result<(), taskq_core::QueueError> {
/// let driver = InMemoryDriver::new();
/// driver.add_task(TaskInit::new("customer_update", "k1")).await?;
/// assert_eq!(driver.task_count("customer_update").await?, 1);
/// # Ok(())
/// # }
/// ```
pub struct InMemoryDriver {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
    ids: UlidGenerator<Arc<dyn Clock>>,
    stale_claim_window: Duration,
}

impl InMemoryDriver {
    /// Empty driver on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Driver that reads time from `clock`, so eligibility, staleness and
    /// retry aging can be driven by a `FixedClock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            ids: UlidGenerator::new(clock.clone()),
            clock,
            stale_claim_window: DEFAULT_STALE_CLAIM_WINDOW,
        }
    }

    /// Age after which a claim stops hiding its task from `pop`.
    pub fn with_stale_claim_window(mut self, window: Duration) -> Self {
        self.stale_claim_window = window;
        self
    }

    /// Copy of every stored task, in insertion order.
    pub async fn snapshot(&self) -> Vec<Task> {
        let state = self.state.lock().await;
        state.tasks.iter().cloned().map(Task::from).collect()
    }
}

impl Default for InMemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for InMemoryDriver {
    fn name(&self) -> &'static str {
        "InMemoryDriver"
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.tasks.clear();
        state.claims.clear();
        Ok(())
    }

    #[instrument(skip_all, fields(task_name = %init.name, task_key = %init.key))]
    async fn add_task(&self, init: TaskInit) -> Result<(), QueueError> {
        let row = TaskRow::created(self.ids.generate_task_id(), init, self.clock.now());
        debug!(task_id = %row.id, "task added");
        self.state.lock().await.tasks.push(row);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn pop(&self) -> Result<ClaimedTask, QueueError> {
        let now = self.clock.now();
        let stale_before = cutoff(now, self.stale_claim_window);
        let mut state = self.state.lock().await;

        let claims = &state.claims;
        let index = state
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, row)| !claims.contains_key(&row.id) || row.last_attempted < stale_before)
            .filter(|(_, row)| row.do_after <= now)
            .filter(|(_, row)| {
                row.state == TaskState::Ready
                    || (row.state.is_claimed() && row.last_attempted < stale_before)
            })
            .min_by_key(|(index, row)| (row.last_attempted, *index))
            .map(|(index, _)| index)
            .ok_or(QueueError::NoTasks)?;

        let token = state.next_token;
        state.next_token += 1;

        let row = &mut state.tasks[index];
        row.state = row.state.apply(TaskEvent::Claim)?;
        row.last_attempted = now;
        row.last_attempt_message = "Attempting".to_string();
        let row = row.clone();

        state.claims.insert(row.id, token);
        debug!(task_id = %row.id, task_name = %row.name, "task claimed");

        let claim = MemoryClaim { id: row.id, token };
        Ok(ClaimedTask::new(row.into(), Continuation::new(claim)))
    }

    #[instrument(skip_all, fields(task_id = %task.task().id()))]
    async fn cleanup(&self, task: &mut ClaimedTask) {
        let Some(continuation) = task.take_continuation() else {
            return;
        };
        if let Ok(claim) = continuation.downcast::<MemoryClaim>() {
            let mut state = self.state.lock().await;
            if state.holds(&claim) {
                state.claims.remove(&claim.id);
            }
        }
    }

    #[instrument(skip(self))]
    async fn refresh_retry(&self, age: Duration) -> Result<(), QueueError> {
        let now = self.clock.now();
        let older_than = cutoff(now, age);
        let mut state = self.state.lock().await;
        let MemoryState { tasks, claims, .. } = &mut *state;

        let mut refreshed = 0_usize;
        for row in tasks.iter_mut().filter(|row| {
            row.state == TaskState::Retry
                && row.last_attempted < older_than
                && !claims.contains_key(&row.id)
        }) {
            row.state = row.state.apply(TaskEvent::RefreshRetry)?;
            row.last_attempted = now;
            refreshed += 1;
        }
        if refreshed > 0 {
            debug!(refreshed, "retry tasks made ready");
        }
        Ok(())
    }

    #[instrument(skip_all, fields(task_id = %task.task().id(), resolution = ?resolution))]
    async fn resolve(
        &self,
        task: &mut ClaimedTask,
        resolution: Resolution,
        message: &str,
    ) -> Result<(), QueueError> {
        let claim = task
            .take_continuation_as::<MemoryClaim>()
            .ok_or_else(|| missing_continuation(task))?;

        let mut state = self.state.lock().await;
        let index = match state.position(claim.id) {
            Some(index) if state.holds(&claim) => index,
            _ => return Err(missing_continuation(task)),
        };

        let row = &mut state.tasks[index];
        let applied = row.state.apply(resolution.event());
        if let Ok(next) = &applied {
            row.state = *next;
            row.last_attempted = self.clock.now();
            row.last_attempt_message = message.to_string();
        }
        state.claims.remove(&claim.id);
        applied.map(|_| ())
    }

    async fn queue_length(&self) -> Result<i64, QueueError> {
        Ok(self.state.lock().await.tasks.len() as i64)
    }

    async fn task_count(&self, name: &str) -> Result<i64, QueueError> {
        let state = self.state.lock().await;
        let count = state
            .tasks
            .iter()
            .filter(|row| row.name == name && row.state.is_live())
            .count();
        Ok(count as i64)
    }
}
