//! TypedAction - actions that receive a decoded payload.
//!
//! `TypedActionAdapter<T, A>` erases the payload type so a `TypedAction<T>`
//! can sit in the `ActionRegistry` next to plain `TaskAction`s.

use std::marker::PhantomData;

use async_trait::async_trait;
use tracing::warn;

use super::task::TypedTask;
use crate::app::registry::TaskAction;
use crate::domain::{Task, TaskOutcome};

#[async_trait]
pub trait TypedAction<T: TypedTask>: Send + Sync {
    async fn run(&self, payload: T, task: &Task) -> TaskOutcome;
}

pub struct TypedActionAdapter<T: TypedTask, A: TypedAction<T>> {
    action: A,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TypedTask, A: TypedAction<T>> TypedActionAdapter<T, A> {
    pub fn new(action: A) -> Self {
        Self {
            action,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TypedTask, A: TypedAction<T>> TaskAction for TypedActionAdapter<T, A> {
    /// A payload that does not decode can never succeed, so it fails
    /// permanently instead of cycling through retries.
    async fn run(&self, task: &Task) -> TaskOutcome {
        match T::decode(task.data()) {
            Ok(payload) => self.action.run(payload, task).await,
            Err(err) => {
                warn!(task_id = %task.id(), task_name = T::NAME, error = %err, "payload did not decode");
                TaskOutcome::permanent_failure(format!("invalid payload for {}: {err}", T::NAME))
            }
        }
    }
}
