//! ActionRegistry - task name to action mapping.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::domain::{Task, TaskOutcome};
use crate::typed::{TypedAction, TypedActionAdapter, TypedTask};

/// Business logic bound to a task name.
///
/// A panic inside `run` is caught by the dispatcher and turned into a retry,
/// so actions do not need their own catch-all.
#[async_trait]
pub trait TaskAction: Send + Sync {
    async fn run(&self, task: &Task) -> TaskOutcome;
}

/// Adapter turning an async closure into a `TaskAction`. The closure gets
/// its own copy of the task.
pub struct FnAction<F> {
    f: F,
}

pub fn from_fn<F, Fut>(f: F) -> FnAction<F>
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskOutcome> + Send + 'static,
{
    FnAction { f }
}

#[async_trait]
impl<F, Fut> TaskAction for FnAction<F>
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskOutcome> + Send + 'static,
{
    async fn run(&self, task: &Task) -> TaskOutcome {
        (self.f)(task.clone()).await
    }
}

/// Shared, lock-guarded registry.
///
/// Registration may happen while a dispatcher is running; the lock is held
/// only for the map access, never while an action runs.
#[derive(Default)]
pub struct ActionRegistry {
    actions: RwLock<HashMap<String, Arc<dyn TaskAction>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `action` to `name`. The last registration wins; the replaced
    /// action, if any, is returned.
    pub fn register(
        &self,
        name: impl Into<String>,
        action: Arc<dyn TaskAction>,
    ) -> Option<Arc<dyn TaskAction>> {
        self.actions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), action)
    }

    /// Register a typed action under `T::NAME`.
    pub fn register_typed<T, A>(&self, action: A) -> Option<Arc<dyn TaskAction>>
    where
        T: TypedTask,
        A: TypedAction<T> + 'static,
    {
        self.register(T::NAME, Arc::new(TypedActionAdapter::<T, A>::new(action)))
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn TaskAction>> {
        self.actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
