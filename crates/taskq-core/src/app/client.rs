//! TaskClient - producer-side entry point.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::{QueueError, TaskData, TaskInit};
use crate::ports::Driver;
use crate::typed::TypedTask;

/// Thin wrapper that forwards to the driver.
#[derive(Clone)]
pub struct TaskClient {
    driver: Arc<dyn Driver>,
}

impl TaskClient {
    /// Client enqueueing into `driver`.
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self { driver }
    }

    /// Enqueue a task that becomes eligible at `do_after`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use chrono::Utc;
    /// # use taskq_core::app::TaskClient;
    /// # use taskq_core::domain::TaskData;
    /// # async fn demo(client: TaskClient) -> Result<(), taskq_core::QueueError> {
    /// client
    ///     .add_task("customer_update", "customer:42", Utc::now(), "billing", TaskData::new())
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn add_task(
        &self,
        name: &str,
        key: &str,
        do_after: DateTime<Utc>,
        created_by: &str,
        data: TaskData,
    ) -> Result<(), QueueError> {
        self.add(
            TaskInit::new(name, key)
                .do_after(do_after)
                .created_by(created_by)
                .data(data),
        )
        .await
    }

    /// Enqueue a prepared `TaskInit`.
    pub async fn add(&self, init: TaskInit) -> Result<(), QueueError> {
        debug!(task_name = %init.name, task_key = %init.key, do_after = ?init.do_after, "enqueue");
        self.driver.add_task(init).await
    }

    /// Enqueue a typed payload under `T::NAME`, eligible immediately.
    pub async fn add_typed<T: TypedTask>(
        &self,
        key: &str,
        created_by: &str,
        payload: &T,
    ) -> Result<(), QueueError> {
        self.add(
            TaskInit::new(T::NAME, key)
                .created_by(created_by)
                .data(payload.encode()?),
        )
        .await
    }

    /// Live (not done, not cancelled) tasks named `name`.
    pub async fn task_count(&self, name: &str) -> Result<i64, QueueError> {
        self.driver.task_count(name).await
    }

    /// Every stored task, whatever its state.
    pub async fn queue_length(&self) -> Result<i64, QueueError> {
        self.driver.queue_length().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::InMemoryDriver;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Serialize, Deserialize)]
    struct Reindex {
        index: String,
    }

    impl TypedTask for Reindex {
        const NAME: &'static str = "reindex";
    }

    #[tokio::test]
    async fn forwards_to_the_driver() {
        let driver = Arc::new(InMemoryDriver::new());
        let client = TaskClient::new(driver.clone());

        let mut data = TaskData::new();
        data.insert("customer".into(), json!(42));
        client
            .add_task("customer_update", "customer:42", Utc::now(), "tests", data)
            .await
            .unwrap();
        client
            .add_typed("idx:orders", "tests", &Reindex {
                index: "orders".into(),
            })
            .await
            .unwrap();

        assert_eq!(client.queue_length().await.unwrap(), 2);
        assert_eq!(client.task_count("customer_update").await.unwrap(), 1);

        let tasks = driver.snapshot().await;
        assert_eq!(tasks[0].created_by(), "tests");
        assert_eq!(tasks[1].name(), "reindex");
        assert_eq!(tasks[1].get("index"), Some(&json!("orders")));
    }
}
