//! Driver contract against a live Postgres.
//!
//! Run with `DATABASE_URL=postgres://... cargo test -- --ignored`. Every test
//! works in its own freshly created table and drops it afterwards.
#![cfg(feature = "postgres")]

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::Harness;
use taskq_core::config::PostgresConfig;
use taskq_core::domain::{QueueError, TaskInit, TaskState};
use taskq_core::drivers::PostgresDriver;
use taskq_core::ports::Driver;

struct Postgres {
    driver: Arc<PostgresDriver>,
    table: String,
}

impl Postgres {
    async fn setup() -> Self {
        Self::setup_with(|driver| driver).await
    }

    async fn setup_with(tune: impl FnOnce(PostgresDriver) -> PostgresDriver) -> Self {
        let table = format!("taskq_test_{}", ulid::Ulid::new().to_string().to_lowercase());
        let config = PostgresConfig {
            url: std::env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            table: table.clone(),
            max_connections: 16,
            ..PostgresConfig::default()
        };
        let driver = PostgresDriver::connect(&config).await.unwrap();
        driver.ensure_schema().await.unwrap();
        Self {
            driver: Arc::new(tune(driver)),
            table,
        }
    }

    async fn teardown(self) {
        sqlx::query(&format!("DROP TABLE IF EXISTS \"{}\"", self.table))
            .execute(self.driver.pool())
            .await
            .unwrap();
    }
}

#[async_trait]
impl Harness for Postgres {
    fn driver(&self) -> Arc<dyn Driver> {
        self.driver.clone()
    }

    async fn pass_time(&self) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

macro_rules! contract {
    ($($name:ident),* $(,)?) => {
        $(
            #[tokio::test]
            #[ignore = "needs DATABASE_URL"]
            async fn $name() {
                let h = Postgres::setup().await;
                common::$name(&h).await;
                h.teardown().await;
            }
        )*
    };
}

contract!(
    clear_empties_the_queue,
    same_key_tasks_come_out_in_creation_order,
    adding_during_a_claim_does_not_disturb_either_task,
    retried_task_waits_for_refresh,
    task_count_skips_done_and_cancelled,
    resolving_twice_is_an_invalid_state,
    future_tasks_are_invisible,
    payload_types_survive_storage,
);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "needs DATABASE_URL"]
async fn parallel_claimers_never_share_a_task() {
    let h = Postgres::setup().await;
    common::parallel_claimers_never_share_a_task(&h, 50, 8).await;
    h.teardown().await;
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn abandoned_claim_is_taken_over_after_the_window() {
    let h = Postgres::setup_with(|d| d.with_stale_claim_window(Duration::from_millis(200))).await;
    let driver = h.driver();
    driver.add_task(TaskInit::new("n", "k")).await.unwrap();

    let mut abandoned = driver.pop().await.unwrap();
    driver.cleanup(&mut abandoned).await;
    assert!(driver.pop().await.unwrap_err().is_no_tasks());

    tokio::time::sleep(Duration::from_millis(300)).await;
    let mut taken = driver.pop().await.unwrap();
    assert_eq!(taken.task().id(), abandoned.task().id());
    assert_eq!(taken.task().state(), TaskState::Retry);
    driver.complete(&mut taken, "done").await.unwrap();
    driver.cleanup(&mut taken).await;
    assert_eq!(driver.task_count("n").await.unwrap(), 0);

    h.teardown().await;
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn ensure_schema_is_idempotent() {
    let h = Postgres::setup().await;
    h.driver.ensure_schema().await.unwrap();
    h.driver.add_task(TaskInit::new("n", "k")).await.unwrap();
    h.driver.ensure_schema().await.unwrap();
    assert_eq!(h.driver.queue_length().await.unwrap(), 1);
    h.teardown().await;
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn undecodable_payload_keeps_the_claim() {
    let h = Postgres::setup().await;
    h.driver.add_task(TaskInit::new("n", "k")).await.unwrap();
    sqlx::query(&format!("UPDATE \"{}\" SET data = '[1]'::jsonb", h.table))
        .execute(h.driver.pool())
        .await
        .unwrap();

    let err = h.driver.pop().await.unwrap_err();
    assert!(matches!(err, QueueError::Decode(_)), "got {err:?}");

    let (state, message): (String, String) = sqlx::query_as(&format!(
        "SELECT state, last_attempt_message FROM \"{}\"",
        h.table
    ))
    .fetch_one(h.driver.pool())
    .await
    .unwrap();
    assert_eq!(state, TaskState::Retry.as_str());
    assert_eq!(message, "Attempting");
    // Committed claim: not handed out again inside the stale window.
    assert!(h.driver.pop().await.unwrap_err().is_no_tasks());

    h.teardown().await;
}
