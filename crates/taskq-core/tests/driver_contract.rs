//! Driver contract against the in-memory driver.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use common::Harness;
use taskq_core::domain::{TaskInit, TaskState};
use taskq_core::drivers::InMemoryDriver;
use taskq_core::ports::{Clock, Driver, FixedClock};

struct Memory {
    clock: FixedClock,
    driver: Arc<InMemoryDriver>,
}

impl Memory {
    fn new() -> Self {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
        let driver = Arc::new(InMemoryDriver::with_clock(Arc::new(clock.clone())));
        Self { clock, driver }
    }
}

#[async_trait]
impl Harness for Memory {
    fn driver(&self) -> Arc<dyn Driver> {
        self.driver.clone()
    }

    async fn pass_time(&self) {
        self.clock.advance(Duration::from_secs(1));
    }
}

#[tokio::test]
async fn clear_empties_the_queue() {
    common::clear_empties_the_queue(&Memory::new()).await;
}

#[tokio::test]
async fn same_key_tasks_come_out_in_creation_order() {
    common::same_key_tasks_come_out_in_creation_order(&Memory::new()).await;
}

#[tokio::test]
async fn adding_during_a_claim_does_not_disturb_either_task() {
    common::adding_during_a_claim_does_not_disturb_either_task(&Memory::new()).await;
}

#[tokio::test]
async fn retried_task_waits_for_refresh() {
    common::retried_task_waits_for_refresh(&Memory::new()).await;
}

#[tokio::test]
async fn task_count_skips_done_and_cancelled() {
    common::task_count_skips_done_and_cancelled(&Memory::new()).await;
}

#[tokio::test]
async fn resolving_twice_is_an_invalid_state() {
    common::resolving_twice_is_an_invalid_state(&Memory::new()).await;
}

#[tokio::test]
async fn future_tasks_are_invisible() {
    common::future_tasks_are_invisible(&Memory::new()).await;
}

#[tokio::test]
async fn payload_types_survive_storage() {
    common::payload_types_survive_storage(&Memory::new()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_claimers_never_share_a_task() {
    common::parallel_claimers_never_share_a_task(&Memory::new(), 50, 8).await;
}

#[tokio::test]
async fn abandoned_retry_claim_is_taken_over_after_the_window() {
    let h = Memory::new();
    let driver = Arc::new(
        InMemoryDriver::with_clock(Arc::new(h.clock.clone()))
            .with_stale_claim_window(Duration::from_secs(30)),
    );
    driver.add_task(TaskInit::new("n", "k")).await.unwrap();

    let mut abandoned = driver.pop().await.unwrap();
    driver.cleanup(&mut abandoned).await;

    h.clock.advance(Duration::from_secs(30));
    assert!(driver.pop().await.unwrap_err().is_no_tasks());

    h.clock.advance(Duration::from_secs(1));
    let mut taken = driver.pop().await.unwrap();
    assert_eq!(taken.task().id(), abandoned.task().id());
    assert_eq!(taken.task().last_attempted(), h.clock.now());
    driver.complete(&mut taken, "done").await.unwrap();
    driver.cleanup(&mut taken).await;

    let tasks = driver.snapshot().await;
    assert_eq!(tasks[0].state(), TaskState::Done);
}

#[tokio::test]
async fn stale_owner_cannot_resolve_after_takeover() {
    let h = Memory::new();
    let driver = InMemoryDriver::with_clock(Arc::new(h.clock.clone()))
        .with_stale_claim_window(Duration::from_secs(10));
    driver.add_task(TaskInit::new("n", "k")).await.unwrap();

    // First claim is released without a resolution but keeps its task view.
    let mut stale = driver.pop().await.unwrap();
    let id = stale.task().id();
    driver.cleanup(&mut stale).await;

    h.clock.advance(Duration::from_secs(11));
    let mut fresh = driver.pop().await.unwrap();
    assert_eq!(fresh.task().id(), id);

    let err = driver.complete(&mut stale, "late").await.unwrap_err();
    assert!(matches!(err, taskq_core::QueueError::InvalidState(_)));

    driver.fail(&mut fresh, "broken").await.unwrap();
    driver.cleanup(&mut fresh).await;
    assert_eq!(driver.snapshot().await[0].state(), TaskState::Failed);
}

#[tokio::test]
async fn refresh_leaves_claimed_retries_alone() {
    let h = Memory::new();
    h.driver.add_task(TaskInit::new("n", "k")).await.unwrap();

    let mut held = h.driver.pop().await.unwrap();
    h.pass_time().await;
    h.driver.refresh_retry(Duration::ZERO).await.unwrap();
    assert_eq!(h.driver.snapshot().await[0].state(), TaskState::Retry);

    h.driver.cleanup(&mut held).await;
    h.driver.refresh_retry(Duration::ZERO).await.unwrap();
    let tasks = h.driver.snapshot().await;
    assert_eq!(tasks[0].state(), TaskState::Ready);
    assert_eq!(tasks[0].last_attempted(), h.clock.now());
}
