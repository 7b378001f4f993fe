//! Driver contract shared by every driver's integration tests.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use taskq_core::domain::{QueueError, TaskInit, TaskState};
use taskq_core::ports::Driver;

/// A driver under test plus a way to let time pass for it.
#[async_trait]
pub trait Harness: Send + Sync {
    fn driver(&self) -> Arc<dyn Driver>;

    /// Move time forward far enough that new timestamps compare strictly
    /// greater than earlier ones.
    async fn pass_time(&self);
}

fn ordered(order: i64) -> TaskInit {
    TaskInit::new("customer_update", "k1")
        .created_by("test_runner")
        .with("order", order)
}

pub async fn clear_empties_the_queue(h: &dyn Harness) {
    let driver = h.driver();
    for i in 0..5 {
        driver.add_task(ordered(i)).await.unwrap();
    }
    assert_eq!(driver.queue_length().await.unwrap(), 5);

    driver.clear().await.unwrap();
    assert_eq!(driver.queue_length().await.unwrap(), 0);
    assert!(driver.pop().await.unwrap_err().is_no_tasks());
}

pub async fn same_key_tasks_come_out_in_creation_order(h: &dyn Harness) {
    let driver = h.driver();
    for order in 1..=3 {
        driver.add_task(ordered(order)).await.unwrap();
        h.pass_time().await;
    }

    for expected in 1..=3 {
        let mut claimed = driver.pop().await.unwrap();
        assert_eq!(claimed.task().key(), "k1");
        assert_eq!(claimed.task().get("order"), Some(&json!(expected)));
        driver.complete(&mut claimed, "Task Complete").await.unwrap();
        driver.cleanup(&mut claimed).await;
    }

    assert!(matches!(driver.pop().await, Err(QueueError::NoTasks)));
}

pub async fn adding_during_a_claim_does_not_disturb_either_task(h: &dyn Harness) {
    let driver = h.driver();
    driver.add_task(ordered(1)).await.unwrap();
    h.pass_time().await;

    let mut first = driver.pop().await.unwrap();
    driver.add_task(ordered(2)).await.unwrap();
    driver.complete(&mut first, "done").await.unwrap();
    driver.cleanup(&mut first).await;

    let mut second = driver.pop().await.unwrap();
    assert_eq!(second.task().get("order"), Some(&json!(2)));
    assert_eq!(second.task().created_by(), "test_runner");
    assert_eq!(second.task().name(), "customer_update");
    driver.complete(&mut second, "done").await.unwrap();
    driver.cleanup(&mut second).await;

    assert!(driver.pop().await.unwrap_err().is_no_tasks());
}

pub async fn retried_task_waits_for_refresh(h: &dyn Harness) {
    let driver = h.driver();
    driver.add_task(ordered(1)).await.unwrap();

    let mut claimed = driver.pop().await.unwrap();
    let id = claimed.task().id();
    driver.retry(&mut claimed, "try later").await.unwrap();
    driver.cleanup(&mut claimed).await;
    assert!(driver.pop().await.unwrap_err().is_no_tasks());

    driver.refresh_retry(Duration::from_secs(3600)).await.unwrap();
    assert!(driver.pop().await.unwrap_err().is_no_tasks());

    h.pass_time().await;
    driver.refresh_retry(Duration::ZERO).await.unwrap();
    let mut again = driver.pop().await.unwrap();
    assert_eq!(again.task().id(), id);
    assert_eq!(again.task().state(), TaskState::Retry);
    driver.complete(&mut again, "done").await.unwrap();
    driver.cleanup(&mut again).await;
}

pub async fn task_count_skips_done_and_cancelled(h: &dyn Harness) {
    let driver = h.driver();
    for _ in 0..5 {
        driver
            .add_task(TaskInit::new("counted", "k"))
            .await
            .unwrap();
    }
    driver.add_task(TaskInit::new("other", "k")).await.unwrap();
    assert_eq!(driver.task_count("counted").await.unwrap(), 5);

    // Done, Cancelled, Failed, Retry; the fifth stays Ready.
    let mut resolved = 0;
    while resolved < 4 {
        let mut claimed = driver.pop().await.unwrap();
        if claimed.task().name() != "counted" {
            driver.cleanup(&mut claimed).await;
            continue;
        }
        match resolved {
            0 => driver.complete(&mut claimed, "done").await.unwrap(),
            1 => driver.cancel(&mut claimed, "cancelled").await.unwrap(),
            2 => driver.fail(&mut claimed, "failed").await.unwrap(),
            _ => driver.retry(&mut claimed, "retry").await.unwrap(),
        }
        driver.cleanup(&mut claimed).await;
        resolved += 1;
    }

    assert_eq!(driver.task_count("counted").await.unwrap(), 3);
    assert_eq!(driver.task_count("other").await.unwrap(), 1);
    assert_eq!(driver.task_count("missing").await.unwrap(), 0);
    assert_eq!(driver.queue_length().await.unwrap(), 6);
}

pub async fn resolving_twice_is_an_invalid_state(h: &dyn Harness) {
    let driver = h.driver();
    driver.add_task(ordered(1)).await.unwrap();

    let mut claimed = driver.pop().await.unwrap();
    driver.fail(&mut claimed, "broken").await.unwrap();
    let err = driver.complete(&mut claimed, "too late").await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidState(_)));

    driver.cleanup(&mut claimed).await;
    assert_eq!(driver.task_count("customer_update").await.unwrap(), 1);
    assert!(driver.pop().await.unwrap_err().is_no_tasks());
}

pub async fn future_tasks_are_invisible(h: &dyn Harness) {
    let driver = h.driver();
    let later = Utc::now() + chrono::Duration::hours(1);
    driver
        .add_task(ordered(1).do_after(later))
        .await
        .unwrap();

    assert!(driver.pop().await.unwrap_err().is_no_tasks());
    assert_eq!(driver.queue_length().await.unwrap(), 1);
}

pub async fn payload_types_survive_storage(h: &dyn Harness) {
    let driver = h.driver();
    let init = TaskInit::new("payload", "k")
        .with("exampleString", "val1")
        .with("exampleBool", true)
        .with("exampleNumber", 2.5)
        .with("nested", json!({"list": [1, "two", null], "flag": false}));
    let expected = init.data.clone();
    driver.add_task(init).await.unwrap();

    let mut claimed = driver.pop().await.unwrap();
    assert_eq!(claimed.task().data(), &expected);
    assert_eq!(claimed.task().last_attempt_message(), "Attempting");
    driver.complete(&mut claimed, "done").await.unwrap();
    driver.cleanup(&mut claimed).await;
}

/// Several claimers drain the queue concurrently; every task is claimed by
/// exactly one of them.
pub async fn parallel_claimers_never_share_a_task(h: &dyn Harness, tasks: usize, claimers: usize) {
    let driver = h.driver();
    for i in 0..tasks {
        driver
            .add_task(TaskInit::new("parallel", format!("k{i}")))
            .await
            .unwrap();
    }

    let mut joins = Vec::with_capacity(claimers);
    for _ in 0..claimers {
        let driver = driver.clone();
        joins.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            loop {
                let mut claimed = match driver.pop().await {
                    Ok(claimed) => claimed,
                    Err(QueueError::NoTasks) => break,
                    Err(err) => panic!("pop failed: {err}"),
                };
                seen.push(claimed.task().id());
                tokio::task::yield_now().await;
                driver.complete(&mut claimed, "done").await.unwrap();
                driver.cleanup(&mut claimed).await;
            }
            seen
        }));
    }

    let mut all = Vec::new();
    for join in joins {
        all.extend(join.await.unwrap());
    }
    let unique: HashSet<_> = all.iter().copied().collect();
    assert_eq!(unique.len(), all.len(), "a task was claimed twice");
    assert_eq!(all.len(), tasks);
    assert_eq!(driver.task_count("parallel").await.unwrap(), 0);
}
