//! Dispatcher - claim, route, execute, record.
//!
//! `spawn` runs two tokio tasks joined by a handoff channel:
//! - the poller refreshes aged retries, claims a task, hands it over and
//!   waits for the acknowledgement before it polls again
//! - the executor runs the action and records the outcome
//!
//! A single dispatcher therefore never holds more than one claim. Scale
//! out by running more dispatchers against the same store.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::registry::{ActionRegistry, TaskAction};
use super::status::{Counter, DispatchCounts, DispatchStats};
use crate::config::DispatcherConfig;
use crate::domain::{QueueError, Task, TaskOutcome, TaskResult};
use crate::ports::{ClaimedTask, Driver, ErrorSink, TracingErrorSink};

/// A claimed task on its way to the executor, with the ack the poller
/// waits on.
type Handoff = (ClaimedTask, oneshot::Sender<()>);

/// Claims tasks one at a time and routes them to registered actions.
///
/// Cloning is cheap; clones share the driver, registry, sink and counters.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use taskq_core::app::{ActionRegistry, Dispatcher};
/// # use taskq_core::drivers::InMemoryDriver;
/// # async fn demo() {
/// let dispatcher = Dispatcher::new(Arc::new(InMemoryDriver::new()), Arc::new(ActionRegistry::new()));
/// let handle = dispatcher.spawn();
/// handle.stop().await;
/// # }
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    driver: Arc<dyn Driver>,
    registry: Arc<ActionRegistry>,
    config: DispatcherConfig,
    sink: Arc<dyn ErrorSink>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    /// Dispatcher with default timings that reports to `TracingErrorSink`.
    pub fn new(driver: Arc<dyn Driver>, registry: Arc<ActionRegistry>) -> Self {
        Self {
            driver,
            registry,
            config: DispatcherConfig::default(),
            sink: Arc::new(TracingErrorSink),
            stats: Arc::new(DispatchStats::default()),
        }
    }

    /// Replace poll, refresh, retry-age and timeout settings.
    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Route every reported error to `sink` instead of the log.
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// Counters for this dispatcher and its clones.
    pub fn stats(&self) -> DispatchCounts {
        self.stats.snapshot()
    }

    /// Refresh aged retries.
    pub async fn refresh(&self) {
        if let Err(err) = self.driver.refresh_retry(self.config.retry_age()).await {
            self.report(&err);
        }
    }

    /// Claim and dispatch one task on the calling task.
    ///
    /// Returns `Ok(false)` when nothing was eligible. A claim error is
    /// returned as is; everything after a successful claim is reported to
    /// the error sink and never returned.
    pub async fn dispatch_next(&self) -> Result<bool, QueueError> {
        match self.driver.pop().await {
            Ok(claimed) => {
                self.dispatch(claimed).await;
                Ok(true)
            }
            Err(QueueError::NoTasks) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Start the poller and executor tasks.
    pub fn spawn(&self) -> DispatcherHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (handoff_tx, handoff_rx) = mpsc::channel::<Handoff>(1);

        info!(
            driver = self.driver.name(),
            actions = ?self.registry.names(),
            "dispatcher starting"
        );

        let executor = tokio::spawn(self.clone().execute_loop(handoff_rx));
        let poller = tokio::spawn(self.clone().poll_loop(handoff_tx, stop_rx));

        DispatcherHandle {
            stop_tx,
            poller,
            executor,
            stats: self.stats.clone(),
        }
    }

    async fn poll_loop(self, handoff: mpsc::Sender<Handoff>, mut stop_rx: watch::Receiver<bool>) {
        let mut last_refresh: Option<Instant> = None;

        loop {
            if *stop_rx.borrow() {
                break;
            }

            if last_refresh.is_none_or(|at| at.elapsed() > self.config.refresh_interval()) {
                self.refresh().await;
                last_refresh = Some(Instant::now());
            }

            match self.driver.pop().await {
                Ok(claimed) => {
                    let (id, name) = (claimed.task().id(), claimed.task().name().to_string());
                    let (ack_tx, ack_rx) = oneshot::channel();
                    if let Err(mpsc::error::SendError((mut claimed, _))) =
                        handoff.send((claimed, ack_tx)).await
                    {
                        warn!("executor stopped, dispatcher exiting");
                        self.driver.cleanup(&mut claimed).await;
                        break;
                    }
                    if ack_rx.await.is_err() {
                        warn!(task_id = %id, "executor dropped a task without acknowledging it");
                        self.report(&QueueError::HandlerFault {
                            id,
                            name,
                            reason: "executor stopped before acknowledging the claim".to_string(),
                        });
                        break;
                    }
                }
                Err(QueueError::NoTasks) => {}
                Err(err) => self.report(&err),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
                changed = stop_rx.changed() => {
                    // handle dropped
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("dispatcher poller stopped");
    }

    async fn execute_loop(self, mut handoff: mpsc::Receiver<Handoff>) {
        while let Some((claimed, ack)) = handoff.recv().await {
            self.dispatch(claimed).await;
            let _ = ack.send(());
        }
        debug!("dispatcher executor stopped");
    }

    /// Route one claimed task, record its outcome and release the claim.
    #[instrument(skip_all, fields(task_id = %claimed.task().id(), task_name = %claimed.task().name()))]
    async fn dispatch(&self, mut claimed: ClaimedTask) {
        self.stats.bump(Counter::Claimed);

        match self.registry.lookup(claimed.task().name()) {
            None => self.cancel_unroutable(&mut claimed).await,
            Some(action) => match self.invoke(action.as_ref(), claimed.task()).await {
                Ok(outcome) => self.record(&mut claimed, outcome).await,
                Err(fault) => {
                    self.stats.bump(Counter::Faults);
                    self.report(&fault);
                    let message = fault.to_string();
                    self.resolve(&mut claimed, TaskResult::RetryFailure, &message)
                        .await;
                }
            },
        }

        self.driver.cleanup(&mut claimed).await;
    }

    async fn cancel_unroutable(&self, claimed: &mut ClaimedTask) {
        let err = QueueError::Unroutable {
            id: claimed.task().id(),
            name: claimed.task().name().to_string(),
        };
        self.report(&err);
        match self.driver.cancel(claimed, &err.to_string()).await {
            Ok(()) => self.stats.bump(Counter::Cancelled),
            Err(cancel_err) => self.report(&cancel_err),
        }
    }

    /// Run the action, turning a panic or a timeout into `HandlerFault`.
    async fn invoke(&self, action: &dyn TaskAction, task: &Task) -> Result<TaskOutcome, QueueError> {
        let run = AssertUnwindSafe(action.run(task)).catch_unwind();
        let finished = match self.config.handler_timeout() {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(finished) => finished.map_err(panic_message),
                Err(_) => Err(format!("timed out after {limit:?}")),
            },
            None => run.await.map_err(panic_message),
        };

        finished.map_err(|reason| QueueError::HandlerFault {
            id: task.id(),
            name: task.name().to_string(),
            reason,
        })
    }

    async fn record(&self, claimed: &mut ClaimedTask, outcome: TaskOutcome) {
        debug!(result = %outcome.result, message = %outcome.message, "action finished");
        if outcome.result.is_failure() {
            self.report(&QueueError::TaskFailed {
                id: claimed.task().id(),
                name: claimed.task().name().to_string(),
                result: outcome.result,
                message: outcome.message.clone(),
            });
        }
        self.resolve(claimed, outcome.result, &outcome.message).await;
    }

    async fn resolve(&self, claimed: &mut ClaimedTask, result: TaskResult, message: &str) {
        let (resolved, counter) = match result {
            TaskResult::Success => (self.driver.complete(claimed, message).await, Counter::Completed),
            TaskResult::PermanentFailure => (self.driver.fail(claimed, message).await, Counter::Failed),
            TaskResult::RetryFailure => (self.driver.retry(claimed, message).await, Counter::Retried),
        };
        match resolved {
            Ok(()) => self.stats.bump(counter),
            Err(err) => self.report(&err),
        }
    }

    fn report(&self, err: &QueueError) {
        self.stats.bump(Counter::Errors);
        self.sink.report(err);
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked with a non-string payload".to_string()
    }
}

/// Handle to a spawned dispatcher. Dropping it stops the dispatcher after
/// its current cycle, without waiting.
pub struct DispatcherHandle {
    stop_tx: watch::Sender<bool>,
    poller: JoinHandle<()>,
    executor: JoinHandle<()>,
    stats: Arc<DispatchStats>,
}

impl DispatcherHandle {
    /// Same counters as `Dispatcher::stats`.
    pub fn stats(&self) -> DispatchCounts {
        self.stats.snapshot()
    }

    /// Ask the poller to stop claiming. A task already claimed is still
    /// executed and cleaned up.
    pub fn request_stop(&self) {
        // receivers may already be gone
        let _ = self.stop_tx.send(true);
    }

    /// Stop and wait until the in-flight task (if any) is finished.
    pub async fn stop(self) {
        self.request_stop();
        if let Err(e) = self.poller.await {
            warn!(error = %e, "dispatcher poller ended abnormally");
        }
        if let Err(e) = self.executor.await {
            warn!(error = %e, "dispatcher executor ended abnormally");
        }
        info!("dispatcher stopped");
    }
}
