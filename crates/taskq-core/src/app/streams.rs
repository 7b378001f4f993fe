//! Stream scheduler - periodic actions on serialized lanes.
//!
//! Every lane (stream name) gets one unbounded queue and one worker task,
//! created on first use. Each scheduled action gets its own ticker that
//! pushes the action onto its lane. A lane runs one action at a time, in
//! arrival order; different lanes run independently.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use super::dispatcher::panic_message;
use crate::domain::{ActionError, QueueError};
use crate::ports::{ErrorSink, TracingErrorSink};

/// A recurring unit of work bound to a lane.
#[async_trait]
pub trait ScheduledAction: Send + Sync {
    async fn run(&self) -> Result<(), ActionError>;

    /// Lane name. Actions returning the same name never overlap.
    fn stream(&self) -> &str;
}

type LaneSender = mpsc::UnboundedSender<Arc<dyn ScheduledAction>>;

struct Lane {
    tx: LaneSender,
    worker: JoinHandle<()>,
}

#[derive(Default)]
struct Lanes {
    lanes: HashMap<String, Lane>,
    tickers: Vec<JoinHandle<()>>,
    closed: bool,
}

pub struct StreamScheduler {
    state: Mutex<Lanes>,
    sink: Arc<dyn ErrorSink>,
    stop_tx: watch::Sender<bool>,
}

impl StreamScheduler {
    pub fn new() -> Self {
        Self::with_error_sink(Arc::new(TracingErrorSink))
    }

    pub fn with_error_sink(sink: Arc<dyn ErrorSink>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            state: Mutex::new(Lanes::default()),
            sink,
            stop_tx,
        }
    }

    /// Run `action` every `period` on its lane, first after one period.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(
        &self,
        action: Arc<dyn ScheduledAction>,
        period: Duration,
    ) -> Result<(), QueueError> {
        if period.is_zero() {
            return Err(QueueError::Config(format!(
                "schedule period for stream {:?} must be greater than zero",
                action.stream()
            )));
        }

        let mut state = self.lock();
        if state.closed {
            return Err(QueueError::Config("stream scheduler is shut down".into()));
        }
        let tx = self.lane(&mut state, action.stream());

        let mut stop_rx = self.stop_tx.subscribe();
        let ticker = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticks.tick() => {
                        if tx.send(action.clone()).is_err() {
                            break;
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });
        state.tickers.push(ticker);
        Ok(())
    }

    /// Queue `action` once on its lane, right now.
    pub fn submit(&self, action: Arc<dyn ScheduledAction>) -> Result<(), QueueError> {
        let mut state = self.lock();
        if state.closed {
            return Err(QueueError::Config("stream scheduler is shut down".into()));
        }
        let stream = action.stream().to_string();
        self.lane(&mut state, &stream)
            .send(action)
            .map_err(|_| QueueError::Config(format!("lane {stream:?} is closed")))
    }

    /// Names of the lanes created so far, sorted.
    pub fn lanes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().lanes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop every ticker, let each lane finish what is already queued, and
    /// wait for the lane workers to exit. Later `schedule` calls fail.
    pub async fn shutdown(&self) {
        let (tickers, lanes) = {
            let mut state = self.lock();
            state.closed = true;
            (
                std::mem::take(&mut state.tickers),
                std::mem::take(&mut state.lanes),
            )
        };
        self.stop_tx.send_replace(true);

        for ticker in tickers {
            let _ = ticker.await;
        }
        for (stream, lane) in lanes {
            drop(lane.tx);
            if let Err(e) = lane.worker.await {
                warn!(stream = %stream, error = %e, "lane worker ended abnormally");
            }
        }
        info!("stream scheduler stopped");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Lanes> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sender for `stream`, creating the lane and its worker on first use.
    fn lane(&self, state: &mut Lanes, stream: &str) -> LaneSender {
        if let Some(lane) = state.lanes.get(stream) {
            return lane.tx.clone();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(lane_worker(stream.to_string(), rx, self.sink.clone()));
        debug!(stream, "lane created");
        state.lanes.insert(
            stream.to_string(),
            Lane {
                tx: tx.clone(),
                worker,
            },
        );
        tx
    }
}

impl Default for StreamScheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn lane_worker(
    stream: String,
    mut rx: mpsc::UnboundedReceiver<Arc<dyn ScheduledAction>>,
    sink: Arc<dyn ErrorSink>,
) {
    while let Some(action) = rx.recv().await {
        match AssertUnwindSafe(action.run()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(source)) => sink.report(&QueueError::Action {
                stream: stream.clone(),
                source,
            }),
            Err(payload) => sink.report(&QueueError::ActionPanicked {
                stream: stream.clone(),
                reason: panic_message(payload),
            }),
        }
    }
    debug!(stream = %stream, "lane worker stopped");
}
