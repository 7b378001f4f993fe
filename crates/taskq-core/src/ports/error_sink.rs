//! ErrorSink port - where non-fatal loop errors go.

use tracing::error;

use crate::domain::QueueError;

/// Receives every non-fatal error raised inside the dispatcher and the
/// stream scheduler. `NoTasks` is never reported.
pub trait ErrorSink: Send + Sync {
    fn report(&self, err: &QueueError);
}

impl<F> ErrorSink for F
where
    F: Fn(&QueueError) + Send + Sync,
{
    fn report(&self, err: &QueueError) {
        self(err)
    }
}

/// Default sink: one `error!` event per report.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, err: &QueueError) {
        error!(kind = err.kind(), error = %err, "task queue error");
    }
}
