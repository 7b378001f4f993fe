//! Per-dispatcher counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time copy of a dispatcher's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchCounts {
    pub claimed: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub cancelled: u64,
    /// Handler panics and timeouts (also counted in `retried`).
    pub faults: u64,
    /// Everything routed to the error sink.
    pub errors: u64,
}

#[derive(Debug, Default)]
pub(crate) struct DispatchStats {
    claimed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    cancelled: AtomicU64,
    faults: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Counter {
    Claimed,
    Completed,
    Failed,
    Retried,
    Cancelled,
    Faults,
    Errors,
}

impl DispatchStats {
    pub(crate) fn bump(&self, counter: Counter) {
        let slot = match counter {
            Counter::Claimed => &self.claimed,
            Counter::Completed => &self.completed,
            Counter::Failed => &self.failed,
            Counter::Retried => &self.retried,
            Counter::Cancelled => &self.cancelled,
            Counter::Faults => &self.faults,
            Counter::Errors => &self.errors,
        };
        slot.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DispatchCounts {
        DispatchCounts {
            claimed: self.claimed.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
