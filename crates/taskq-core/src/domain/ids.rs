//! Task identifiers.
//!
//! A `TaskId` is assigned by the storage driver when a task is inserted. It is
//! ULID-backed so that ids sort by creation time, can be generated without
//! coordination between processes, and fit in a text primary key.
//!
//! The id only correlates a claimed row with its later state update. Handlers
//! should key their business logic on `Task::key`, never on the id.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use super::errors::QueueError;

/// Opaque, driver-assigned handle of one stored task.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Ulid);

impl TaskId {
    pub const PREFIX: &'static str = "task-";

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }

    /// The form written to a store column (bare ULID, no prefix).
    pub fn to_storage(&self) -> String {
        self.0.to_string()
    }
}

impl From<Ulid> for TaskId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0)
    }
}

/// Accepts both the display form (`task-01H...`) and the bare storage form.
impl FromStr for TaskId {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(Self::PREFIX).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self)
            .map_err(|e| QueueError::Decode(format!("invalid task id {s:?}: {e}")))
    }
}
