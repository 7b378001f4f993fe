//! Task entity and the request that creates one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::state::TaskState;

/// Structured payload carried by a task.
///
/// Stored as a JSON object so strings, booleans, numbers and nested values
/// round-trip without losing their type.
pub type TaskData = serde_json::Map<String, serde_json::Value>;

/// Creation request for `Driver::add_task`. Not persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInit {
    pub key: String,
    pub name: String,
    /// Earliest claim time; `None` means the driver's clock at insert.
    #[serde(default)]
    pub do_after: Option<DateTime<Utc>>,
    pub created_by: String,
    #[serde(default)]
    pub data: TaskData,
}

impl TaskInit {
    /// A task eligible immediately, with no payload and no creator.
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            do_after: None,
            created_by: String::new(),
            data: TaskData::new(),
        }
    }

    /// Hold the task back until `at`.
    pub fn do_after(mut self, at: DateTime<Utc>) -> Self {
        self.do_after = Some(at);
        self
    }

    /// Free-form producer label, kept for diagnostics.
    pub fn created_by(mut self, who: impl Into<String>) -> Self {
        self.created_by = who.into();
        self
    }

    /// Replace the whole payload.
    pub fn data(mut self, data: TaskData) -> Self {
        self.data = data;
        self
    }

    /// Set one payload entry.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(field.into(), value.into());
        self
    }
}

/// Storage shape of a task, as a driver reads and writes it.
///
/// Drivers build a `TaskRow` from whatever their store returns and hand out
/// the read-only `Task` view made from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: TaskId,
    pub key: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub do_after: DateTime<Utc>,
    pub state: TaskState,
    pub data: TaskData,
    pub last_attempted: DateTime<Utc>,
    pub last_attempt_message: String,
}

impl TaskRow {
    /// Row for a freshly inserted task: `Ready`, never attempted, with
    /// `last_attempted` equal to `created_at` so it sorts by creation time.
    pub fn created(id: TaskId, init: TaskInit, now: DateTime<Utc>) -> Self {
        Self {
            id,
            key: init.key,
            name: init.name,
            created_at: now,
            created_by: init.created_by,
            do_after: init.do_after.unwrap_or(now),
            state: TaskState::Ready,
            data: init.data,
            last_attempted: now,
            last_attempt_message: "Created".to_string(),
        }
    }
}

/// A unit of queued work, as seen by handlers.
///
/// Everything here is read-only: identity, provenance and payload never
/// change after creation, and state only moves through the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    key: String,
    name: String,
    created_at: DateTime<Utc>,
    created_by: String,
    do_after: DateTime<Utc>,
    state: TaskState,
    data: TaskData,
    last_attempted: DateTime<Utc>,
    last_attempt_message: String,
}

impl Task {
    /// Driver-assigned identity.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Producer-supplied grouping key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Routing name; selects the action.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    /// Earliest time the task may be claimed.
    pub fn do_after(&self) -> DateTime<Utc> {
        self.do_after
    }

    /// State as of the moment this view was read.
    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn data(&self) -> &TaskData {
        &self.data
    }

    /// Shorthand for `data().get(field)`.
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.data.get(field)
    }

    /// Time of the last claim, resolution or refresh; creation time before
    /// any of those.
    pub fn last_attempted(&self) -> DateTime<Utc> {
        self.last_attempted
    }

    /// `"Created"`, `"Attempting"` or the message of the last resolution.
    pub fn last_attempt_message(&self) -> &str {
        &self.last_attempt_message
    }
}

impl From<TaskRow> for Task {
    fn from(row: TaskRow) -> Self {
        Self {
            id: row.id,
            key: row.key,
            name: row.name,
            created_at: row.created_at,
            created_by: row.created_by,
            do_after: row.do_after,
            state: row.state,
            data: row.data,
            last_attempted: row.last_attempted,
            last_attempt_message: row.last_attempt_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use ulid::Ulid;

    #[test]
    fn init_builder_sets_payload_fields() {
        let init = TaskInit::new("customer_update", "customer:123")
            .created_by("test_runner")
            .with("exampleString", "val1")
            .with("exampleBool", true)
            .with("order", 3);

        assert_eq!(init.name, "customer_update");
        assert_eq!(init.key, "customer:123");
        assert_eq!(init.created_by, "test_runner");
        assert_eq!(init.data["exampleString"], json!("val1"));
        assert_eq!(init.data["exampleBool"], json!(true));
        assert_eq!(init.data["order"], json!(3));
    }

    #[test]
    fn created_row_is_ready_and_sorted_by_creation() {
        let now = Utc::now();
        let id = TaskId::from_ulid(Ulid::new());
        let row = TaskRow::created(id, TaskInit::new("n", "k"), now);

        assert_eq!(row.state, TaskState::Ready);
        assert_eq!(row.created_at, now);
        assert_eq!(row.last_attempted, now);
        assert_eq!(row.last_attempt_message, "Created");
        assert_eq!(row.do_after, now);

        let task = Task::from(row);
        assert_eq!(task.id(), id);
        assert_eq!(task.state(), TaskState::Ready);
    }

    #[test]
    fn nested_payload_survives_json() {
        let init = TaskInit::new("n", "k").with("nested", json!({"a": [1, 2.5, "x"], "b": null}));
        let row = TaskRow::created(TaskId::from_ulid(Ulid::new()), init, Utc::now());

        let text = serde_json::to_string(&row).unwrap();
        let back: TaskRow = serde_json::from_str(&text).unwrap();
        assert_eq!(back.data, row.data);
    }
}
