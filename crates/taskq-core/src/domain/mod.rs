//! Domain model: task entity, state machine, results and errors.

pub mod errors;
pub mod ids;
pub mod outcome;
pub mod state;
pub mod task;

pub use self::errors::{ActionError, QueueError};
pub use self::ids::TaskId;
pub use self::outcome::{TaskOutcome, TaskResult};
pub use self::state::{TaskEvent, TaskState};
pub use self::task::{Task, TaskData, TaskInit, TaskRow};
