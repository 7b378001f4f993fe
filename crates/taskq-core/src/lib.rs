//! taskq-core
//!
//! A durable task queue with a single-claim dispatcher, plus a scheduler
//! for periodic actions on serialized lanes.
//!
//! # Modules
//! - **domain**: task entity, state machine, results, errors
//! - **ports**: `Driver`, `Clock`, `IdGenerator`, `ErrorSink`
//! - **drivers**: in-memory and Postgres drivers
//! - **app**: registry, dispatcher, stream scheduler, client, builder
//! - **typed**: typed task payloads and actions
//! - **config** / **observability**: configuration loading and logging setup

pub mod app;
pub mod config;
pub mod domain;
pub mod drivers;
pub mod observability;
pub mod ports;
pub mod typed;

pub use app::{
    ActionRegistry, App, AppBuilder, Dispatcher, DispatcherHandle, ScheduledAction,
    StreamScheduler, TaskAction, TaskClient,
};
pub use domain::{
    ActionError, QueueError, Task, TaskData, TaskId, TaskInit, TaskOutcome, TaskResult, TaskState,
};
pub use ports::{ClaimedTask, Driver, ErrorSink};
