//! App - the moving parts built on top of the ports.
//!
//! - **ActionRegistry**: task name to action
//! - **Dispatcher**: claim/execute/record loop
//! - **StreamScheduler**: periodic actions on serialized lanes
//! - **TaskClient**: enqueue and count
//! - **AppBuilder**: wiring with fail-fast validation

pub mod builder;
pub mod client;
pub mod dispatcher;
pub mod registry;
pub mod status;
pub mod streams;

pub use self::builder::{App, AppBuilder, BuildError};
pub use self::client::TaskClient;
pub use self::dispatcher::{Dispatcher, DispatcherHandle};
pub use self::registry::{ActionRegistry, FnAction, TaskAction, from_fn};
pub use self::status::DispatchCounts;
pub use self::streams::{ScheduledAction, StreamScheduler};
