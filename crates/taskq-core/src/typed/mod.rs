//! Typed task API.
//!
//! - `TypedTask`: ties a payload struct to its task name, so producers and
//!   actions cannot disagree on the name
//! - `TypedAction<T>`: an action that receives the decoded payload
//! - `TypedActionAdapter`: type erasure into a plain `TaskAction`

pub mod handler;
pub mod task;

pub use self::handler::{TypedAction, TypedActionAdapter};
pub use self::task::TypedTask;
