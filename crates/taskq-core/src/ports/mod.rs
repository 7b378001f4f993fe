//! Ports - the seams between the queue core and the outside world.
//!
//! - `Driver`: durable task store (in-memory and Postgres implementations
//!   live in `drivers`)
//! - `Clock` / `IdGenerator`: time and identity, swappable in tests
//! - `ErrorSink`: destination for non-fatal loop errors

pub mod clock;
pub mod driver;
pub mod error_sink;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::driver::{
    ClaimedTask, Continuation, DEFAULT_STALE_CLAIM_WINDOW, Driver, Resolution,
};
pub use self::error_sink::{ErrorSink, TracingErrorSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
