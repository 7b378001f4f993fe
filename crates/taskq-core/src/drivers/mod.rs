//! Driver implementations.
//!
//! - `InMemoryDriver`: single-process store, used by tests and the demo
//! - `PostgresDriver`: durable store shared by any number of dispatchers
//!   (feature `postgres`)

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use self::memory::InMemoryDriver;
#[cfg(feature = "postgres")]
pub use self::postgres::PostgresDriver;
