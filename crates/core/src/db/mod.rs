//! Database backends behind the [`crate::connection`] traits.
//!
//! The in-memory backend is only built for tests, or for downstream test
//! suites through the `test-support` feature.

pub mod ddl;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod postgres;

#[cfg(any(test, feature = "test-support"))]
pub use memory::{MemoryConnector, MemoryDatabase};
pub use postgres::PgConnector;
