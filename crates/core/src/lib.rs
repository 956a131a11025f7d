//! dbsync core library.
//!
//! Reconciles the tables of two independently writable PostgreSQL databases:
//! schema introspection, dependency ordering, on-the-fly table creation,
//! per-row UPSERT with isolated row failures, and the sync report.

pub mod config;
pub mod connection;
pub mod db;
pub mod errors;
pub mod introspect;
pub mod materializer;
pub mod models;
pub mod ordering;
pub mod reconciler;
pub mod report;
pub mod startup;
pub mod sync_engine;

// Re-exports for convenience.
pub use config::SyncConfig;
pub use connection::{Connection, Connector};
pub use models::SyncDirection;
pub use report::SyncReport;
pub use sync_engine::SyncEngine;
