//! Error types for the dbsync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type. Only [`ConnectionError`] is ever fatal to a sync
//! direction; everything else is captured into the report.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Introspection(#[from] IntrospectionError),

    #[error(transparent)]
    Ddl(#[from] DdlError),

    #[error(transparent)]
    Row(#[from] RowError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Driver-level errors
// ---------------------------------------------------------------------------

/// A failed round-trip to a database, classified by how far it escalates.
#[derive(Debug, Error)]
pub enum DbError {
    /// The statement did not complete within the configured timeout.
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// The connection is gone; nothing else on it can succeed.
    #[error("connection lost during {operation}: {detail}")]
    ConnectionLost { operation: String, detail: String },

    /// The server rejected a single statement (type, constraint, syntax).
    #[error("{operation} failed: {detail}")]
    Statement { operation: String, detail: String },
}

impl DbError {
    /// True when the failure leaves the connection unusable or the table
    /// pass unbounded, so the whole table has to be abandoned.
    pub fn is_fatal_to_table(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ConnectionLost { .. })
    }

    /// Wrap a `tokio_postgres` error, separating dead connections from
    /// server-side statement errors.
    pub fn from_postgres(operation: &str, err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            return Self::ConnectionLost {
                operation: operation.to_string(),
                detail: err.to_string(),
            };
        }
        let detail = match err.as_db_error() {
            Some(db) => format!("{} ({})", db.message(), db.code().code()),
            None => err.to_string(),
        };
        Self::Statement {
            operation: operation.to_string(),
            detail,
        }
    }
}

// ---------------------------------------------------------------------------
// Connection errors
// ---------------------------------------------------------------------------

/// Cannot reach or authenticate to one of the two databases.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// TCP / authentication / startup failure.
    #[error("cannot connect to {endpoint}: {detail}")]
    Unreachable { endpoint: String, detail: String },

    /// The connect attempt exceeded the configured timeout.
    #[error("connecting to {endpoint} timed out after {secs}s")]
    Timeout { endpoint: String, secs: u64 },

    /// TLS was required but the connector could not be built.
    #[error("TLS setup for {endpoint} failed: {detail}")]
    Tls { endpoint: String, detail: String },

    /// Connected, but the liveness round-trip failed.
    #[error("liveness check against {endpoint} failed: {detail}")]
    LivenessFailed { endpoint: String, detail: String },
}

// ---------------------------------------------------------------------------
// Introspection errors
// ---------------------------------------------------------------------------

/// Failure to read the catalog of the source database.
#[derive(Debug, Error)]
pub enum IntrospectionError {
    #[error("cannot list tables: {0}")]
    ListTables(#[source] DbError),

    #[error("cannot describe table '{table}': {source}")]
    DescribeTable {
        table: String,
        #[source]
        source: DbError,
    },
}

// ---------------------------------------------------------------------------
// DDL errors
// ---------------------------------------------------------------------------

/// Table or sequence creation failed; fatal to that table only.
#[derive(Debug, Error)]
pub enum DdlError {
    /// The table has no columns to replicate.
    #[error("table '{0}' has no columns to replicate")]
    NoColumns(String),

    /// The destination table exists but cannot hold the source's rows.
    #[error("destination table '{table}' is missing columns: {}", missing.join(", "))]
    Divergent { table: String, missing: Vec<String> },

    /// The destination table's primary key cannot serve as the conflict
    /// target for the source's key.
    #[error(
        "destination table '{table}' has primary key ({}) but rows are matched on ({})",
        found.join(", "),
        expected.join(", ")
    )]
    KeyMismatch {
        table: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// CREATE TABLE / CREATE SEQUENCE was rejected.
    #[error("creating table '{table}' failed: {source}")]
    CreateFailed {
        table: String,
        #[source]
        source: DbError,
    },

    /// Could not check whether the destination table exists.
    #[error("inspecting destination table '{table}' failed: {source}")]
    Inspect {
        table: String,
        #[source]
        source: DbError,
    },
}

// ---------------------------------------------------------------------------
// Row errors
// ---------------------------------------------------------------------------

/// A single row could not be written; fatal to that row only.
#[derive(Debug, Error)]
#[error("row {key} of '{table}': {detail}")]
pub struct RowError {
    pub table: String,
    /// Primary-key rendering, or `#<ordinal>` for tables without a key.
    pub key: String,
    pub detail: String,
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

/// Foreign keys form a cycle; the listed tables were ordered alphabetically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle among tables {}; processing them in alphabetical order", tables.join(", "))]
pub struct OrderingWarning {
    pub tables: Vec<String>,
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (needed for '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = DdlError::Divergent {
            table: "tags".into(),
            missing: vec!["name".into(), "color".into()],
        };
        assert_eq!(
            err.to_string(),
            "destination table 'tags' is missing columns: name, color"
        );

        let err = RowError {
            table: "tags".into(),
            key: "[7]".into(),
            detail: "value too long".into(),
        };
        assert_eq!(err.to_string(), "row [7] of 'tags': value too long");

        let err = ConfigError::EnvVarMissing {
            var: "DBSYNC_REMOTE_HOST".into(),
            field: "remote.host".into(),
        };
        assert!(err.to_string().contains("DBSYNC_REMOTE_HOST"));
    }

    #[test]
    fn test_db_error_escalation() {
        let timeout = DbError::Timeout {
            operation: "upsert".into(),
            secs: 5,
        };
        assert!(timeout.is_fatal_to_table());

        let lost = DbError::ConnectionLost {
            operation: "read".into(),
            detail: "eof".into(),
        };
        assert!(lost.is_fatal_to_table());

        let stmt = DbError::Statement {
            operation: "upsert".into(),
            detail: "value too long".into(),
        };
        assert!(!stmt.is_fatal_to_table());
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let err = ConnectionError::Timeout {
            endpoint: "remote".into(),
            secs: 10,
        };
        let core: CoreError = err.into();
        assert!(matches!(core, CoreError::Connection(_)));
    }
}
