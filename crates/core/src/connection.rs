//! Connection management.
//!
//! A [`Connection`] is one live session to one database, used serially by a
//! single sync direction. A [`Connector`] opens connections and validates
//! them with a round-trip before handing them out. Both are traits so the
//! engine runs unchanged against PostgreSQL ([`crate::db::postgres`]) or the
//! in-memory backend ([`crate::db::memory`]).

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::errors::{ConnectionError, DbError};
use crate::models::{Column, Endpoint, ForeignKey, RowKey, RowRecord, RowWrite, TableDescriptor};

/// One live database session.
///
/// Every method is a single logical round-trip from the caller's point of
/// view and is bounded by the connection's statement timeout.
#[async_trait]
pub trait Connection: Send {
    /// The endpoint this connection was opened against.
    fn endpoint(&self) -> &Endpoint;

    /// Trivial round-trip (`SELECT 1`).
    async fn ping(&mut self) -> Result<(), DbError>;

    /// Base tables of the endpoint's schema, sorted by name.
    async fn list_tables(&mut self) -> Result<Vec<String>, DbError>;

    async fn table_exists(&mut self, table: &str) -> Result<bool, DbError>;

    /// Columns in ordinal order.
    async fn columns(&mut self, table: &str) -> Result<Vec<Column>, DbError>;

    /// Primary-key columns in key order; empty when the table has none.
    async fn primary_key(&mut self, table: &str) -> Result<Vec<String>, DbError>;

    /// Single-column foreign keys declared on `table`.
    async fn foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKey>, DbError>;

    async fn sequence_exists(&mut self, name: &str) -> Result<bool, DbError>;

    /// Catalog probe for the sequence owned by `table.column`.
    async fn serial_sequence(&mut self, table: &str, column: &str)
        -> Result<Option<String>, DbError>;

    /// Create the table (and its sequence) described by `table` in a single
    /// transaction.
    async fn create_table(&mut self, table: &TableDescriptor) -> Result<(), DbError>;

    /// Advance the key sequence past the highest stored key. Returns the new
    /// sequence value when it moved.
    async fn align_sequence(&mut self, table: &TableDescriptor) -> Result<Option<i64>, DbError>;

    /// Full scan of `table` in key order (natural order without a key).
    async fn read_rows(&mut self, table: &TableDescriptor) -> Result<Vec<RowRecord>, DbError>;

    /// Every key currently stored in `table`.
    async fn read_keys(
        &mut self,
        table: &str,
        key_columns: &[String],
    ) -> Result<HashSet<RowKey>, DbError>;

    /// Write one row; the destination coerces each value to its column type.
    async fn write_row(
        &mut self,
        table: &TableDescriptor,
        row: &RowRecord,
        write: RowWrite,
    ) -> Result<(), DbError>;

    /// Close the session. Dropping a connection also releases it.
    async fn close(self: Box<Self>);
}

/// Opens validated connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection and prove it is alive with a round-trip.
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, ConnectionError>;
}

/// The two connections owned by one sync direction.
pub struct ConnectionPair {
    pub source: Box<dyn Connection>,
    pub target: Box<dyn Connection>,
}

impl ConnectionPair {
    /// Open source then target. If the target cannot be opened the source is
    /// closed before the error is returned.
    pub async fn open(
        connector: &dyn Connector,
        source: &Endpoint,
        target: &Endpoint,
    ) -> Result<Self, ConnectionError> {
        info!(endpoint = %source, role = %source.role, "connecting");
        let source_conn = connector.open(source).await?;

        info!(endpoint = %target, role = %target.role, "connecting");
        match connector.open(target).await {
            Ok(target_conn) => Ok(Self {
                source: source_conn,
                target: target_conn,
            }),
            Err(e) => {
                warn!(endpoint = %target, error = %e, "target unreachable, releasing source");
                source_conn.close().await;
                Err(e)
            }
        }
    }

    pub async fn close(self) {
        let source = self.source.endpoint().to_string();
        let target = self.target.endpoint().to_string();
        self.source.close().await;
        self.target.close().await;
        info!(%source, %target, "disconnected");
    }
}
