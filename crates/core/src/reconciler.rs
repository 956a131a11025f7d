//! Row reconciliation for one table.
//!
//! Reads every source row and writes it to the destination one statement at
//! a time. A row the destination rejects is recorded and skipped; a timeout
//! or lost connection abandons the rest of the table.

use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::errors::{DbError, RowError};
use crate::models::{RowRecord, RowWrite, TableDescriptor, WriteMode};

/// Counts and failures from one [`sync_table`] pass.
#[derive(Debug, Default)]
pub struct TableSyncResult {
    /// Rows a write was attempted for.
    pub rows_examined: u64,
    pub rows_written: u64,
    pub row_errors: u64,
    /// Rows left alone because the destination already had their key.
    pub rows_skipped: u64,
    pub failures: Vec<RowError>,
    /// Table-level failure that stopped the pass early.
    pub aborted: Option<DbError>,
}

impl TableSyncResult {
    fn record_failure(&mut self, table: &str, key: String, error: &DbError) {
        warn!(table, key = %key, error = %error, "row failed");
        self.row_errors += 1;
        self.failures.push(RowError {
            table: table.to_string(),
            key,
            detail: error.to_string(),
        });
    }

    fn abort(mut self, table: &str, error: DbError) -> Self {
        warn!(table, error = %error, "table abandoned");
        self.aborted = Some(error);
        self
    }
}

/// Identify a row in logs: its key, or its 1-based position when keyless.
fn row_label(table: &TableDescriptor, row: &RowRecord, ordinal: usize) -> String {
    match row.key(&table.primary_key) {
        Some(key) => key.to_string(),
        None => format!("#{ordinal}"),
    }
}

/// Copy the rows of `table` from `source` to `dest`.
///
/// With [`WriteMode::Upsert`] keyed rows overwrite the destination's non-key
/// columns and keyless rows are appended. With [`WriteMode::NewRowsOnly`]
/// only rows whose key the destination lacks are inserted; keyless tables
/// are left alone because there is no way to tell which rows are new.
pub async fn sync_table(
    source: &mut dyn Connection,
    dest: &mut dyn Connection,
    table: &TableDescriptor,
    mode: WriteMode,
) -> TableSyncResult {
    let mut result = TableSyncResult::default();
    let name = table.name.as_str();

    let existing = match mode {
        WriteMode::NewRowsOnly if !table.has_primary_key() => {
            info!(table = name, "no primary key; new rows cannot be detected, skipping");
            return result;
        }
        WriteMode::NewRowsOnly => match dest.read_keys(name, &table.primary_key).await {
            Ok(keys) => Some(keys),
            Err(e) => return result.abort(name, e),
        },
        WriteMode::Upsert => None,
    };

    let rows = match source.read_rows(table).await {
        Ok(rows) => rows,
        Err(e) => return result.abort(name, e),
    };
    debug!(table = name, rows = rows.len(), "source rows read");

    let write = match (mode, table.has_primary_key()) {
        (WriteMode::NewRowsOnly, _) => RowWrite::InsertIfAbsent,
        (WriteMode::Upsert, true) => RowWrite::Upsert,
        (WriteMode::Upsert, false) => RowWrite::Append,
    };

    for (index, row) in rows.iter().enumerate() {
        if let Some(ref present) = existing {
            if row
                .key(&table.primary_key)
                .is_some_and(|k| present.contains(&k))
            {
                result.rows_skipped += 1;
                continue;
            }
        }

        match dest.write_row(table, row, write).await {
            Ok(()) => {
                result.rows_examined += 1;
                result.rows_written += 1;
            }
            Err(e) if e.is_fatal_to_table() => return result.abort(name, e),
            Err(e) => {
                result.rows_examined += 1;
                result.record_failure(name, row_label(table, row, index + 1), &e);
            }
        }
    }

    info!(
        table = name,
        examined = result.rows_examined,
        written = result.rows_written,
        row_errors = result.row_errors,
        skipped = result.rows_skipped,
        "table rows reconciled"
    );
    result
}
