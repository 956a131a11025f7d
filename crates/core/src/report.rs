//! The sync report: the only durable artifact of a run.
//!
//! A [`SyncReport`] is appended to by the engine while the run progresses and
//! frozen by [`SyncReport::finish`]. Totals are derived from the per-table
//! entries so they can never disagree with them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::SyncDirection;

/// Final state of one table within one phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    /// Every examined row was written.
    Completed,
    /// The pass finished but some rows failed.
    CompletedWithErrors,
    /// The table-level operation failed; the table was abandoned.
    Failed,
}

impl std::fmt::Display for TableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::CompletedWithErrors => write!(f, "completed_with_errors"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A row that could not be written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowFailure {
    /// Primary-key rendering, or `#<ordinal>` for tables without a key.
    pub key: String,
    pub error: String,
}

/// Outcome of reconciling one table in one phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableReport {
    /// Phase label, e.g. `local→remote (all rows)`.
    pub phase: String,
    pub table: String,
    pub status: TableStatus,
    /// Whether the destination table was created during this pass.
    pub created: bool,
    pub rows_examined: u64,
    pub rows_written: u64,
    pub row_errors: u64,
    /// Rows left alone because the destination already had their key.
    pub rows_skipped: u64,
    /// Table-level failure, if any.
    pub error: Option<String>,
    /// Non-fatal issues such as a sequence that could not be advanced.
    pub warnings: Vec<String>,
    pub row_failures: Vec<RowFailure>,
}

impl TableReport {
    pub fn new(phase: &str, table: &str) -> Self {
        Self {
            phase: phase.to_string(),
            table: table.to_string(),
            status: TableStatus::Completed,
            created: false,
            rows_examined: 0,
            rows_written: 0,
            row_errors: 0,
            rows_skipped: 0,
            error: None,
            warnings: Vec::new(),
            row_failures: Vec::new(),
        }
    }

    /// Mark the table abandoned with a table-level error.
    pub fn fail(&mut self, error: impl std::fmt::Display) {
        self.status = TableStatus::Failed;
        self.error = Some(error.to_string());
    }

    /// Derive the completed status from the row counts (never un-fails).
    pub fn settle(&mut self) {
        if self.status != TableStatus::Failed {
            self.status = if self.row_errors > 0 {
                TableStatus::CompletedWithErrors
            } else {
                TableStatus::Completed
            };
        }
    }
}

/// The full record of one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: String,
    pub direction: SyncDirection,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub tables: Vec<TableReport>,
    /// Directions that could not run because a database was unreachable.
    pub connection_errors: Vec<String>,
    /// Dependency cycles broken by fallback ordering.
    pub warnings: Vec<String>,
}

impl SyncReport {
    pub fn new(direction: SyncDirection) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            direction,
            started_at: Utc::now(),
            finished_at: None,
            tables: Vec::new(),
            connection_errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn tables_attempted(&self) -> usize {
        self.tables.len()
    }

    pub fn tables_succeeded(&self) -> usize {
        self.tables
            .iter()
            .filter(|t| t.status != TableStatus::Failed)
            .count()
    }

    pub fn table_errors(&self) -> usize {
        self.tables_attempted() - self.tables_succeeded()
    }

    pub fn rows_examined(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_examined).sum()
    }

    pub fn rows_written(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_written).sum()
    }

    pub fn row_errors(&self) -> u64 {
        self.tables.iter().map(|t| t.row_errors).sum()
    }

    /// Success means no table-level and no connection-level failure. Row
    /// errors inside otherwise completed tables do not count.
    pub fn is_success(&self) -> bool {
        self.connection_errors.is_empty() && self.table_errors() == 0
    }

    /// Freeze the report and write the summary to the log.
    pub fn finish(&mut self) {
        let finished = Utc::now();
        self.finished_at = Some(finished);
        let duration = finished - self.started_at;

        info!("============================================================");
        info!("SYNC SUMMARY ({})", self.direction);
        info!("============================================================");
        for t in &self.tables {
            info!(
                phase = %t.phase,
                table = %t.table,
                status = %t.status,
                examined = t.rows_examined,
                written = t.rows_written,
                row_errors = t.row_errors,
                skipped = t.rows_skipped,
                "table result"
            );
        }
        info!("Tables attempted : {}", self.tables_attempted());
        info!("Tables succeeded : {}", self.tables_succeeded());
        info!("Rows examined    : {}", self.rows_examined());
        info!("Rows written     : {}", self.rows_written());
        info!("Row errors       : {}", self.row_errors());
        info!("Table errors     : {}", self.table_errors());
        info!("Connection errors: {}", self.connection_errors.len());
        info!("Duration         : {}ms", duration.num_milliseconds());
        info!("Status           : {}", if self.is_success() { "SUCCESS" } else { "FAILURE" });
    }

    /// The single line printed to the terminal.
    pub fn status_line(&self) -> String {
        let mut line = format!(
            "{} {}: {}/{} tables, {} rows written, {} row errors, {} table errors",
            if self.is_success() { "SUCCESS" } else { "FAILURE" },
            self.direction,
            self.tables_succeeded(),
            self.tables_attempted(),
            self.rows_written(),
            self.row_errors(),
            self.table_errors(),
        );
        if !self.connection_errors.is_empty() {
            line.push_str(&format!(
                ", {} connection errors",
                self.connection_errors.len()
            ));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(status: TableStatus, examined: u64, written: u64, errors: u64) -> TableReport {
        let mut t = TableReport::new("local→remote (all rows)", "t");
        t.rows_examined = examined;
        t.rows_written = written;
        t.row_errors = errors;
        if status == TableStatus::Failed {
            t.fail("boom");
        }
        t.settle();
        t
    }

    #[test]
    fn test_settle_status() {
        assert_eq!(table(TableStatus::Completed, 2, 2, 0).status, TableStatus::Completed);
        assert_eq!(
            table(TableStatus::Completed, 3, 2, 1).status,
            TableStatus::CompletedWithErrors
        );
        assert_eq!(table(TableStatus::Failed, 0, 0, 0).status, TableStatus::Failed);
    }

    #[test]
    fn test_row_errors_do_not_fail_the_run() {
        let mut report = SyncReport::new(SyncDirection::LocalToRemote);
        report.tables.push(table(TableStatus::Completed, 3, 2, 1));
        report.finish();
        assert!(report.is_success());
        assert_eq!(report.row_errors(), 1);
        assert!(report.status_line().starts_with("SUCCESS local-to-remote"));
    }

    #[test]
    fn test_table_error_fails_the_run() {
        let mut report = SyncReport::new(SyncDirection::Both);
        report.tables.push(table(TableStatus::Completed, 1, 1, 0));
        report.tables.push(table(TableStatus::Failed, 0, 0, 0));
        assert_eq!(report.tables_attempted(), 2);
        assert_eq!(report.tables_succeeded(), 1);
        assert_eq!(report.table_errors(), 1);
        assert!(!report.is_success());
    }

    #[test]
    fn test_connection_error_fails_the_run() {
        let mut report = SyncReport::new(SyncDirection::SmartSync);
        report.connection_errors.push("remote unreachable".into());
        assert!(!report.is_success());
        assert!(report.status_line().contains("1 connection errors"));
    }

    #[test]
    fn test_report_serializes() {
        let mut report = SyncReport::new(SyncDirection::SmartSync);
        report.tables.push(table(TableStatus::Completed, 1, 1, 0));
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"direction\":\"smart-sync\""));
        assert!(json.contains("\"status\":\"completed\""));
    }
}
