//! Bidirectional table reconciliation engine.
//!
//! The [`SyncEngine`] runs one invocation of a named [`SyncDirection`]. Each
//! direction is made of one or more phases; a phase copies rows one way:
//!
//! 1. Introspect the phase's source database.
//! 2. Order its tables so parents precede children.
//! 3. For each table: ensure the destination table exists, reconcile rows,
//!    align the key sequence.
//! 4. Record the outcome in the [`SyncReport`].
//!
//! Row failures stay inside their table and table failures stay inside
//! their phase. Only an unreachable database stops a direction.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::SyncConfig;
use crate::connection::{Connection, ConnectionPair, Connector};
use crate::errors::{ConnectionError, CoreError};
use crate::introspect::{self, Schema, TableFilter};
use crate::materializer::{self, Materialized};
use crate::models::{Endpoint, Role, SyncDirection, TableDescriptor, WriteMode};
use crate::ordering::{self, TableOrder};
use crate::reconciler;
use crate::report::{RowFailure, SyncReport, TableReport};

/// Name of the local database in logs and reports.
pub const LOCAL: &str = "local";
/// Name of the remote database in logs and reports.
pub const REMOTE: &str = "remote";

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// Which way rows flow within one connection pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    LocalToRemote,
    RemoteToLocal,
}

/// One one-way pass over every table.
#[derive(Debug, Clone, Copy)]
struct Phase {
    flow: Flow,
    mode: WriteMode,
}

impl Phase {
    const fn new(flow: Flow, mode: WriteMode) -> Self {
        Self { flow, mode }
    }

    fn label(&self) -> &'static str {
        match (self.flow, self.mode) {
            (Flow::LocalToRemote, WriteMode::Upsert) => "local→remote (all rows)",
            (Flow::LocalToRemote, WriteMode::NewRowsOnly) => "local→remote (new rows)",
            (Flow::RemoteToLocal, WriteMode::Upsert) => "remote→local (all rows)",
            (Flow::RemoteToLocal, WriteMode::NewRowsOnly) => "remote→local (new rows)",
        }
    }
}

/// Phases run on one shared connection pair.
fn passes(direction: SyncDirection) -> Vec<Vec<Phase>> {
    let l2r = Phase::new(Flow::LocalToRemote, WriteMode::Upsert);
    let r2l = Phase::new(Flow::RemoteToLocal, WriteMode::Upsert);
    match direction {
        SyncDirection::LocalToRemote => vec![vec![l2r]],
        SyncDirection::RemoteToLocal => vec![vec![r2l]],
        SyncDirection::SmartSync => vec![vec![
            Phase::new(Flow::RemoteToLocal, WriteMode::NewRowsOnly),
            l2r,
        ]],
        // Each direction gets its own pair so one outage cannot stop the other.
        SyncDirection::Both => vec![vec![l2r], vec![r2l]],
    }
}

/// The dependency-ordered table list of the local database.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub schema: Schema,
    pub order: TableOrder,
}

impl SyncPlan {
    /// Descriptors in processing order.
    pub fn ordered_tables(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.order
            .tables
            .iter()
            .filter_map(|name| self.schema.table(name))
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Runs sync directions between the configured local and remote databases.
pub struct SyncEngine {
    config: SyncConfig,
    connector: Arc<dyn Connector>,
    filter: TableFilter,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, connector: Arc<dyn Connector>) -> Self {
        let filter = TableFilter::new(&config.sync.exclude_tables);
        Self {
            config,
            connector,
            filter,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The local database, which plays the source role.
    pub fn local_endpoint(&self) -> Endpoint {
        self.config.local.endpoint(LOCAL, Role::Source)
    }

    /// The remote database, which plays the target role.
    pub fn remote_endpoint(&self) -> Endpoint {
        self.config.remote.endpoint(REMOTE, Role::Target)
    }

    // -----------------------------------------------------------------------
    // Main entry point
    // -----------------------------------------------------------------------

    /// Execute one sync direction and return its report.
    ///
    /// Never fails: every problem ends up in the report, and
    /// [`SyncReport::is_success`] tells whether any of them was fatal to a
    /// table or a direction.
    pub async fn run(&self, direction: SyncDirection) -> SyncReport {
        let mut report = SyncReport::new(direction);
        info!(run_id = %report.run_id, %direction, "starting database sync");

        for phases in passes(direction) {
            self.run_pass(&mut report, &phases).await;
        }

        report.finish();
        report
    }

    /// Open the local connection and compute the processing order.
    pub async fn plan(&self) -> Result<SyncPlan, CoreError> {
        let mut conn = self.connector.open(&self.local_endpoint()).await?;
        let result = introspect::introspect(
            conn.as_mut(),
            &self.filter,
            self.config.sync.infer_foreign_keys,
        )
        .await;
        conn.close().await;

        let schema = result?;
        let names: Vec<String> = schema.tables.iter().map(|t| t.name.clone()).collect();
        let order = ordering::order(&names, &schema.edges);
        Ok(SyncPlan { schema, order })
    }

    /// Open, ping and close both databases.
    pub async fn check(&self) -> Vec<(Endpoint, Result<(), ConnectionError>)> {
        let mut results = Vec::new();
        for endpoint in [self.local_endpoint(), self.remote_endpoint()] {
            let outcome = match self.connector.open(&endpoint).await {
                Ok(conn) => {
                    conn.close().await;
                    Ok(())
                }
                Err(e) => Err(e),
            };
            results.push((endpoint, outcome));
        }
        results
    }

    // -----------------------------------------------------------------------
    // Passes and phases
    // -----------------------------------------------------------------------

    async fn run_pass(&self, report: &mut SyncReport, phases: &[Phase]) {
        let labels: Vec<&str> = phases.iter().map(Phase::label).collect();
        let local = self.local_endpoint();
        let remote = self.remote_endpoint();

        let mut pair = match ConnectionPair::open(self.connector.as_ref(), &local, &remote).await {
            Ok(pair) => pair,
            Err(e) => {
                error!(phases = ?labels, error = %e, "database unreachable; skipping");
                report
                    .connection_errors
                    .push(format!("{}: {e}", labels.join(", ")));
                return;
            }
        };

        for phase in phases {
            let (from, to) = match phase.flow {
                Flow::LocalToRemote => (pair.source.as_mut(), pair.target.as_mut()),
                Flow::RemoteToLocal => (pair.target.as_mut(), pair.source.as_mut()),
            };
            self.run_phase(report, from, to, *phase).await;
        }

        pair.close().await;
    }

    async fn run_phase(
        &self,
        report: &mut SyncReport,
        from: &mut dyn Connection,
        to: &mut dyn Connection,
        phase: Phase,
    ) {
        let label = phase.label();
        info!("------------------------------------------------------------");
        info!(phase = label, from = %from.endpoint(), to = %to.endpoint(), "starting phase");

        let schema = match introspect::introspect(
            from,
            &self.filter,
            self.config.sync.infer_foreign_keys,
        )
        .await
        {
            Ok(schema) => schema,
            Err(e) => {
                error!(phase = label, error = %e, "cannot read source catalog");
                report.connection_errors.push(format!("{label}: {e}"));
                return;
            }
        };

        for (table, reason) in &schema.unreadable {
            let mut entry = TableReport::new(label, table);
            entry.fail(reason);
            report.tables.push(entry);
        }

        let names: Vec<String> = schema.tables.iter().map(|t| t.name.clone()).collect();
        let order = ordering::order(&names, &schema.edges);
        if let Some(ref w) = order.warning {
            report.warnings.push(format!("{label}: {w}"));
        }

        if order.tables.is_empty() {
            warn!(phase = label, "no tables found in source database");
        } else {
            info!(phase = label, count = order.tables.len(), "tables to sync in dependency order");
            for (i, name) in order.tables.iter().enumerate() {
                info!("  {}. {}", i + 1, name);
            }
        }

        for name in &order.tables {
            let Some(table) = schema.table(name) else {
                continue;
            };
            let entry = self.sync_one(from, to, table, phase).await;
            report.tables.push(entry);
        }

        info!(phase = label, "phase complete");
    }

    /// Materialize, reconcile and align one table.
    async fn sync_one(
        &self,
        from: &mut dyn Connection,
        to: &mut dyn Connection,
        table: &TableDescriptor,
        phase: Phase,
    ) -> TableReport {
        let mut entry = TableReport::new(phase.label(), &table.name);
        info!(table = %table.name, phase = phase.label(), "syncing table");

        match materializer::ensure_table(to, table).await {
            Ok(Materialized::Created) => entry.created = true,
            Ok(Materialized::AlreadyExists) => {}
            Err(e) => {
                error!(table = %table.name, error = %e, "table failed");
                entry.fail(e);
                return entry;
            }
        }

        let result = reconciler::sync_table(from, to, table, phase.mode).await;
        entry.rows_examined = result.rows_examined;
        entry.rows_written = result.rows_written;
        entry.row_errors = result.row_errors;
        entry.rows_skipped = result.rows_skipped;
        entry.row_failures = result
            .failures
            .into_iter()
            .map(|f| RowFailure {
                key: f.key,
                error: f.detail,
            })
            .collect();

        match result.aborted {
            Some(e) => {
                error!(table = %table.name, error = %e, "table failed");
                entry.fail(e);
            }
            None => {
                if let Some(w) = materializer::align_sequence(to, table).await {
                    entry.warnings.push(w);
                }
            }
        }

        entry.settle();
        entry
    }
}
