//! Schema introspection.
//!
//! Discovers the syncable tables of the source database, their columns,
//! primary keys and key sequences, and the dependency edges between them.
//! The catalog is read fresh on every run.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::db::ddl;
use crate::errors::{DbError, IntrospectionError};
use crate::models::{Column, DependencyEdge, TableDescriptor};

/// Glob patterns of tables that are never synchronized.
#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    patterns: Vec<String>,
}

impl TableFilter {
    pub fn new(patterns: &[String]) -> Self {
        Self {
            patterns: patterns.to_vec(),
        }
    }

    pub fn excludes(&self, table: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| glob_match::glob_match(p, table))
    }
}

/// Everything the orchestrator needs about the source for one phase.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    /// Readable tables, sorted by name.
    pub tables: Vec<TableDescriptor>,
    pub edges: Vec<DependencyEdge>,
    /// Tables that could not be described, with the reason.
    pub unreadable: Vec<(String, String)>,
}

impl Schema {
    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// Base tables of the source schema minus excluded ones, sorted by name.
pub async fn list_table_names(
    conn: &mut dyn Connection,
    filter: &TableFilter,
) -> Result<Vec<String>, IntrospectionError> {
    let mut names = conn
        .list_tables()
        .await
        .map_err(IntrospectionError::ListTables)?;
    names.sort();

    let (excluded, kept): (Vec<String>, Vec<String>) =
        names.into_iter().partition(|n| filter.excludes(n));
    if !excluded.is_empty() {
        debug!(tables = ?excluded, "excluded by pattern");
    }
    Ok(kept)
}

/// Describe one table: columns, primary key and key sequence.
///
/// A failed primary-key lookup is treated as "no primary key"; the table is
/// then synced append-only.
pub async fn describe_table(
    conn: &mut dyn Connection,
    table: &str,
) -> Result<TableDescriptor, IntrospectionError> {
    let columns = conn
        .columns(table)
        .await
        .map_err(|source| IntrospectionError::DescribeTable {
            table: table.to_string(),
            source,
        })?;

    let primary_key = match conn.primary_key(table).await {
        Ok(pk) => pk,
        Err(e) if e.is_fatal_to_table() => {
            return Err(IntrospectionError::DescribeTable {
                table: table.to_string(),
                source: e,
            })
        }
        Err(e) => {
            warn!(table, error = %e, "primary key lookup failed; treating table as keyless");
            Vec::new()
        }
    };

    let mut descriptor = TableDescriptor {
        name: table.to_string(),
        columns,
        primary_key,
        sequence: None,
    };

    descriptor.sequence = match detect_sequence(conn, &descriptor).await {
        Ok(seq) => seq,
        Err(e) => {
            warn!(table, error = %e, "sequence detection failed");
            None
        }
    };

    debug!(
        table,
        columns = descriptor.columns.len(),
        primary_key = ?descriptor.primary_key,
        sequence = ?descriptor.sequence,
        "described table"
    );
    Ok(descriptor)
}

/// Syncable tables of the source, fully described.
pub async fn list_syncable_tables(
    conn: &mut dyn Connection,
    filter: &TableFilter,
) -> Result<Vec<TableDescriptor>, IntrospectionError> {
    let mut tables = Vec::new();
    for name in list_table_names(conn, filter).await? {
        tables.push(describe_table(conn, &name).await?);
    }
    Ok(tables)
}

/// Discover tables and dependency edges.
///
/// Only a failure to list tables is returned as an error; a table that
/// cannot be described is reported in [`Schema::unreadable`].
pub async fn introspect(
    conn: &mut dyn Connection,
    filter: &TableFilter,
    infer_foreign_keys: bool,
) -> Result<Schema, IntrospectionError> {
    let names = list_table_names(conn, filter).await?;
    let mut schema = Schema::default();

    for name in &names {
        match describe_table(conn, name).await {
            Ok(desc) => schema.tables.push(desc),
            Err(e) => {
                warn!(table = %name, error = %e, "cannot describe table");
                schema.unreadable.push((name.clone(), e.to_string()));
            }
        }
    }

    let mut edges = BTreeSet::new();
    for table in &schema.tables {
        match conn.foreign_keys(&table.name).await {
            Ok(fks) => {
                for fk in fks {
                    if fk.parent != table.name {
                        edges.insert(DependencyEdge::new(&table.name, &fk.parent));
                    }
                }
            }
            Err(e) => warn!(table = %table.name, error = %e, "foreign key lookup failed"),
        }
    }
    if infer_foreign_keys {
        edges.extend(inferred_edges(&schema.tables));
    }
    schema.edges = edges.into_iter().collect();

    info!(
        tables = schema.tables.len(),
        edges = schema.edges.len(),
        unreadable = schema.unreadable.len(),
        "schema introspected"
    );
    Ok(schema)
}

// ---------------------------------------------------------------------------
// Sequences
// ---------------------------------------------------------------------------

/// Find the sequence feeding a single-column integer primary key.
///
/// Tried in order: the `<table>_<key>_seq` naming convention, the catalog's
/// `pg_get_serial_sequence`, then the `nextval('…')` column default.
pub async fn detect_sequence(
    conn: &mut dyn Connection,
    table: &TableDescriptor,
) -> Result<Option<String>, DbError> {
    let Some(key) = table.single_key() else {
        return Ok(None);
    };
    let Some(column) = table.column(key).filter(|c| c.is_integer()) else {
        return Ok(None);
    };

    let conventional = format!("{}_{}_seq", table.name, key);
    if conn.sequence_exists(&conventional).await? {
        return Ok(Some(conventional));
    }
    if let Some(seq) = conn.serial_sequence(&table.name, key).await? {
        return Ok(Some(seq));
    }
    Ok(sequence_from_default(column))
}

/// Sequence name referenced by a `nextval('…')` column default.
pub fn sequence_from_default(column: &Column) -> Option<String> {
    let default = column.default.as_deref()?;
    let re = regex_lite::Regex::new(r"nextval\('((?:[^']|'')+)'").ok()?;
    let quoted = re.captures(default)?.get(1)?.as_str().replace("''", "'");
    Some(ddl::bare_sequence_name(&quoted))
}

// ---------------------------------------------------------------------------
// Naming-convention edges
// ---------------------------------------------------------------------------

/// Edges implied by `<parent>_id` columns.
///
/// The parent is the table named `<parent>`, `<parent>s` or `<prefix>_<parent>`,
/// used only when exactly one table matches.
pub fn inferred_edges(tables: &[TableDescriptor]) -> Vec<DependencyEdge> {
    let mut edges = Vec::new();
    for table in tables {
        for column in &table.columns {
            let Some(stem) = column.name.strip_suffix("_id") else {
                continue;
            };
            if stem.is_empty() {
                continue;
            }
            let plural = format!("{stem}s");
            let suffix = format!("_{stem}");
            let candidates: Vec<&str> = tables
                .iter()
                .map(|t| t.name.as_str())
                .filter(|n| *n == stem || *n == plural || n.ends_with(&suffix))
                .collect();

            match candidates.as_slice() {
                [parent] if *parent != table.name => {
                    debug!(child = %table.name, %parent, column = %column.name, "inferred dependency");
                    edges.push(DependencyEdge::new(&table.name, parent));
                }
                _ => {}
            }
        }
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, columns: &[&str]) -> TableDescriptor {
        TableDescriptor {
            name: name.into(),
            columns: columns.iter().map(|c| Column::new(c, "integer")).collect(),
            primary_key: vec!["id".into()],
            sequence: None,
        }
    }

    #[test]
    fn test_filter_globs() {
        let filter = TableFilter::new(&["django_*".to_string(), "auth_*".to_string()]);
        assert!(filter.excludes("django_migrations"));
        assert!(filter.excludes("auth_user"));
        assert!(!filter.excludes("notes_notes"));
        assert!(!TableFilter::default().excludes("django_session"));
    }

    #[test]
    fn test_sequence_from_default() {
        let col = Column::new("id", "integer").default_expr("nextval('legacy_ids'::regclass)");
        assert_eq!(sequence_from_default(&col).as_deref(), Some("legacy_ids"));

        let col = Column::new("id", "integer")
            .default_expr("nextval('\"Sales\".\"order_no_seq\"'::regclass)");
        assert_eq!(sequence_from_default(&col).as_deref(), Some("order_no_seq"));

        assert_eq!(sequence_from_default(&Column::new("id", "integer").default_expr("0")), None);
        assert_eq!(sequence_from_default(&Column::new("id", "integer")), None);
    }

    #[test]
    fn test_inferred_edges_by_name() {
        let tables = vec![
            table("notes_notes", &["id", "tag_id"]),
            table("notes_tag", &["id"]),
            table("stocks", &["id"]),
            table("trades", &["id", "stock_id", "owner_id"]),
        ];
        let edges = inferred_edges(&tables);
        assert!(edges.contains(&DependencyEdge::new("notes_notes", "notes_tag")));
        assert!(edges.contains(&DependencyEdge::new("trades", "stocks")));
        // No table matches `owner`.
        assert_eq!(edges.len(), 2);
    }

    #[test]
    fn test_inferred_edges_need_unique_match() {
        let tables = vec![
            table("a_tag", &["id"]),
            table("b_tag", &["id"]),
            table("notes", &["id", "tag_id"]),
            table("tag", &["id", "tag_id"]),
        ];
        let edges = inferred_edges(&tables);
        // `tag`, `a_tag` and `b_tag` all match; `tag.tag_id` would be a self edge.
        assert!(edges.is_empty());
    }
}
