//! In-memory backend.
//!
//! [`MemoryDatabase`] models the parts of a PostgreSQL schema the sync relies
//! on: typed columns with NOT NULL and `varchar(n)` limits, primary keys,
//! single-column foreign keys and sequences with `last_value`/`is_called`
//! semantics. Writes are checked the way the server checks them, so row-level
//! failures surface as [`DbError::Statement`]. Faults can be injected per
//! table to exercise table-level and connection-level failures.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::connection::{Connection, Connector};
use crate::errors::{ConnectionError, DbError};
use crate::models::{Column, Endpoint, ForeignKey, RowKey, RowRecord, RowWrite, TableDescriptor};

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MemTable {
    columns: Vec<Column>,
    primary_key: Vec<String>,
    foreign_keys: Vec<ForeignKey>,
    /// Sequence owned by the key column (what `pg_get_serial_sequence` sees).
    owned_sequence: Option<String>,
    rows: Vec<Map<String, Value>>,
}

impl MemTable {
    fn key_of(&self, row: &Map<String, Value>) -> Option<RowKey> {
        if self.primary_key.is_empty() {
            return None;
        }
        Some(RowKey::from_values(
            self.primary_key
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or(Value::Null)),
        ))
    }

    fn position_of(&self, key: &RowKey) -> Option<usize> {
        self.rows
            .iter()
            .position(|r| self.key_of(r).as_ref() == Some(key))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sequence {
    last_value: i64,
    is_called: bool,
}

/// One write accepted by the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub table: String,
    pub key: Option<RowKey>,
    pub write: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    /// The read of this table times out.
    ReadTimeout,
    /// The connection drops on the first write to this table.
    WriteConnectionLost,
    /// Catalog lookups (primary key) for this table fail.
    Catalog,
    /// CREATE TABLE for this table is rejected.
    Create,
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, MemTable>,
    sequences: BTreeMap<String, Sequence>,
    faults: HashMap<String, Fault>,
    writes: Vec<WriteRecord>,
    unreachable: bool,
    open_connections: usize,
}

/// A shared in-memory database. Clones refer to the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

fn statement(operation: &str, detail: impl Into<String>) -> DbError {
    DbError::Statement {
        operation: operation.to_string(),
        detail: detail.into(),
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a table. A descriptor sequence becomes the key column's owned
    /// sequence and is created if missing.
    pub fn add_table(&self, table: TableDescriptor) {
        let mut state = self.lock();
        let owned = table.sequence.clone().filter(|_| table.single_key().is_some());
        if let Some(ref seq) = owned {
            state.sequences.entry(seq.clone()).or_insert(Sequence {
                last_value: 1,
                is_called: false,
            });
        }
        state.tables.insert(
            table.name.clone(),
            MemTable {
                columns: table.columns,
                primary_key: table.primary_key,
                foreign_keys: Vec::new(),
                owned_sequence: owned,
                rows: Vec::new(),
            },
        );
    }

    /// Declare `table.column` as referencing the primary key of `parent`.
    pub fn add_foreign_key(&self, table: &str, column: &str, parent: &str) {
        if let Some(t) = self.lock().tables.get_mut(table) {
            t.foreign_keys.push(ForeignKey {
                column: column.to_string(),
                parent: parent.to_string(),
            });
        }
    }

    /// Create a free-standing sequence that no column owns.
    pub fn add_sequence(&self, name: &str, last_value: i64, is_called: bool) {
        self.lock().sequences.insert(
            name.to_string(),
            Sequence {
                last_value,
                is_called,
            },
        );
    }

    /// `(last_value, is_called)` of a sequence.
    pub fn sequence(&self, name: &str) -> Option<(i64, bool)> {
        self.lock()
            .sequences
            .get(name)
            .map(|s| (s.last_value, s.is_called))
    }

    /// Insert a row with the same checks a client write gets.
    pub fn insert(&self, table: &str, row: RowRecord) -> Result<(), DbError> {
        self.lock().write(table, row.values, RowWrite::Append)
    }

    /// Insert a row whose key is drawn from the key column's sequence, the
    /// way an application insert relying on the column default would.
    pub fn insert_generated(&self, table: &str, mut row: RowRecord) -> Result<i64, DbError> {
        let mut state = self.lock();
        let (key, seq) = {
            let t = state
                .tables
                .get(table)
                .ok_or_else(|| statement("insert", format!("relation \"{table}\" does not exist")))?;
            match (t.primary_key.as_slice(), t.owned_sequence.clone()) {
                ([key], Some(seq)) => (key.clone(), seq),
                _ => return Err(statement("insert", format!("\"{table}\" has no key sequence"))),
            }
        };
        let id = state.nextval(&seq)?;
        row.values.insert(key, Value::from(id));
        state.write(table, row.values, RowWrite::Append)?;
        Ok(id)
    }

    /// Draw the next value from a sequence.
    pub fn nextval(&self, sequence: &str) -> Result<i64, DbError> {
        self.lock().nextval(sequence)
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.lock().tables.contains_key(table)
    }

    /// Column definitions of a table.
    pub fn columns_of(&self, table: &str) -> Vec<Column> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default()
    }

    /// Stored rows in key order.
    pub fn rows(&self, table: &str) -> Vec<RowRecord> {
        self.lock()
            .sorted_rows(table)
            .into_iter()
            .map(RowRecord::new)
            .collect()
    }

    /// Look up one row by its single-column key.
    pub fn row(&self, table: &str, key: Value) -> Option<RowRecord> {
        let state = self.lock();
        let t = state.tables.get(table)?;
        let wanted = RowKey::from_values([key]);
        t.position_of(&wanted).map(|i| RowRecord::new(t.rows[i].clone()))
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, |t| t.rows.len())
    }

    /// Writes accepted through connections, in order.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    pub fn open_connections(&self) -> usize {
        self.lock().open_connections
    }

    /// Refuse every new connection.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Make full reads of `table` time out.
    pub fn fail_reads_of(&self, table: &str) {
        self.lock().faults.insert(table.to_string(), Fault::ReadTimeout);
    }

    /// Drop the connection on the first write to `table`.
    pub fn fail_writes_of(&self, table: &str) {
        self.lock()
            .faults
            .insert(table.to_string(), Fault::WriteConnectionLost);
    }

    /// Make primary-key lookups for `table` fail.
    pub fn fail_catalog_of(&self, table: &str) {
        self.lock().faults.insert(table.to_string(), Fault::Catalog);
    }

    /// Reject CREATE TABLE for `table`.
    pub fn fail_create_of(&self, table: &str) {
        self.lock().faults.insert(table.to_string(), Fault::Create);
    }
}

impl State {
    fn table(&self, operation: &str, name: &str) -> Result<&MemTable, DbError> {
        self.tables
            .get(name)
            .ok_or_else(|| statement(operation, format!("relation \"{name}\" does not exist")))
    }

    fn fault(&self, table: &str) -> Option<Fault> {
        self.faults.get(table).copied()
    }

    fn nextval(&mut self, sequence: &str) -> Result<i64, DbError> {
        let seq = self
            .sequences
            .get_mut(sequence)
            .ok_or_else(|| statement("nextval", format!("sequence \"{sequence}\" does not exist")))?;
        if seq.is_called {
            seq.last_value += 1;
        } else {
            seq.is_called = true;
        }
        Ok(seq.last_value)
    }

    fn sorted_rows(&self, table: &str) -> Vec<Map<String, Value>> {
        let Some(t) = self.tables.get(table) else {
            return Vec::new();
        };
        let mut rows = t.rows.clone();
        if !t.primary_key.is_empty() {
            rows.sort_by(|a, b| {
                t.primary_key
                    .iter()
                    .map(|k| compare_values(a.get(k), b.get(k)))
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }
        rows
    }

    /// Coerce and check a row against `table`, then store it.
    fn write(
        &mut self,
        table: &str,
        incoming: Map<String, Value>,
        write: RowWrite,
    ) -> Result<(), DbError> {
        let op = "write row";
        let t = self.table(op, table)?;

        let mut row = Map::new();
        for col in &t.columns {
            let value = incoming.get(&col.name).cloned().unwrap_or(Value::Null);
            row.insert(col.name.clone(), coerce(col, value)?);
        }

        for fk in &t.foreign_keys {
            let value = row.get(&fk.column).cloned().unwrap_or(Value::Null);
            if value.is_null() {
                continue;
            }
            let present = self
                .tables
                .get(&fk.parent)
                .is_some_and(|p| p.position_of(&RowKey::from_values([value.clone()])).is_some());
            if !present {
                return Err(statement(
                    op,
                    format!(
                        "insert or update on table \"{table}\" violates foreign key constraint: \
                         key ({})=({value}) is not present in table \"{}\"",
                        fk.column, fk.parent
                    ),
                ));
            }
        }

        let key = t.key_of(&row);
        let existing = key.as_ref().and_then(|k| t.position_of(k));
        let key_columns = t.primary_key.clone();

        let t = self
            .tables
            .get_mut(table)
            .ok_or_else(|| statement(op, format!("relation \"{table}\" does not exist")))?;
        match (existing, write) {
            (Some(_), RowWrite::InsertIfAbsent) => return Ok(()),
            (Some(i), RowWrite::Upsert) => {
                for (column, value) in row {
                    if !key_columns.contains(&column) {
                        t.rows[i].insert(column, value);
                    }
                }
            }
            (Some(_), RowWrite::Append) => {
                return Err(statement(
                    op,
                    format!(
                        "duplicate key value violates unique constraint \"{table}_pkey\": {}",
                        key.map(|k| k.to_string()).unwrap_or_default()
                    ),
                ));
            }
            (None, _) => t.rows.push(row),
        }
        Ok(())
    }
}

/// Check a value against a column the way the server's input functions do.
fn coerce(col: &Column, value: Value) -> Result<Value, DbError> {
    let op = "write row";
    if value.is_null() {
        if !col.nullable {
            return Err(statement(
                op,
                format!(
                    "null value in column \"{}\" violates not-null constraint",
                    col.name
                ),
            ));
        }
        return Ok(value);
    }

    match col.data_type.as_str() {
        "smallint" | "integer" | "bigint" => {
            let parsed = match &value {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            let n = parsed.ok_or_else(|| {
                statement(
                    op,
                    format!("invalid input syntax for type {}: {value}", col.data_type),
                )
            })?;
            let fits = match col.data_type.as_str() {
                "smallint" => i16::try_from(n).is_ok(),
                "integer" => i32::try_from(n).is_ok(),
                _ => true,
            };
            if !fits {
                return Err(statement(op, format!("value {n} is out of range for type {}", col.data_type)));
            }
            Ok(Value::from(n))
        }
        "boolean" => match value {
            Value::Bool(_) => Ok(value),
            other => Err(statement(op, format!("invalid input syntax for type boolean: {other}"))),
        },
        "character varying" | "character" => {
            let Value::String(ref s) = value else {
                return Ok(Value::String(value.to_string()));
            };
            match col.max_length {
                Some(max) if s.chars().count() > max as usize => Err(statement(
                    op,
                    format!("value too long for type character varying({max})"),
                )),
                _ => Ok(value),
            }
        }
        _ => Ok(value),
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (x, y) => x.map(|v| v.to_string()).cmp(&y.map(|v| v.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

/// Opens connections to registered [`MemoryDatabase`]s by host name.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    hosts: HashMap<String, MemoryDatabase>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `db` to endpoints whose host is `host`.
    pub fn with_database(mut self, host: &str, db: MemoryDatabase) -> Self {
        self.hosts.insert(host.to_string(), db);
        self
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, ConnectionError> {
        let db = match self.hosts.get(&endpoint.host) {
            Some(db) if !db.lock().unreachable => db.clone(),
            _ => {
                return Err(ConnectionError::Unreachable {
                    endpoint: endpoint.to_string(),
                    detail: "connection refused".into(),
                })
            }
        };
        db.lock().open_connections += 1;
        Ok(Box::new(MemoryConnection {
            endpoint: endpoint.clone(),
            db,
        }))
    }
}

/// A session against a [`MemoryDatabase`].
pub struct MemoryConnection {
    endpoint: Endpoint,
    db: MemoryDatabase,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        let mut state = self.db.lock();
        state.open_connections = state.open_connections.saturating_sub(1);
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn ping(&mut self) -> Result<(), DbError> {
        Ok(())
    }

    async fn list_tables(&mut self) -> Result<Vec<String>, DbError> {
        Ok(self.db.lock().tables.keys().cloned().collect())
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool, DbError> {
        Ok(self.db.has_table(table))
    }

    async fn columns(&mut self, table: &str) -> Result<Vec<Column>, DbError> {
        let state = self.db.lock();
        Ok(state.table("describe columns", table)?.columns.clone())
    }

    async fn primary_key(&mut self, table: &str) -> Result<Vec<String>, DbError> {
        let state = self.db.lock();
        if state.fault(table) == Some(Fault::Catalog) {
            return Err(statement("read primary key", "permission denied for catalog"));
        }
        Ok(state.table("read primary key", table)?.primary_key.clone())
    }

    async fn foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKey>, DbError> {
        let state = self.db.lock();
        Ok(state.table("read foreign keys", table)?.foreign_keys.clone())
    }

    async fn sequence_exists(&mut self, name: &str) -> Result<bool, DbError> {
        Ok(self.db.lock().sequences.contains_key(name))
    }

    async fn serial_sequence(
        &mut self,
        table: &str,
        column: &str,
    ) -> Result<Option<String>, DbError> {
        let state = self.db.lock();
        let t = state.table("probe sequence", table)?;
        Ok(match t.primary_key.as_slice() {
            [key] if key == column => t.owned_sequence.clone(),
            _ => None,
        })
    }

    async fn create_table(&mut self, table: &TableDescriptor) -> Result<(), DbError> {
        if self.db.lock().fault(&table.name) == Some(Fault::Create) {
            return Err(statement("create table", "permission denied for schema"));
        }
        if self.db.has_table(&table.name) {
            return Ok(());
        }
        debug!(table = %table.name, "creating in-memory table");
        let mut created = table.clone();
        created.columns = table
            .columns
            .iter()
            .map(|c| {
                let mut c = c.clone();
                if c.default.as_deref().is_some_and(|d| d.contains("nextval(")) {
                    c.default = None;
                }
                c
            })
            .collect();
        self.db.add_table(created);
        Ok(())
    }

    async fn align_sequence(&mut self, table: &TableDescriptor) -> Result<Option<i64>, DbError> {
        let Some(key) = table.single_key() else {
            return Ok(None);
        };
        let mut state = self.db.lock();
        let t = state.table("align sequence", &table.name)?;
        let sequence = match (&t.owned_sequence, &table.sequence) {
            (Some(owned), _) => owned.clone(),
            (None, Some(seq)) if state.sequences.contains_key(seq) => seq.clone(),
            _ => return Ok(None),
        };
        let max_key = t
            .rows
            .iter()
            .filter_map(|r| r.get(key).and_then(Value::as_i64))
            .max();

        let Some(seq) = state.sequences.get_mut(&sequence) else {
            return Ok(None);
        };
        match max_key {
            Some(max) if max >= 1 && max >= seq.last_value => {
                seq.last_value = max;
                seq.is_called = true;
                Ok(Some(max))
            }
            _ => Ok(None),
        }
    }

    async fn read_rows(&mut self, table: &TableDescriptor) -> Result<Vec<RowRecord>, DbError> {
        let state = self.db.lock();
        if state.fault(&table.name) == Some(Fault::ReadTimeout) {
            return Err(DbError::Timeout {
                operation: "read rows".into(),
                secs: 60,
            });
        }
        state.table("read rows", &table.name)?;
        Ok(state
            .sorted_rows(&table.name)
            .into_iter()
            .map(RowRecord::new)
            .collect())
    }

    async fn read_keys(
        &mut self,
        table: &str,
        key_columns: &[String],
    ) -> Result<HashSet<RowKey>, DbError> {
        let state = self.db.lock();
        let t = state.table("read keys", table)?;
        Ok(t.rows
            .iter()
            .map(|r| {
                RowKey::from_values(
                    key_columns
                        .iter()
                        .map(|c| r.get(c).cloned().unwrap_or(Value::Null)),
                )
            })
            .collect())
    }

    async fn write_row(
        &mut self,
        table: &TableDescriptor,
        row: &RowRecord,
        write: RowWrite,
    ) -> Result<(), DbError> {
        let mut state = self.db.lock();
        if state.fault(&table.name) == Some(Fault::WriteConnectionLost) {
            return Err(DbError::ConnectionLost {
                operation: "write row".into(),
                detail: "server closed the connection unexpectedly".into(),
            });
        }
        if write != RowWrite::Append && table.has_primary_key() {
            let target = &state.table("write row", &table.name)?.primary_key;
            if !table.key_matches(target) {
                return Err(statement(
                    "write row",
                    "there is no unique or exclusion constraint matching the ON CONFLICT specification",
                ));
            }
        }
        // Only the columns the source sent are written; the rest take NULL.
        let incoming: Map<String, Value> = table
            .column_names()
            .into_iter()
            .filter_map(|c| row.get(c).map(|v| (c.to_string(), v.clone())))
            .collect();
        state.write(&table.name, incoming, write)?;
        state.writes.push(WriteRecord {
            table: table.name.clone(),
            key: row.key(&table.primary_key),
            write: format!("{write:?}"),
        });
        Ok(())
    }

    async fn close(self: Box<Self>) {
        debug!(endpoint = %self.endpoint, "closing in-memory connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tags() -> TableDescriptor {
        TableDescriptor {
            name: "tags".into(),
            columns: vec![
                Column::new("id", "integer").not_null(),
                Column::new("name", "character varying").max_length(5),
            ],
            primary_key: vec!["id".into()],
            sequence: Some("tags_id_seq".into()),
        }
    }

    #[test]
    fn test_insert_generated_uses_sequence() {
        let db = MemoryDatabase::new();
        db.add_table(tags());
        assert_eq!(db.sequence("tags_id_seq"), Some((1, false)));

        let a = db
            .insert_generated("tags", RowRecord::from_pairs([("name", json!("a"))]))
            .unwrap();
        let b = db
            .insert_generated("tags", RowRecord::from_pairs([("name", json!("b"))]))
            .unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(db.sequence("tags_id_seq"), Some((2, true)));
    }

    #[test]
    fn test_write_checks() {
        let db = MemoryDatabase::new();
        db.add_table(tags());

        let too_long = RowRecord::from_pairs([("id", json!(1)), ("name", json!("toolong"))]);
        let err = db.insert("tags", too_long).unwrap_err();
        assert!(err.to_string().contains("value too long"));

        let no_id = RowRecord::from_pairs([("name", json!("ok"))]);
        assert!(db.insert("tags", no_id).unwrap_err().to_string().contains("not-null"));

        let big = RowRecord::from_pairs([("id", json!(3_000_000_000i64)), ("name", json!("x"))]);
        assert!(db.insert("tags", big).unwrap_err().to_string().contains("out of range"));

        db.insert("tags", RowRecord::from_pairs([("id", json!(1)), ("name", json!("x"))]))
            .unwrap();
        let dup = RowRecord::from_pairs([("id", json!(1)), ("name", json!("y"))]);
        assert!(db.insert("tags", dup).unwrap_err().to_string().contains("duplicate key"));
    }

    #[test]
    fn test_foreign_key_enforced() {
        let db = MemoryDatabase::new();
        db.add_table(tags());
        db.add_table(TableDescriptor {
            name: "notes".into(),
            columns: vec![
                Column::new("id", "integer").not_null(),
                Column::new("tag_id", "integer"),
            ],
            primary_key: vec!["id".into()],
            sequence: None,
        });
        db.add_foreign_key("notes", "tag_id", "tags");

        let orphan = RowRecord::from_pairs([("id", json!(1)), ("tag_id", json!(9))]);
        assert!(db.insert("notes", orphan).unwrap_err().to_string().contains("foreign key"));

        let unlinked = RowRecord::from_pairs([("id", json!(2)), ("tag_id", Value::Null)]);
        db.insert("notes", unlinked).unwrap();
    }

    #[test]
    fn test_rows_sorted_by_numeric_key() {
        let db = MemoryDatabase::new();
        db.add_table(tags());
        for id in [10, 2, 1] {
            db.insert("tags", RowRecord::from_pairs([("id", json!(id)), ("name", json!("n"))]))
                .unwrap();
        }
        let ids: Vec<i64> = db
            .rows("tags")
            .iter()
            .map(|r| r.get("id").and_then(Value::as_i64).unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 10]);
    }

    #[tokio::test]
    async fn test_connector_tracks_open_connections() {
        let db = MemoryDatabase::new();
        let connector = MemoryConnector::new().with_database("local", db.clone());
        let endpoint = Endpoint {
            role: crate::models::Role::Source,
            name: "local".into(),
            host: "local".into(),
            port: 5432,
            database: "app".into(),
            user: "app".into(),
            password: String::new(),
            require_tls: false,
            accept_invalid_certs: false,
            schema: "public".into(),
        };

        let conn = connector.open(&endpoint).await.unwrap();
        assert_eq!(db.open_connections(), 1);
        conn.close().await;
        assert_eq!(db.open_connections(), 0);

        db.set_unreachable(true);
        assert!(connector.open(&endpoint).await.is_err());
    }

    #[tokio::test]
    async fn test_conflict_target_must_be_the_primary_key() {
        let db = MemoryDatabase::new();
        let keyless = TableDescriptor {
            primary_key: vec![],
            ..tags()
        };
        db.add_table(keyless);
        let connector = MemoryConnector::new().with_database("remote", db.clone());
        let endpoint = Endpoint {
            role: crate::models::Role::Target,
            name: "remote".into(),
            host: "remote".into(),
            port: 5432,
            database: "app".into(),
            user: "app".into(),
            password: String::new(),
            require_tls: false,
            accept_invalid_certs: false,
            schema: "public".into(),
        };
        let mut conn = connector.open(&endpoint).await.unwrap();
        let row = RowRecord::from_pairs([("id", json!(1)), ("name", json!("x"))]);

        for write in [RowWrite::Upsert, RowWrite::InsertIfAbsent] {
            let err = conn.write_row(&tags(), &row, write).await.unwrap_err();
            assert!(err.to_string().contains("ON CONFLICT specification"));
            assert!(!err.is_fatal_to_table());
        }
        conn.write_row(&tags(), &row, RowWrite::Append).await.unwrap();
        assert_eq!(db.row_count("tags"), 1);
    }
}
