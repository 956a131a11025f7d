//! Domain model types shared by the introspector, materializer, reconciler
//! and orchestrator.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// Role an endpoint plays within one sync direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Source,
    Target,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Target => write!(f, "target"),
        }
    }
}

/// Everything needed to open one database connection.
#[derive(Clone)]
pub struct Endpoint {
    pub role: Role,
    /// Human name of the database (`local` / `remote`).
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub require_tls: bool,
    pub accept_invalid_certs: bool,
    pub schema: String,
}

impl Endpoint {
    /// The same endpoint playing the other role.
    pub fn with_role(&self, role: Role) -> Self {
        Self {
            role,
            ..self.clone()
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}@{}:{}/{})",
            self.name, self.user, self.host, self.port, self.database
        )
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("role", &self.role)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("require_tls", &self.require_tls)
            .field("schema", &self.schema)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// One column as reported by `information_schema.columns`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// `data_type`, e.g. `integer`, `character varying`, `ARRAY`.
    pub data_type: String,
    /// `udt_name`, e.g. `int4`, `varchar`, `_text`.
    pub udt_name: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub max_length: Option<i32>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
}

impl Column {
    /// Shorthand used by tests and the in-memory backend.
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            udt_name: String::new(),
            nullable: true,
            default: None,
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn max_length(mut self, len: i32) -> Self {
        self.max_length = Some(len);
        self
    }

    pub fn default_expr(mut self, expr: &str) -> Self {
        self.default = Some(expr.to_string());
        self
    }

    /// Integer column types a sequence can feed.
    pub fn is_integer(&self) -> bool {
        matches!(self.data_type.as_str(), "smallint" | "integer" | "bigint")
    }
}

/// A table as discovered on the source for the current run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<Column>,
    /// Primary-key columns in key order. Empty means append-only.
    pub primary_key: Vec<String>,
    /// Sequence feeding a single-column integer primary key.
    pub sequence: Option<String>,
}

impl TableDescriptor {
    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Columns overwritten on key conflict.
    pub fn non_key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .filter(|n| !self.primary_key.iter().any(|k| k == n))
            .collect()
    }

    /// True when `columns` names the same key columns, in any order.
    pub fn key_matches(&self, columns: &[String]) -> bool {
        let mut ours: Vec<&str> = self.primary_key.iter().map(String::as_str).collect();
        let mut theirs: Vec<&str> = columns.iter().map(String::as_str).collect();
        ours.sort_unstable();
        theirs.sort_unstable();
        ours == theirs
    }

    /// The single key column, when the key is not composite.
    pub fn single_key(&self) -> Option<&str> {
        match self.primary_key.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }
}

/// A catalog foreign key: `column` of the owning table references `parent`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: String,
    pub parent: String,
}

/// `child` must be written after `parent`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DependencyEdge {
    pub child: String,
    pub parent: String,
}

impl DependencyEdge {
    pub fn new(child: &str, parent: &str) -> Self {
        Self {
            child: child.to_string(),
            parent: parent.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// One source row: column name to JSON value, in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct RowRecord {
    pub values: Map<String, Value>,
}

impl RowRecord {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Build from `(column, value)` pairs.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            values: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// The row's identity under `key_columns`; `None` if the table has no key.
    pub fn key(&self, key_columns: &[String]) -> Option<RowKey> {
        if key_columns.is_empty() {
            return None;
        }
        Some(RowKey::from_values(
            key_columns
                .iter()
                .map(|c| self.values.get(c).cloned().unwrap_or(Value::Null)),
        ))
    }

    /// Serialize for transfer to the destination.
    pub fn to_json(&self) -> String {
        Value::Object(self.values.clone()).to_string()
    }
}

/// Canonical rendering of a primary-key tuple, e.g. `[1]` or `[3,"eu"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey(String);

impl RowKey {
    pub fn from_values<I: IntoIterator<Item = Value>>(values: I) -> Self {
        Self(Value::Array(values.into_iter().collect()).to_string())
    }

    /// Re-canonicalize a JSON array produced by the server.
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(json)?;
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Directions
// ---------------------------------------------------------------------------

/// The operator-selected sync direction.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SyncDirection {
    /// Source → Target.
    LocalToRemote,
    /// Target → Source.
    RemoteToLocal,
    /// Target → Source new rows, then Source → Target all rows.
    #[default]
    SmartSync,
    /// Source → Target, then Target → Source.
    Both,
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalToRemote => write!(f, "local-to-remote"),
            Self::RemoteToLocal => write!(f, "remote-to-local"),
            Self::SmartSync => write!(f, "smart-sync"),
            Self::Both => write!(f, "both"),
        }
    }
}

impl std::str::FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local-to-remote" => Ok(Self::LocalToRemote),
            "remote-to-local" => Ok(Self::RemoteToLocal),
            "smart-sync" | "smart" => Ok(Self::SmartSync),
            "both" => Ok(Self::Both),
            other => Err(format!(
                "unknown direction '{other}': use local-to-remote, remote-to-local, smart-sync or both"
            )),
        }
    }
}

/// How the reconciler treats rows already present at the destination.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Insert, overwriting non-key columns on key conflict.
    Upsert,
    /// Only rows whose key is absent at the destination.
    NewRowsOnly,
}

/// The statement shape used for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowWrite {
    /// `ON CONFLICT (key) DO UPDATE`.
    Upsert,
    /// `ON CONFLICT (key) DO NOTHING`.
    InsertIfAbsent,
    /// Plain insert, no conflict target.
    Append,
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
                Column::new("name", "text"),
            ],
            primary_key: vec!["id".into()],
            sequence: Some("tags_id_seq".into()),
        }
    }

    #[test]
    fn test_non_key_columns() {
        let t = tags();
        assert_eq!(t.non_key_columns(), vec!["name"]);
        assert_eq!(t.single_key(), Some("id"));
        assert!(t.column("id").unwrap().is_integer());
    }

    #[test]
    fn test_row_key_matches_server_rendering() {
        let row = RowRecord::from_pairs([("id", json!(1)), ("name", json!("x"))]);
        let key = row.key(&["id".to_string()]).unwrap();
        assert_eq!(key, RowKey::parse("[1]").unwrap());

        let composite = RowRecord::from_pairs([("a", json!(3)), ("b", json!("eu"))]);
        let key = composite.key(&["a".to_string(), "b".to_string()]).unwrap();
        // json_build_array(...)::text puts a space after commas.
        assert_eq!(key, RowKey::parse("[3, \"eu\"]").unwrap());
        assert_eq!(key.as_str(), "[3,\"eu\"]");
    }

    #[test]
    fn test_key_matches_ignores_column_order() {
        let mut t = tags();
        t.primary_key = vec!["a".into(), "b".into()];
        assert!(t.key_matches(&["b".to_string(), "a".to_string()]));
        assert!(!t.key_matches(&["a".to_string()]));
        assert!(!t.key_matches(&[]));
    }

    #[test]
    fn test_numeric_precision_preserved() {
        let row: Map<String, Value> =
            serde_json::from_str(r#"{"amount": 12345678901234567890.123456789}"#).unwrap();
        let row = RowRecord::new(row);
        assert_eq!(row.to_json(), r#"{"amount":12345678901234567890.123456789}"#);
    }

    #[test]
    fn test_direction_parse_and_display() {
        for d in [
            SyncDirection::LocalToRemote,
            SyncDirection::RemoteToLocal,
            SyncDirection::SmartSync,
            SyncDirection::Both,
        ] {
            assert_eq!(d.to_string().parse::<SyncDirection>().unwrap(), d);
        }
        assert!("sideways".parse::<SyncDirection>().is_err());
        assert_eq!(SyncDirection::default(), SyncDirection::SmartSync);
    }

    #[test]
    fn test_endpoint_debug_redacts_password() {
        let ep = Endpoint {
            role: Role::Target,
            name: "remote".into(),
            host: "h".into(),
            port: 5432,
            database: "d".into(),
            user: "u".into(),
            password: "hunter2".into(),
            require_tls: true,
            accept_invalid_certs: false,
            schema: "public".into(),
        };
        assert!(!format!("{:?}", ep).contains("hunter2"));
        assert_eq!(ep.to_string(), "remote (u@h:5432/d)");
        assert_eq!(ep.with_role(Role::Source).role, Role::Source);
    }
}
