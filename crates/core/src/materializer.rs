//! Destination table materialization.
//!
//! Makes sure the destination can receive a table's rows before any are
//! written, and brings the key sequence up to date once they have been.

use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::errors::{DbError, DdlError};
use crate::models::TableDescriptor;

/// What [`ensure_table`] found at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    Created,
    AlreadyExists,
}

/// Create `table` at the destination if it is missing.
///
/// An existing table is left untouched, but it must have every column the
/// source has and, when the source has a key, the same primary key;
/// otherwise the schemas have diverged and the table is failed rather than
/// altered. Running this twice is a no-op the second time.
pub async fn ensure_table(
    dest: &mut dyn Connection,
    table: &TableDescriptor,
) -> Result<Materialized, DdlError> {
    if table.columns.is_empty() {
        return Err(DdlError::NoColumns(table.name.clone()));
    }

    let inspect = |source: DbError| DdlError::Inspect {
        table: table.name.clone(),
        source,
    };

    if dest.table_exists(&table.name).await.map_err(inspect)? {
        let existing = dest.columns(&table.name).await.map_err(inspect)?;
        let missing: Vec<String> = table
            .columns
            .iter()
            .filter(|c| !existing.iter().any(|e| e.name == c.name))
            .map(|c| c.name.clone())
            .collect();
        if !missing.is_empty() {
            return Err(DdlError::Divergent {
                table: table.name.clone(),
                missing,
            });
        }
        if table.has_primary_key() {
            let found = dest.primary_key(&table.name).await.map_err(inspect)?;
            if !table.key_matches(&found) {
                return Err(DdlError::KeyMismatch {
                    table: table.name.clone(),
                    expected: table.primary_key.clone(),
                    found,
                });
            }
        }
        debug!(table = %table.name, "destination table exists");
        return Ok(Materialized::AlreadyExists);
    }

    dest.create_table(table)
        .await
        .map_err(|source| DdlError::CreateFailed {
            table: table.name.clone(),
            source,
        })?;
    info!(
        table = %table.name,
        endpoint = %dest.endpoint().name,
        sequence = ?table.sequence,
        "created destination table"
    );
    Ok(Materialized::Created)
}

/// Advance the destination key sequence past the copied keys.
///
/// Returns a warning message instead of an error: a sequence left behind
/// only matters for later destination-side inserts.
pub async fn align_sequence(dest: &mut dyn Connection, table: &TableDescriptor) -> Option<String> {
    if table.single_key().is_none() {
        return None;
    }
    match dest.align_sequence(table).await {
        Ok(Some(value)) => {
            debug!(table = %table.name, value, "sequence aligned");
            None
        }
        Ok(None) => None,
        Err(e) => {
            warn!(table = %table.name, error = %e, "cannot align sequence");
            Some(format!("sequence not aligned: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connector;
    use crate::db::memory::{MemoryConnector, MemoryDatabase};
    use crate::models::{Column, Endpoint, Role};

    fn endpoint() -> Endpoint {
        Endpoint {
            role: Role::Target,
            name: "remote".into(),
            host: "remote".into(),
            port: 5432,
            database: "app".into(),
            user: "app".into(),
            password: String::new(),
            require_tls: false,
            accept_invalid_certs: false,
            schema: "public".into(),
        }
    }

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

    #[tokio::test]
    async fn test_create_then_idempotent() {
        let db = MemoryDatabase::new();
        let connector = MemoryConnector::new().with_database("remote", db.clone());
        let mut conn = connector.open(&endpoint()).await.unwrap();

        let first = ensure_table(conn.as_mut(), &tags()).await.unwrap();
        assert_eq!(first, Materialized::Created);
        assert!(db.has_table("tags"));
        assert_eq!(db.sequence("tags_id_seq"), Some((1, false)));

        let second = ensure_table(conn.as_mut(), &tags()).await.unwrap();
        assert_eq!(second, Materialized::AlreadyExists);
    }

    #[tokio::test]
    async fn test_divergent_destination() {
        let db = MemoryDatabase::new();
        db.add_table(TableDescriptor {
            columns: vec![Column::new("id", "integer").not_null()],
            ..tags()
        });
        let connector = MemoryConnector::new().with_database("remote", db);
        let mut conn = connector.open(&endpoint()).await.unwrap();

        let err = ensure_table(conn.as_mut(), &tags()).await.unwrap_err();
        match err {
            DdlError::Divergent { missing, .. } => assert_eq!(missing, vec!["name".to_string()]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_destination_without_matching_key() {
        let db = MemoryDatabase::new();
        db.add_table(TableDescriptor {
            primary_key: vec![],
            sequence: None,
            ..tags()
        });
        let connector = MemoryConnector::new().with_database("remote", db);
        let mut conn = connector.open(&endpoint()).await.unwrap();

        let err = ensure_table(conn.as_mut(), &tags()).await.unwrap_err();
        match err {
            DdlError::KeyMismatch { expected, found, .. } => {
                assert_eq!(expected, vec!["id".to_string()]);
                assert!(found.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }

        // A keyless source appends, so the destination key does not matter.
        let keyless = TableDescriptor {
            primary_key: vec![],
            ..tags()
        };
        assert_eq!(
            ensure_table(conn.as_mut(), &keyless).await.unwrap(),
            Materialized::AlreadyExists
        );
    }

    #[tokio::test]
    async fn test_no_columns() {
        let db = MemoryDatabase::new();
        let connector = MemoryConnector::new().with_database("remote", db);
        let mut conn = connector.open(&endpoint()).await.unwrap();
        let empty = TableDescriptor {
            columns: vec![],
            ..tags()
        };
        assert!(matches!(
            ensure_table(conn.as_mut(), &empty).await,
            Err(DdlError::NoColumns(_))
        ));
    }
}
