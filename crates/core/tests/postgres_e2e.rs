//! End-to-end tests against a live PostgreSQL server.
//!
//! The two "databases" are two throwaway schemas (`src_<uuid>` and
//! `dst_<uuid>`) on the same server, dropped again at the end of each test.
//!
//! Tests skip gracefully unless `DBSYNC_TEST_PG_HOST` is set. Optional:
//! `DBSYNC_TEST_PG_PORT`, `DBSYNC_TEST_PG_USER`, `DBSYNC_TEST_PG_PASSWORD`,
//! `DBSYNC_TEST_PG_DATABASE`.

use std::sync::Arc;
use std::time::Duration;

use tokio_postgres::{Client, NoTls};

use dbsync_core::config::{EndpointConfig, SyncConfig};
use dbsync_core::db::PgConnector;
use dbsync_core::report::TableStatus;
use dbsync_core::{SyncDirection, SyncEngine};

// ===========================================================================
// Helpers
// ===========================================================================

#[derive(Clone)]
struct PgSettings {
    host: String,
    port: u16,
    user: String,
    password: String,
    database: String,
}

fn pg_settings() -> Option<PgSettings> {
    let host = std::env::var("DBSYNC_TEST_PG_HOST").ok()?;
    let var = |name: &str, default: &str| std::env::var(name).unwrap_or_else(|_| default.into());
    Some(PgSettings {
        host,
        port: var("DBSYNC_TEST_PG_PORT", "5432").parse().unwrap_or(5432),
        user: var("DBSYNC_TEST_PG_USER", "postgres"),
        password: var("DBSYNC_TEST_PG_PASSWORD", ""),
        database: var("DBSYNC_TEST_PG_DATABASE", "postgres"),
    })
}

/// Two schemas on the test server plus an admin client to seed and inspect
/// them. Call [`Sandbox::drop_schemas`] at the end of the test.
struct Sandbox {
    settings: PgSettings,
    client: Client,
    src: String,
    dst: String,
}

impl Sandbox {
    async fn new(settings: PgSettings) -> Self {
        let conn_str = format!(
            "host={} port={} user={} password={} dbname={}",
            settings.host, settings.port, settings.user, settings.password, settings.database
        );
        let (client, connection) = tokio_postgres::connect(&conn_str, NoTls)
            .await
            .expect("failed to connect to test server");
        tokio::spawn(async move {
            let _ = connection.await;
        });

        let id = uuid::Uuid::new_v4().simple().to_string();
        let sandbox = Self {
            settings,
            client,
            src: format!("src_{id}"),
            dst: format!("dst_{id}"),
        };
        sandbox
            .exec(&format!(
                "CREATE SCHEMA \"{}\"; CREATE SCHEMA \"{}\";",
                sandbox.src, sandbox.dst
            ))
            .await;
        sandbox
    }

    fn endpoint(&self, schema: &str) -> EndpointConfig {
        let mut ep = SyncConfig::default().local;
        ep.host = self.settings.host.clone();
        ep.port = self.settings.port;
        ep.user = self.settings.user.clone();
        ep.password = Some(self.settings.password.clone());
        ep.database = self.settings.database.clone();
        ep.require_tls = false;
        ep.schema = schema.to_string();
        ep
    }

    fn engine(&self) -> SyncEngine {
        let mut config = SyncConfig::default();
        config.local = self.endpoint(&self.src);
        config.remote = self.endpoint(&self.dst);
        let connector = PgConnector::new(Duration::from_secs(10), Duration::from_secs(30));
        SyncEngine::new(config, Arc::new(connector))
    }

    async fn exec(&self, sql: &str) {
        self.client.batch_execute(sql).await.expect(sql);
    }

    async fn names(&self, schema: &str, table: &str) -> Vec<(i32, String)> {
        let sql = format!("SELECT id, name FROM \"{schema}\".\"{table}\" ORDER BY id");
        self.client
            .query(&sql, &[])
            .await
            .expect(&sql)
            .iter()
            .map(|r| (r.get(0), r.get(1)))
            .collect()
    }

    async fn drop_schemas(self) {
        self.exec(&format!(
            "DROP SCHEMA \"{}\" CASCADE; DROP SCHEMA \"{}\" CASCADE;",
            self.src, self.dst
        ))
        .await;
    }
}

macro_rules! sandbox_or_skip {
    () => {
        match pg_settings() {
            Some(settings) => Sandbox::new(settings).await,
            None => {
                eprintln!("SKIPPED: DBSYNC_TEST_PG_HOST not set");
                return;
            }
        }
    };
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn test_pg_creates_table_and_continues_sequence() {
    let sb = sandbox_or_skip!();
    let src = &sb.src;
    sb.exec(&format!(
        "CREATE TABLE \"{src}\".tags (id serial PRIMARY KEY, name varchar(20) NOT NULL);
         INSERT INTO \"{src}\".tags (name) VALUES ('x'), ('y');"
    ))
    .await;

    let report = sb.engine().run(SyncDirection::LocalToRemote).await;

    assert!(report.is_success(), "{}", report.status_line());
    assert!(report.tables[0].created);
    assert_eq!(
        sb.names(&sb.dst, "tags").await,
        vec![(1, "x".to_string()), (2, "y".to_string())]
    );

    let dst = &sb.dst;
    let next: i32 = sb
        .client
        .query_one(
            &format!("INSERT INTO \"{dst}\".tags (name) VALUES ('new') RETURNING id"),
            &[],
        )
        .await
        .unwrap()
        .get(0);
    assert_eq!(next, 3);

    sb.drop_schemas().await;
}

#[tokio::test]
async fn test_pg_smart_sync() {
    let sb = sandbox_or_skip!();
    let (src, dst) = (sb.src.clone(), sb.dst.clone());
    sb.exec(&format!(
        "CREATE TABLE \"{src}\".tags (id serial PRIMARY KEY, name text);
         CREATE TABLE \"{dst}\".tags (id serial PRIMARY KEY, name text);
         INSERT INTO \"{src}\".tags (id, name) VALUES (1, 'x2'), (2, 'y');
         INSERT INTO \"{dst}\".tags (id, name) VALUES (1, 'x'), (2, 'y'), (5, 'z');"
    ))
    .await;

    let report = sb.engine().run(SyncDirection::SmartSync).await;

    assert!(report.is_success(), "{}", report.status_line());
    let expected = vec![
        (1, "x2".to_string()),
        (2, "y".to_string()),
        (5, "z".to_string()),
    ];
    assert_eq!(sb.names(&src, "tags").await, expected);
    assert_eq!(sb.names(&dst, "tags").await, expected);

    sb.drop_schemas().await;
}

#[tokio::test]
async fn test_pg_row_error_and_parent_order() {
    let sb = sandbox_or_skip!();
    let (src, dst) = (sb.src.clone(), sb.dst.clone());
    sb.exec(&format!(
        "CREATE TABLE \"{src}\".z_tags (id integer PRIMARY KEY, name varchar(50));
         CREATE TABLE \"{src}\".a_notes (id integer PRIMARY KEY,
             tag_id integer NOT NULL REFERENCES \"{src}\".z_tags (id), name varchar(50));
         CREATE TABLE \"{dst}\".z_tags (id integer PRIMARY KEY, name varchar(50));
         CREATE TABLE \"{dst}\".a_notes (id integer PRIMARY KEY,
             tag_id integer NOT NULL REFERENCES \"{dst}\".z_tags (id), name varchar(3));
         INSERT INTO \"{src}\".z_tags VALUES (1, 'a'), (2, 'b');
         INSERT INTO \"{src}\".a_notes VALUES (10, 1, 'ok'), (11, 2, 'far too long'), (12, 2, 'abc');"
    ))
    .await;

    let report = sb.engine().run(SyncDirection::LocalToRemote).await;

    let notes = report.tables.iter().find(|t| t.table == "a_notes").unwrap();
    assert_eq!(notes.status, TableStatus::CompletedWithErrors);
    assert_eq!((notes.rows_written, notes.row_errors), (2, 1));
    assert_eq!(notes.row_failures[0].key, "[11]");
    assert!(report.is_success());
    assert_eq!(report.tables[0].table, "z_tags");

    sb.drop_schemas().await;
}

#[tokio::test]
async fn test_pg_unreachable_remote() {
    let Some(settings) = pg_settings() else {
        eprintln!("SKIPPED: DBSYNC_TEST_PG_HOST not set");
        return;
    };
    let sb = Sandbox::new(settings).await;
    let mut config = SyncConfig::default();
    config.local = sb.endpoint(&sb.src);
    config.remote = sb.endpoint(&sb.dst);
    config.remote.port = 1;

    let connector = PgConnector::new(Duration::from_secs(2), Duration::from_secs(5));
    let report = SyncEngine::new(config, Arc::new(connector))
        .run(SyncDirection::LocalToRemote)
        .await;

    assert_eq!(report.tables_attempted(), 0);
    assert_eq!(report.connection_errors.len(), 1);
    assert!(!report.is_success());

    sb.drop_schemas().await;
}
