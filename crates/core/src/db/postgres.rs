//! PostgreSQL backend built on `tokio-postgres`.
//!
//! Each [`PgConnection`] owns one client plus the spawned task that drives
//! its socket. The task is aborted when the connection is dropped, so a
//! connection is released on every exit path including panics.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use postgres_native_tls::MakeTlsConnector;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tracing::{debug, info, warn};

use crate::connection::{Connection, Connector};
use crate::db::ddl;
use crate::errors::{ConnectionError, DbError};
use crate::models::{Column, Endpoint, ForeignKey, RowKey, RowRecord, RowWrite, TableDescriptor};

/// Opens [`PgConnection`]s with the configured timeouts.
#[derive(Debug, Clone)]
pub struct PgConnector {
    connect_timeout: Duration,
    statement_timeout: Duration,
}

impl PgConnector {
    pub fn new(connect_timeout: Duration, statement_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            statement_timeout,
        }
    }

    fn pg_config(endpoint: &Endpoint, connect_timeout: Duration) -> PgConfig {
        let mut config = PgConfig::new();
        config
            .host(&endpoint.host)
            .port(endpoint.port)
            .dbname(&endpoint.database)
            .user(&endpoint.user)
            .password(&endpoint.password)
            .application_name("dbsync")
            .connect_timeout(connect_timeout);
        config
    }

    fn tls_connector(endpoint: &Endpoint) -> Result<MakeTlsConnector, ConnectionError> {
        let mut builder = native_tls::TlsConnector::builder();
        if endpoint.accept_invalid_certs {
            warn!(endpoint = %endpoint, "TLS certificate verification disabled");
            builder.danger_accept_invalid_certs(true);
        }
        let connector = builder.build().map_err(|e| ConnectionError::Tls {
            endpoint: endpoint.to_string(),
            detail: e.to_string(),
        })?;
        Ok(MakeTlsConnector::new(connector))
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<PgConnection, ConnectionError> {
        let mut config = Self::pg_config(endpoint, self.connect_timeout);
        let unreachable = |e: tokio_postgres::Error| ConnectionError::Unreachable {
            endpoint: endpoint.to_string(),
            detail: e.to_string(),
        };

        let (client, driver) = if endpoint.require_tls {
            config.ssl_mode(tokio_postgres::config::SslMode::Require);
            let tls = Self::tls_connector(endpoint)?;
            let (client, connection) = config.connect(tls).await.map_err(unreachable)?;
            let name = endpoint.name.clone();
            let driver = tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!(endpoint = %name, error = %e, "connection closed with error");
                }
            });
            (client, driver)
        } else {
            warn!(endpoint = %endpoint, "TLS is not required; credentials travel in plaintext");
            let (client, connection) = config.connect(NoTls).await.map_err(unreachable)?;
            let name = endpoint.name.clone();
            let driver = tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!(endpoint = %name, error = %e, "connection closed with error");
                }
            });
            (client, driver)
        };

        Ok(PgConnection {
            endpoint: endpoint.clone(),
            client,
            driver,
            statement_timeout: self.statement_timeout,
        })
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, ConnectionError> {
        let mut conn = match tokio::time::timeout(self.connect_timeout, self.connect(endpoint)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(ConnectionError::Timeout {
                    endpoint: endpoint.to_string(),
                    secs: self.connect_timeout.as_secs(),
                })
            }
        };

        conn.ping()
            .await
            .map_err(|e| ConnectionError::LivenessFailed {
                endpoint: endpoint.to_string(),
                detail: e.to_string(),
            })?;

        info!(endpoint = %endpoint, tls = endpoint.require_tls, "connected");
        Ok(Box::new(conn))
    }
}

/// A live PostgreSQL session.
pub struct PgConnection {
    endpoint: Endpoint,
    client: Client,
    driver: JoinHandle<()>,
    statement_timeout: Duration,
}

/// Run one round-trip under the statement timeout.
async fn timed<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T, DbError>
where
    F: Future<Output = Result<T, tokio_postgres::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(DbError::from_postgres(operation, e)),
        Err(_) => Err(DbError::Timeout {
            operation: operation.to_string(),
            secs: limit.as_secs(),
        }),
    }
}

impl PgConnection {
    fn schema(&self) -> &str {
        &self.endpoint.schema
    }

    fn decode_error(operation: &str, e: serde_json::Error) -> DbError {
        DbError::Statement {
            operation: operation.to_string(),
            detail: format!("cannot decode row: {e}"),
        }
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl Connection for PgConnection {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn ping(&mut self) -> Result<(), DbError> {
        timed(
            self.statement_timeout,
            "ping",
            self.client.simple_query("SELECT 1"),
        )
        .await?;
        Ok(())
    }

    async fn list_tables(&mut self) -> Result<Vec<String>, DbError> {
        let rows = timed(
            self.statement_timeout,
            "list tables",
            self.client.query(
                "SELECT table_name::text FROM information_schema.tables \
                 WHERE table_schema = $1::text AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
                &[&self.endpoint.schema],
            ),
        )
        .await?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool, DbError> {
        let row = timed(
            self.statement_timeout,
            "check table",
            self.client.query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = $1::text AND table_name = $2::text)",
                &[&self.endpoint.schema, &table],
            ),
        )
        .await?;
        Ok(row.get(0))
    }

    async fn columns(&mut self, table: &str) -> Result<Vec<Column>, DbError> {
        let rows = timed(
            self.statement_timeout,
            "describe columns",
            self.client.query(
                "SELECT column_name::text, data_type::text, udt_name::text, \
                        is_nullable = 'YES', column_default::text, \
                        character_maximum_length::int4, numeric_precision::int4, \
                        numeric_scale::int4 \
                 FROM information_schema.columns \
                 WHERE table_schema = $1::text AND table_name = $2::text \
                 ORDER BY ordinal_position",
                &[&self.endpoint.schema, &table],
            ),
        )
        .await?;

        Ok(rows
            .iter()
            .map(|r| {
                let data_type: String = r.get(1);
                // Only numeric carries a declared precision worth replicating.
                let is_numeric = data_type == "numeric";
                Column {
                    name: r.get(0),
                    data_type,
                    udt_name: r.get(2),
                    nullable: r.get(3),
                    default: r.get(4),
                    max_length: r.get(5),
                    numeric_precision: if is_numeric { r.get(6) } else { None },
                    numeric_scale: if is_numeric { r.get(7) } else { None },
                }
            })
            .collect())
    }

    async fn primary_key(&mut self, table: &str) -> Result<Vec<String>, DbError> {
        let rows = timed(
            self.statement_timeout,
            "read primary key",
            self.client.query(
                "SELECT kcu.column_name::text \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name \
                  AND tc.table_schema = kcu.table_schema \
                  AND tc.table_name = kcu.table_name \
                 WHERE tc.table_schema = $1::text AND tc.table_name = $2::text \
                   AND tc.constraint_type = 'PRIMARY KEY' \
                 ORDER BY kcu.ordinal_position",
                &[&self.endpoint.schema, &table],
            ),
        )
        .await?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKey>, DbError> {
        let rows = timed(
            self.statement_timeout,
            "read foreign keys",
            self.client.query(
                "SELECT a.attname::text, pc.relname::text \
                 FROM pg_constraint c \
                 JOIN pg_class cc ON cc.oid = c.conrelid \
                 JOIN pg_namespace n ON n.oid = cc.relnamespace \
                 JOIN pg_class pc ON pc.oid = c.confrelid \
                 JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = ANY (c.conkey) \
                 WHERE c.contype = 'f' AND n.nspname = $1::text AND cc.relname = $2::text \
                 ORDER BY a.attname",
                &[&self.endpoint.schema, &table],
            ),
        )
        .await?;
        Ok(rows
            .iter()
            .map(|r| ForeignKey {
                column: r.get(0),
                parent: r.get(1),
            })
            .collect())
    }

    async fn sequence_exists(&mut self, name: &str) -> Result<bool, DbError> {
        let row = timed(
            self.statement_timeout,
            "check sequence",
            self.client.query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.sequences \
                 WHERE sequence_schema = $1::text AND sequence_name = $2::text)",
                &[&self.endpoint.schema, &name],
            ),
        )
        .await?;
        Ok(row.get(0))
    }

    async fn serial_sequence(
        &mut self,
        table: &str,
        column: &str,
    ) -> Result<Option<String>, DbError> {
        let qualified = ddl::qualify(&self.endpoint.schema, table);
        let row = timed(
            self.statement_timeout,
            "probe sequence",
            self.client
                .query_one("SELECT pg_get_serial_sequence($1::text, $2::text)", &[&qualified, &column]),
        )
        .await?;
        let found: Option<String> = row.get(0);
        Ok(found.map(|s| ddl::bare_sequence_name(&s)))
    }

    async fn create_table(&mut self, table: &TableDescriptor) -> Result<(), DbError> {
        let statements = ddl::create_table_statements(&self.endpoint.schema, table);
        let limit = self.statement_timeout;

        let tx = timed(limit, "begin", self.client.transaction()).await?;
        for sql in &statements {
            debug!(table = %table.name, %sql, "executing DDL");
            timed(limit, "create table", tx.batch_execute(sql)).await?;
        }
        timed(limit, "commit", tx.commit()).await?;
        Ok(())
    }

    async fn align_sequence(&mut self, table: &TableDescriptor) -> Result<Option<i64>, DbError> {
        let Some(key) = table.single_key() else {
            return Ok(None);
        };
        // The destination may name its sequence differently from the source.
        let sequence = match self.serial_sequence(&table.name, key).await? {
            Some(seq) => seq,
            None => {
                let Some(seq) = table.sequence.clone() else {
                    return Ok(None);
                };
                if !self.sequence_exists(&seq).await? {
                    return Ok(None);
                }
                seq
            }
        };

        let sql = ddl::align_sequence(self.schema(), &table.name, key, &sequence);
        let rows = timed(
            self.statement_timeout,
            "align sequence",
            self.client.query(&sql, &[]),
        )
        .await?;
        Ok(rows.first().map(|r| r.get::<_, i64>(0)))
    }

    async fn read_rows(&mut self, table: &TableDescriptor) -> Result<Vec<RowRecord>, DbError> {
        let sql = ddl::select_rows(self.schema(), table);
        let rows = timed(
            self.statement_timeout,
            "read rows",
            self.client.query(&sql, &[]),
        )
        .await?;

        rows.iter()
            .map(|r| {
                let text: String = r.get(0);
                serde_json::from_str(&text)
                    .map(RowRecord::new)
                    .map_err(|e| Self::decode_error("read rows", e))
            })
            .collect()
    }

    async fn read_keys(
        &mut self,
        table: &str,
        key_columns: &[String],
    ) -> Result<HashSet<RowKey>, DbError> {
        let sql = ddl::select_keys(self.schema(), table, key_columns);
        let rows = timed(
            self.statement_timeout,
            "read keys",
            self.client.query(&sql, &[]),
        )
        .await?;

        rows.iter()
            .map(|r| {
                let text: String = r.get(0);
                RowKey::parse(&text).map_err(|e| Self::decode_error("read keys", e))
            })
            .collect()
    }

    async fn write_row(
        &mut self,
        table: &TableDescriptor,
        row: &RowRecord,
        write: RowWrite,
    ) -> Result<(), DbError> {
        let sql = ddl::write_row(self.schema(), table, write);
        let payload = row.to_json();
        timed(
            self.statement_timeout,
            "write row",
            self.client.execute(&sql, &[&payload]),
        )
        .await?;
        Ok(())
    }

    async fn close(self: Box<Self>) {
        debug!(endpoint = %self.endpoint, "closing connection");
        // Dropping the client ends the session; Drop aborts the driver task.
        drop(self);
    }
}
