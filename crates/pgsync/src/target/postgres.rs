//! PostgreSQL target writer.
//!
//! Uses deadpool-postgres for connection pooling and the COPY protocol for
//! bulk loads. Transactions are driven with plain `BEGIN`/`COMMIT`/`ROLLBACK`
//! statements on a pooled connection, so the connection can be owned by the
//! transaction object rather than borrowed from a `Client`.

use std::marker::PhantomData;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::SinkExt;
use tokio_postgres::CopyInSink;
use tracing::{debug, info, warn};

use super::copy::CopyEncoder;
use super::tls::TlsBuilder;
use super::{BulkLoader, TargetTransaction, TargetWriter};
use crate::config::{IsolationLevel, SyncConfig, TargetConfig};
use crate::core::identifier::quote_pg;
use crate::core::schema::ColumnDescriptor;
use crate::core::value::SqlValue;
use crate::error::{Result, SyncError};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgreSQL target writer implementation.
pub struct PgWriter {
    pool: Pool,
    isolation: IsolationLevel,
    encoder: CopyEncoder,
    flush_rows: usize,
}

impl PgWriter {
    /// Connect to PostgreSQL from configuration.
    pub async fn new(config: &TargetConfig, sync: &SyncConfig) -> Result<Self> {
        let mut pg_config = config.pg_config();
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = match TlsBuilder::parse(&config.ssl_mode)?.build()? {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
            }
        };

        let pool = Pool::builder(mgr)
            .max_size(config.max_connections as usize)
            .build()
            .map_err(|e| SyncError::pool(e, "creating PostgreSQL target pool"))?;

        let writer = Self::from_pool(pool, sync);
        writer.health_check().await?;

        info!(
            "Connected to PostgreSQL target: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(writer)
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: Pool, sync: &SyncConfig) -> Self {
        Self {
            pool,
            isolation: sync.isolation,
            encoder: CopyEncoder::new(sync.copy_format),
            flush_rows: sync.copy_buffer_rows.max(1),
        }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl TargetWriter for PgWriter {
    async fn begin(&self) -> Result<Box<dyn TargetTransaction>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "getting PostgreSQL connection"))?;

        let mut tx = PgTransaction {
            client: Some(client),
            encoder: self.encoder,
            flush_rows: self.flush_rows,
        };
        tx.execute(self.isolation.begin_statement()).await?;
        debug!("Began transaction: {:?}", self.isolation);

        Ok(Box::new(tx))
    }

    async fn health_check(&self) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "testing PostgreSQL target connection"))?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "postgres"
    }

    async fn close(&self) {
        self.pool.close();
    }
}

/// A transaction holding one pooled connection.
///
/// If dropped while still open, the connection is detached from the pool and
/// closed, which makes the server abort the transaction.
pub struct PgTransaction {
    client: Option<Object>,
    encoder: CopyEncoder,
    flush_rows: usize,
}

impl PgTransaction {
    fn client(&self) -> Result<&Object> {
        self.client.as_ref().ok_or_else(|| {
            SyncError::pool("transaction already finished", "using PostgreSQL transaction")
        })
    }

    /// Run `statement` to end the transaction.
    ///
    /// A connection whose transaction may not have ended cleanly never goes
    /// back to the pool.
    async fn end(mut self: Box<Self>, statement: &str) -> Result<()> {
        let Some(client) = self.client.take() else {
            return Err(SyncError::pool(
                "transaction already finished",
                "ending PostgreSQL transaction",
            ));
        };

        match client.batch_execute(statement).await {
            Ok(()) => Ok(()),
            Err(e) => {
                drop(Object::take(client));
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl TargetTransaction for PgTransaction {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        debug!("Executing: {}", sql);
        self.client()?.batch_execute(sql).await?;
        Ok(())
    }

    async fn copy_in<'a>(
        &'a mut self,
        table: &str,
        columns: &[ColumnDescriptor],
    ) -> Result<Box<dyn BulkLoader + 'a>> {
        let col_list = columns
            .iter()
            .map(|c| quote_pg(&c.name))
            .collect::<Result<Vec<_>>>()?;
        let copy_sql = format!(
            "COPY {} ({}) FROM STDIN WITH ({})",
            table,
            col_list.join(", "),
            self.encoder.options()
        );
        debug!("Starting bulk load: {}", copy_sql);

        let sink = self
            .client()?
            .copy_in::<_, Bytes>(copy_sql.as_str())
            .await
            .map_err(|e| load_error(table, "COPY init", e))?;

        let mut buf = BytesMut::with_capacity(64 * 1024);
        self.encoder.write_header(&mut buf);

        Ok(Box::new(PgBulkLoader {
            sink: Box::pin(sink),
            encoder: self.encoder,
            buf,
            buffered_rows: 0,
            flush_rows: self.flush_rows,
            table: table.to_string(),
            _tx: PhantomData,
        }))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.end("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.end("ROLLBACK").await
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            warn!("Transaction dropped while open; closing its connection");
            drop(Object::take(client));
        }
    }
}

/// A COPY in progress on a [`PgTransaction`].
///
/// Rows are encoded into a buffer and sent every `copy_buffer_rows` rows.
/// Dropping the loader before [`finish`](BulkLoader::finish) makes the
/// server fail the COPY.
pub struct PgBulkLoader<'a> {
    sink: Pin<Box<CopyInSink<Bytes>>>,
    encoder: CopyEncoder,
    buf: BytesMut,
    buffered_rows: usize,
    flush_rows: usize,
    table: String,
    _tx: PhantomData<&'a mut PgTransaction>,
}

impl<'a> PgBulkLoader<'a> {
    async fn flush(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split().freeze();
        self.sink
            .send(chunk)
            .await
            .map_err(|e| load_error(&self.table, "COPY send", e))?;
        self.buffered_rows = 0;
        Ok(())
    }
}

#[async_trait]
impl<'a> BulkLoader for PgBulkLoader<'a> {
    async fn send(&mut self, row: &[SqlValue]) -> Result<()> {
        self.encoder.write_row(&mut self.buf, row);
        self.buffered_rows += 1;
        if self.buffered_rows >= self.flush_rows {
            self.flush().await?;
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<u64> {
        self.encoder.write_trailer(&mut self.buf);
        self.flush().await?;
        let rows = self
            .sink
            .as_mut()
            .finish()
            .await
            .map_err(|e| load_error(&self.table, "COPY finish", e))?;
        debug!("Bulk load into {} complete: {} rows", self.table, rows);
        Ok(rows)
    }
}

fn load_error(table: &str, context: &str, e: tokio_postgres::Error) -> SyncError {
    SyncError::Load {
        table: table.to_string(),
        message: format!("{}: {}", context, SyncError::from(e).chain_message()),
    }
}
