//! SQLite source reader.
//!
//! Uses SQLx for connection pooling and streaming query execution. Column
//! metadata comes from preparing the query on a pooled connection and
//! reading each column's declared type, so virtual tables and table-valued
//! functions work and declared type names reach the type map unchanged.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use sqlx::sqlite::{
    LockedSqliteHandle, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row as _, TypeInfo, ValueRef};
use tracing::{debug, info};

use super::{QueryResult, SourceReader};
use crate::config::SourceConfig;
use crate::core::schema::ColumnDescriptor;
use crate::core::value::{Row, SqlValue};
use crate::error::{Result, SyncError};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// SQLite source reader implementation.
#[derive(Debug, Clone)]
pub struct SqliteReader {
    pool: SqlitePool,
}

impl SqliteReader {
    /// Open a SQLite source from configuration.
    pub async fn new(config: &SourceConfig) -> Result<Self> {
        // Every connection to ":memory:" is its own empty database.
        let (options, max_connections) = if config.path == ":memory:" {
            let options = SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| SyncError::pool(e, "parsing SQLite source options"))?;
            (options, 1)
        } else {
            let options = SqliteConnectOptions::new()
                .filename(&config.path)
                .read_only(config.read_only);
            (options, config.max_connections)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| SyncError::pool(e, "opening SQLite source"))?;

        let reader = Self::from_pool(pool);
        reader.health_check().await?;

        info!("Opened SQLite source: {}", config.path);
        Ok(reader)
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Prepare `query` without running it and read its result columns.
    async fn prepare_columns(&self, query: &str) -> Result<Vec<ColumnDescriptor>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| SyncError::pool(e, "acquiring SQLite connection"))?;
        let mut handle = conn
            .lock_handle()
            .await
            .map_err(|e| SyncError::pool(e, "locking SQLite connection"))?;
        let columns = declared_columns(&mut handle, query)?;
        Ok(columns)
    }
}

#[async_trait]
impl SourceReader for SqliteReader {
    async fn open<'a>(&'a self, query: &'a str) -> Result<QueryResult<'a>> {
        // Columns are known before the first row, even for empty results.
        let columns = self.prepare_columns(query).await?;

        debug!(
            "Prepared source query: {}",
            columns
                .iter()
                .map(|c| format!("{} {:?}", c.name, c.source_type))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut rows = sqlx::query(query).fetch(&self.pool);

        // Pull the first row now: execution errors must surface before the
        // caller starts writing to the destination.
        let first = rows
            .next()
            .await
            .transpose()
            .map_err(|e| SyncError::Query(e.to_string()))?;

        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let first = first.map(|row| decode_row(&row, &names));
        let rest = rows.map(move |res| match res {
            Ok(row) => decode_row(&row, &names),
            Err(e) => Err(SyncError::Query(e.to_string())),
        });

        Ok(QueryResult {
            columns,
            rows: stream::iter(first).chain(rest).boxed(),
        })
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SyncError::pool(e, "testing SQLite source connection"))?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "sqlite"
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Read the name and declared type of each result column of `query`.
///
/// The declared type is the text from the column definition, exactly as
/// written (`BIGINT`, `VARCHAR(20)`). Expression columns and columns of
/// virtual tables declared without a type get an empty type name.
fn declared_columns(
    handle: &mut LockedSqliteHandle<'_>,
    query: &str,
) -> Result<Vec<ColumnDescriptor>> {
    let query_err = |e: rusqlite::Error| SyncError::Query(e.to_string());

    // SAFETY: the handle stays locked while `conn` is alive, and a
    // connection built from a borrowed handle never closes it.
    let conn = unsafe { rusqlite::Connection::from_handle(handle.as_raw_handle().as_ptr()) }
        .map_err(query_err)?;
    let stmt = conn.prepare(query).map_err(query_err)?;

    let columns = stmt
        .columns()
        .iter()
        .map(|c| ColumnDescriptor::new(c.name(), c.decl_type().unwrap_or_default()))
        .collect();
    Ok(columns)
}

/// Decode a SQLite row by the storage class of each value.
///
/// SQLite types values, not columns, so a column declared INTEGER can still
/// hold text. Coercion to the destination type happens later.
fn decode_row(row: &SqliteRow, names: &[String]) -> Result<Row> {
    if row.len() != names.len() {
        return Err(SyncError::scan(
            "*",
            format!(
                "row has {} values but the query described {} columns",
                row.len(),
                names.len()
            ),
        ));
    }

    let mut values = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        let scan_err = |e: sqlx::Error| SyncError::scan(name.clone(), e.to_string());

        let raw = row.try_get_raw(i).map_err(scan_err)?;
        if raw.is_null() {
            values.push(SqlValue::Null);
            continue;
        }
        let storage = raw.type_info().name().to_string();

        let value = match storage.as_str() {
            "INTEGER" | "BOOLEAN" => SqlValue::I64(row.try_get_unchecked(i).map_err(scan_err)?),
            "REAL" => SqlValue::F64(row.try_get_unchecked(i).map_err(scan_err)?),
            "BLOB" => SqlValue::Bytes(row.try_get_unchecked(i).map_err(scan_err)?),
            _ => SqlValue::Text(row.try_get_unchecked(i).map_err(scan_err)?),
        };
        values.push(value);
    }

    Ok(values)
}
