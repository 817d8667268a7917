//! Source side of a sync: run a read query and stream its rows.
//!
//! A [`SourceReader`] executes a query and hands back a [`QueryResult`]: the
//! column descriptors, available before any row is consumed, plus a
//! forward-only stream of decoded rows. Dropping the stream releases the
//! underlying cursor, so callers may stop early on any path.

mod sqlite;

pub use sqlite::SqliteReader;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::core::schema::ColumnDescriptor;
use crate::core::value::Row;
use crate::error::Result;

/// Lazily produced rows of a query result.
pub type RowStream<'a> = BoxStream<'a, Result<Row>>;

/// An executed query: column metadata plus a single-pass row stream.
pub struct QueryResult<'a> {
    /// One descriptor per result column, in result order.
    pub columns: Vec<ColumnDescriptor>,

    /// Rows in the order the source produced them.
    pub rows: RowStream<'a>,
}

impl std::fmt::Debug for QueryResult<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

/// Run read queries against a source database.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Execute `query` and return its columns and row stream.
    ///
    /// Each column's `source_type` is its declared type name as written in
    /// the source schema, or empty when the column has none (expressions).
    ///
    /// Fails with `SyncError::Query` if the query cannot be planned or
    /// executed. Row-level decode failures surface from the stream as
    /// `SyncError::Scan`.
    async fn open<'a>(&'a self, query: &'a str) -> Result<QueryResult<'a>>;

    /// Check that the source is reachable.
    async fn health_check(&self) -> Result<()>;

    /// Get the database type identifier.
    fn db_type(&self) -> &str;

    /// Close all connections.
    async fn close(&self);
}
