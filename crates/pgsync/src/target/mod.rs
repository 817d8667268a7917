//! Destination side of a sync: transactions, DDL and bulk loading.
//!
//! Everything a sync does to the destination happens inside one
//! [`TargetTransaction`]. A transaction that is dropped without
//! [`commit`](TargetTransaction::commit) or
//! [`rollback`](TargetTransaction::rollback) must still leave no trace, so
//! implementations abandon the underlying session in that case.

mod copy;
mod postgres;
pub mod tls;

pub use copy::CopyEncoder;
pub use postgres::{PgBulkLoader, PgTransaction, PgWriter};

use async_trait::async_trait;

use crate::core::schema::ColumnDescriptor;
use crate::core::value::SqlValue;
use crate::error::Result;

/// Opens transactions on a destination database.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Begin a transaction at the configured isolation level.
    async fn begin(&self) -> Result<Box<dyn TargetTransaction>>;

    /// Check that the destination is reachable.
    async fn health_check(&self) -> Result<()>;

    /// Get the database type identifier.
    fn db_type(&self) -> &str;

    /// Close all connections.
    async fn close(&self);
}

/// An open destination transaction.
#[async_trait]
pub trait TargetTransaction: Send {
    /// Execute one or more `;`-separated statements.
    async fn execute(&mut self, sql: &str) -> Result<()>;

    /// Start a bulk load into `table` (already quoted and schema-qualified),
    /// with one field per column, in column order.
    ///
    /// The loader borrows the transaction: no other statement can run until
    /// it is finished or dropped. Dropping it unfinished aborts the load.
    async fn copy_in<'a>(
        &'a mut self,
        table: &str,
        columns: &[ColumnDescriptor],
    ) -> Result<Box<dyn BulkLoader + 'a>>;

    /// Commit, making every change visible at once.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Roll back, discarding every change.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Streams rows into a table opened by [`TargetTransaction::copy_in`].
#[async_trait]
pub trait BulkLoader: Send {
    /// Append one row. Rows may be buffered until the next flush.
    async fn send(&mut self, row: &[SqlValue]) -> Result<()>;

    /// Flush buffered rows and complete the load, returning the row count.
    async fn finish(self: Box<Self>) -> Result<u64>;
}
