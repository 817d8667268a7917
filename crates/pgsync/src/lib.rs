//! # pgsync
//!
//! Mirror the result of a SQLite query into a PostgreSQL table.
//!
//! Each sync replaces the destination table's contents atomically:
//!
//! - **Staging load** using the PostgreSQL COPY protocol (binary or text)
//! - **Atomic swap** by renaming staging over live inside one transaction
//! - **Type mapping** from SQLite declared types to PostgreSQL column types
//! - **Cancellation** via a shared token, always resolving to rollback
//!
//! ## Example
//!
//! ```rust,no_run
//! use pgsync::{Config, SyncEngine, SyncRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> pgsync::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let engine = SyncEngine::connect(&config).await?;
//!     let cancel = CancellationToken::new();
//!
//!     let request = SyncRequest::new("commits", "SELECT * FROM commits");
//!     let result = engine.sync(&cancel, &request).await?;
//!     println!("Loaded {} rows into {}", result.rows_loaded, result.table);
//!
//!     engine.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod source;
pub mod sync;
pub mod target;
pub mod typemap;

// Re-exports for convenient access
pub use config::{Config, CopyFormat, IsolationLevel, SourceConfig, SyncConfig, TargetConfig};
pub use core::{ColumnDescriptor, Row, SqlValue, SyncRequest, TableNames};
pub use error::{Result, SyncError};
pub use source::{QueryResult, SourceReader, SqliteReader};
pub use sync::{HealthCheckResult, SyncEngine, SyncPlan, SyncResult, SyncStage};
pub use target::{BulkLoader, PgWriter, TargetTransaction, TargetWriter};
pub use typemap::PgType;
