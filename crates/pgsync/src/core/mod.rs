//! Core types shared by the reader, translator and orchestrator.
//!
//! - [`schema`]: column descriptors, sync requests and derived table names
//! - [`value`]: row values and their coercion to destination column types
//! - [`identifier`]: identifier validation and quoting

pub mod identifier;
pub mod schema;
pub mod value;

pub use identifier::{qualify_pg, quote_pg, validate_identifier};
pub use schema::{ColumnDescriptor, SyncRequest, TableNames};
pub use value::{coerce, coerce_row, Row, SqlValue};
