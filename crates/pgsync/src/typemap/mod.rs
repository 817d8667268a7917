//! Type mapping and DDL rendering for the staging table.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::identifier::{qualify_pg, quote_pg};
use crate::core::schema::{ColumnDescriptor, TableNames};
use crate::error::{Result, SyncError};

/// Destination column types the translator can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PgType {
    Text,
    Integer,
    TimestampTz,
    Boolean,
}

impl PgType {
    /// Type name as written in PostgreSQL DDL.
    pub fn as_sql(&self) -> &'static str {
        match self {
            PgType::Text => "text",
            PgType::Integer => "integer",
            PgType::TimestampTz => "timestamp with time zone",
            PgType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for PgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Map a SQLite declared type name to a PostgreSQL column type.
///
/// Expressions have no type affinity in SQLite unless explicitly cast, so
/// anything unrecognized (including an empty name) becomes `text`.
pub fn source_to_postgres(source_type: &str) -> PgType {
    match source_type.trim().to_ascii_uppercase().as_str() {
        "TEXT" => PgType::Text,
        "INT" | "INTEGER" => PgType::Integer,
        "DATETIME" => PgType::TimestampTz,
        "BOOLEAN" => PgType::Boolean,
        _ => PgType::Text,
    }
}

/// Render the `CREATE TABLE` statement for `schema.table` with one column
/// per descriptor, in descriptor order.
///
/// Column names longer than PostgreSQL's 63-byte identifier limit are a
/// `SchemaError`, not truncated: SQLite names an unaliased expression
/// column after its text, so long expressions need an alias.
pub fn render_create_table(
    schema: &str,
    table: &str,
    columns: &[ColumnDescriptor],
) -> Result<String> {
    let schema_err = |message: String| SyncError::Schema {
        table: table.to_string(),
        message,
    };

    if columns.is_empty() {
        return Err(schema_err("result set has no columns".to_string()));
    }

    let mut seen = HashSet::with_capacity(columns.len());
    let mut col_defs = Vec::with_capacity(columns.len());
    for col in columns {
        if !seen.insert(col.name.as_str()) {
            return Err(schema_err(format!(
                "column {:?} appears more than once in the result set",
                col.name
            )));
        }
        let quoted = quote_pg(&col.name).map_err(|e| schema_err(e.to_string()))?;
        col_defs.push(format!("{} {}", quoted, col.target_type()));
    }

    let qualified = qualify_pg(schema, table).map_err(|e| schema_err(e.to_string()))?;

    Ok(format!(
        "CREATE TABLE {} (\n    {}\n)",
        qualified,
        col_defs.join(",\n    ")
    ))
}

/// Render the statement batch that promotes staging over live.
///
/// The first and last statements tolerate a missing table, so a first-ever
/// sync needs no special casing. Renaming staging must succeed.
pub fn render_swap(names: &TableNames) -> Result<String> {
    let to_schema_err = |e: SyncError| SyncError::Schema {
        table: names.live.clone(),
        message: e.to_string(),
    };

    let live = names.qualified_live().map_err(to_schema_err)?;
    let staging = names.qualified_staging().map_err(to_schema_err)?;
    let retiring = names.qualified_retiring().map_err(to_schema_err)?;
    let live_bare = names.quoted_live().map_err(to_schema_err)?;
    let retiring_bare = names.quoted_retiring().map_err(to_schema_err)?;

    Ok(format!(
        "ALTER TABLE IF EXISTS {live} RENAME TO {retiring_bare};\n\
         ALTER TABLE {staging} RENAME TO {live_bare};\n\
         DROP TABLE IF EXISTS {retiring};"
    ))
}
