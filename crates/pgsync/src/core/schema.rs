//! Result-set metadata and sync request types.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::typemap::{source_to_postgres, PgType};

use super::identifier::{qualify_pg, quote_pg, validate_identifier};

/// Suffix of the staging table that receives the new data.
pub const STAGING_SUFFIX: &str = "_temp";

/// Suffix the previous live table is renamed to before it is dropped.
pub const RETIRING_SUFFIX: &str = "_drop";

/// One column of a source result set.
///
/// Column order is significant: it defines destination column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name as reported by the source engine.
    pub name: String,

    /// Declared or inferred source type name (may be empty for untyped expressions).
    pub source_type: String,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type: source_type.into(),
        }
    }

    /// Destination column type for this column.
    pub fn target_type(&self) -> PgType {
        source_to_postgres(&self.source_type)
    }
}

/// A single unit of work: one query, one atomic table replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Live destination table name (unqualified).
    pub table: String,

    /// Read query executed against the source.
    pub query: String,
}

impl SyncRequest {
    pub fn new(table: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            query: query.into(),
        }
    }
}

/// Live, staging and retiring names derived from a destination table name.
///
/// These only exist for the duration of one destination transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub schema: String,
    pub live: String,
    pub staging: String,
    pub retiring: String,
}

impl TableNames {
    /// Derive the names for `table` in `schema`.
    ///
    /// Fails if any derived name is not a valid PostgreSQL identifier, which
    /// includes live names too long to carry the staging/retiring suffix.
    pub fn new(schema: &str, table: &str) -> Result<Self> {
        let names = Self {
            schema: schema.to_string(),
            live: table.to_string(),
            staging: format!("{}{}", table, STAGING_SUFFIX),
            retiring: format!("{}{}", table, RETIRING_SUFFIX),
        };

        validate_identifier(&names.schema)?;
        validate_identifier(&names.live)?;
        validate_identifier(&names.staging)?;
        validate_identifier(&names.retiring)?;

        Ok(names)
    }

    /// Schema-qualified, quoted live table.
    pub fn qualified_live(&self) -> Result<String> {
        qualify_pg(&self.schema, &self.live)
    }

    /// Schema-qualified, quoted staging table.
    pub fn qualified_staging(&self) -> Result<String> {
        qualify_pg(&self.schema, &self.staging)
    }

    /// Schema-qualified, quoted retiring table.
    pub fn qualified_retiring(&self) -> Result<String> {
        qualify_pg(&self.schema, &self.retiring)
    }

    /// Quoted, unqualified live name (the form `RENAME TO` requires).
    pub fn quoted_live(&self) -> Result<String> {
        quote_pg(&self.live)
    }

    /// Quoted, unqualified retiring name.
    pub fn quoted_retiring(&self) -> Result<String> {
        quote_pg(&self.retiring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identifier::MAX_IDENTIFIER_LENGTH;

    #[test]
    fn test_table_names_derivation() {
        let names = TableNames::new("public", "people").unwrap();
        assert_eq!(names.live, "people");
        assert_eq!(names.staging, "people_temp");
        assert_eq!(names.retiring, "people_drop");
        assert_eq!(
            names.qualified_staging().unwrap(),
            "\"public\".\"people_temp\""
        );
        assert_eq!(names.quoted_live().unwrap(), "\"people\"");
    }

    #[test]
    fn test_table_names_reject_names_without_room_for_suffix() {
        let table = "t".repeat(MAX_IDENTIFIER_LENGTH - STAGING_SUFFIX.len() + 1);
        assert!(TableNames::new("public", &table).is_err());

        let table = "t".repeat(MAX_IDENTIFIER_LENGTH - STAGING_SUFFIX.len());
        assert!(TableNames::new("public", &table).is_ok());
    }

    #[test]
    fn test_table_names_reject_empty() {
        assert!(TableNames::new("public", "").is_err());
        assert!(TableNames::new("", "people").is_err());
    }

    #[test]
    fn test_column_target_type() {
        assert_eq!(ColumnDescriptor::new("id", "INTEGER").target_type(), PgType::Integer);
        assert_eq!(ColumnDescriptor::new("x", "").target_type(), PgType::Text);
    }
}
