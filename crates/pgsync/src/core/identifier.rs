//! Identifier validation and quoting for dynamically built PostgreSQL statements.
//!
//! Table and column names cannot be bound as statement parameters, so every
//! identifier that reaches a DDL or COPY statement goes through [`quote_pg`].

use crate::error::{Result, SyncError};

/// PostgreSQL truncates identifiers longer than this many bytes.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate an identifier.
///
/// Rejects empty identifiers, identifiers containing null bytes, and
/// identifiers PostgreSQL would silently truncate.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SyncError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(SyncError::Config(format!(
            "Identifier contains null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(SyncError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
///
/// ```
/// use pgsync::core::identifier::quote_pg;
///
/// assert_eq!(quote_pg("users").unwrap(), "\"users\"");
/// assert_eq!(quote_pg("Order").unwrap(), "\"Order\"");
/// assert_eq!(quote_pg("a\"b").unwrap(), "\"a\"\"b\"");
/// ```
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a PostgreSQL table name with schema.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(table)?))
}
