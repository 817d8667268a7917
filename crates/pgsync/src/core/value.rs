//! Row values and their coercion to destination column types.
//!
//! Source readers decode each column into a [`SqlValue`] according to what
//! the source engine actually stored. Before a row is handed to the bulk
//! loader, [`coerce_row`] converts every value to the representation the
//! staging column expects, so the COPY encoders can match exhaustively on
//! the variant without guessing.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::{Result, SyncError};
use crate::typemap::PgType;

use super::schema::ColumnDescriptor;

/// SQL value enum for type-safe row handling.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
    TimestampTz(DateTime<Utc>),
}

/// One result-set row, ordered like the column descriptors.
pub type Row = Vec<SqlValue>;

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "boolean",
            SqlValue::I32(_) | SqlValue::I64(_) => "integer",
            SqlValue::F64(_) => "float",
            SqlValue::Text(_) => "text",
            SqlValue::Bytes(_) => "bytes",
            SqlValue::TimestampTz(_) => "timestamp",
        }
    }

    /// Render the value the way PostgreSQL's text input functions accept it.
    ///
    /// Returns `None` for NULL.
    pub fn to_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(b) => Some(if *b { "true" } else { "false" }.to_string()),
            SqlValue::I32(i) => Some(i.to_string()),
            SqlValue::I64(i) => Some(i.to_string()),
            SqlValue::F64(f) => Some(f.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Bytes(b) => Some(match std::str::from_utf8(b) {
                Ok(s) => s.to_string(),
                Err(_) => bytes_to_hex(b),
            }),
            SqlValue::TimestampTz(ts) => Some(ts.to_rfc3339()),
        }
    }
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Coerce a full row to the staging table's column types.
///
/// The row must have exactly one value per column.
pub fn coerce_row(row: Row, columns: &[ColumnDescriptor]) -> Result<Row> {
    if row.len() != columns.len() {
        return Err(SyncError::scan(
            "*",
            format!(
                "row has {} values but the result set has {} columns",
                row.len(),
                columns.len()
            ),
        ));
    }

    row.into_iter()
        .zip(columns)
        .map(|(value, col)| coerce(value, col.target_type(), &col.name))
        .collect()
}

/// Coerce a single value to the representation expected by `target`.
pub fn coerce(value: SqlValue, target: PgType, column: &str) -> Result<SqlValue> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }

    let mismatch = |value: &SqlValue, detail: &str| {
        SyncError::scan(
            column,
            format!("cannot convert {} value to {}: {}", value.kind(), target, detail),
        )
    };

    match target {
        PgType::Text => Ok(value
            .to_text()
            .map(SqlValue::Text)
            .unwrap_or(SqlValue::Null)),

        PgType::Integer => match value {
            SqlValue::I32(i) => Ok(SqlValue::I32(i)),
            SqlValue::I64(i) => i32::try_from(i)
                .map(SqlValue::I32)
                .map_err(|_| mismatch(&value, &format!("{} is out of range", i))),
            SqlValue::Bool(b) => Ok(SqlValue::I32(i32::from(b))),
            SqlValue::F64(f) => {
                if f.fract() == 0.0 && f >= i32::MIN as f64 && f <= i32::MAX as f64 {
                    Ok(SqlValue::I32(f as i32))
                } else {
                    Err(mismatch(&value, &format!("{} is not a 32-bit integer", f)))
                }
            }
            SqlValue::Text(ref s) => s
                .trim()
                .parse::<i32>()
                .map(SqlValue::I32)
                .map_err(|e| mismatch(&value, &format!("{:?}: {}", s, e))),
            _ => Err(mismatch(&value, "unsupported conversion")),
        },

        PgType::Boolean => match value {
            SqlValue::Bool(b) => Ok(SqlValue::Bool(b)),
            SqlValue::I32(i) => Ok(SqlValue::Bool(i != 0)),
            SqlValue::I64(i) => Ok(SqlValue::Bool(i != 0)),
            SqlValue::Text(ref s) => parse_bool(s)
                .map(SqlValue::Bool)
                .ok_or_else(|| mismatch(&value, &format!("{:?} is not a boolean", s))),
            _ => Err(mismatch(&value, "unsupported conversion")),
        },

        PgType::TimestampTz => match value {
            SqlValue::TimestampTz(ts) => Ok(SqlValue::TimestampTz(ts)),
            SqlValue::Text(ref s) => parse_timestamp(s)
                .map(SqlValue::TimestampTz)
                .ok_or_else(|| mismatch(&value, &format!("{:?} is not a timestamp", s))),
            SqlValue::I32(secs) => from_unix_seconds(i64::from(secs), 0)
                .ok_or_else(|| mismatch(&value, "out of range")),
            SqlValue::I64(secs) => {
                from_unix_seconds(secs, 0).ok_or_else(|| mismatch(&value, "out of range"))
            }
            SqlValue::F64(f) => {
                let secs = f.trunc() as i64;
                let nanos = (f.fract().abs() * 1e9).round() as u32;
                from_unix_seconds(secs, nanos.min(999_999_999))
                    .ok_or_else(|| mismatch(&value, "out of range"))
            }
            _ => Err(mismatch(&value, "unsupported conversion")),
        },
    }
}

fn from_unix_seconds(secs: i64, nanos: u32) -> Option<SqlValue> {
    DateTime::from_timestamp(secs, nanos).map(SqlValue::TimestampTz)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "1" | "y" | "yes" | "on" => Some(true),
        "f" | "false" | "0" | "n" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse the timestamp spellings SQLite's date functions and common
/// applications produce. Values without an offset are taken as UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%#z"] {
        if let Ok(ts) = DateTime::parse_from_str(s, fmt) {
            return Some(ts.with_timezone(&Utc));
        }
    }

    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
