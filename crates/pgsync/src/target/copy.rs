//! Row encoders for `COPY ... FROM STDIN`.
//!
//! Values are expected to be coerced to their column type already; the
//! binary encoder writes each variant with the wire width of the matching
//! PostgreSQL type.

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};

use crate::config::CopyFormat;
use crate::core::value::SqlValue;

/// Binary COPY signature, flags field and header extension length.
const BINARY_SIGNATURE: &[u8] = b"PGCOPY\n\xff\r\n\0";

/// 2000-01-01 00:00:00 UTC as microseconds since the Unix epoch.
const PG_EPOCH_UNIX_MICROS: i64 = 946_684_800_000_000;

/// Encodes rows in one COPY format.
#[derive(Debug, Clone, Copy)]
pub struct CopyEncoder {
    format: CopyFormat,
}

impl CopyEncoder {
    pub fn new(format: CopyFormat) -> Self {
        Self { format }
    }

    /// The `WITH (...)` options clause for the COPY statement.
    pub fn options(&self) -> &'static str {
        match self.format {
            CopyFormat::Binary => "FORMAT BINARY",
            CopyFormat::Text => "FORMAT TEXT",
        }
    }

    /// Bytes that must precede the first row.
    pub fn write_header(&self, buf: &mut BytesMut) {
        if self.format == CopyFormat::Binary {
            buf.put_slice(BINARY_SIGNATURE);
            buf.put_i32(0); // flags
            buf.put_i32(0); // header extension length
        }
    }

    /// Append one row.
    pub fn write_row(&self, buf: &mut BytesMut, row: &[SqlValue]) {
        match self.format {
            CopyFormat::Binary => {
                buf.put_i16(row.len() as i16);
                for value in row {
                    write_binary_value(buf, value);
                }
            }
            CopyFormat::Text => {
                for (i, value) in row.iter().enumerate() {
                    if i > 0 {
                        buf.put_u8(b'\t');
                    }
                    buf.put_slice(value_to_text(value).as_bytes());
                }
                buf.put_u8(b'\n');
            }
        }
    }

    /// Bytes that must follow the last row.
    pub fn write_trailer(&self, buf: &mut BytesMut) {
        if self.format == CopyFormat::Binary {
            buf.put_i16(-1);
        }
    }
}

/// Microseconds since the PostgreSQL epoch (2000-01-01 00:00:00 UTC).
fn pg_epoch_micros(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros() - PG_EPOCH_UNIX_MICROS
}

/// Write a value as a length-prefixed binary COPY field.
fn write_binary_value(buf: &mut BytesMut, value: &SqlValue) {
    match value {
        SqlValue::Null => buf.put_i32(-1),
        SqlValue::Bool(b) => {
            buf.put_i32(1);
            buf.put_u8(u8::from(*b));
        }
        SqlValue::I32(i) => {
            buf.put_i32(4);
            buf.put_i32(*i);
        }
        SqlValue::I64(i) => {
            buf.put_i32(8);
            buf.put_i64(*i);
        }
        SqlValue::F64(f) => {
            buf.put_i32(8);
            buf.put_f64(*f);
        }
        SqlValue::Text(s) => {
            buf.put_i32(s.len() as i32);
            buf.put_slice(s.as_bytes());
        }
        SqlValue::Bytes(b) => {
            buf.put_i32(b.len() as i32);
            buf.put_slice(b);
        }
        SqlValue::TimestampTz(ts) => {
            buf.put_i32(8);
            buf.put_i64(pg_epoch_micros(ts));
        }
    }
}

/// Render a value as a text COPY field.
fn value_to_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "\\N".to_string(),
        SqlValue::Bool(b) => if *b { "t" } else { "f" }.to_string(),
        SqlValue::TimestampTz(ts) => ts.format("%Y-%m-%d %H:%M:%S%.6f+00").to_string(),
        other => escape_copy_text(&other.to_text().unwrap_or_default()),
    }
}

/// Escape text for PostgreSQL COPY.
fn escape_copy_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            _ => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_escape_copy_text() {
        assert_eq!(escape_copy_text("hello"), "hello");
        assert_eq!(escape_copy_text("tab\there"), "tab\\there");
        assert_eq!(escape_copy_text("new\nline"), "new\\nline");
        assert_eq!(escape_copy_text("back\\slash\r"), "back\\\\slash\\r");
    }

    #[test]
    fn test_binary_header_and_trailer() {
        let encoder = CopyEncoder::new(CopyFormat::Binary);
        let mut buf = BytesMut::new();
        encoder.write_header(&mut buf);
        assert_eq!(&buf[..11], BINARY_SIGNATURE);
        assert_eq!(buf.len(), 19);

        buf.clear();
        encoder.write_trailer(&mut buf);
        assert_eq!(&buf[..], &[0xff, 0xff]);
    }

    #[test]
    fn test_binary_row_layout() {
        let encoder = CopyEncoder::new(CopyFormat::Binary);
        let mut buf = BytesMut::new();
        encoder.write_row(
            &mut buf,
            &[
                SqlValue::I32(7),
                SqlValue::Null,
                SqlValue::Text("ab".into()),
                SqlValue::Bool(true),
            ],
        );

        let expected: Vec<u8> = [
            &4i16.to_be_bytes()[..],
            &4i32.to_be_bytes(),
            &7i32.to_be_bytes(),
            &(-1i32).to_be_bytes(),
            &2i32.to_be_bytes(),
            b"ab",
            &1i32.to_be_bytes(),
            &[1u8],
        ]
        .concat();
        assert_eq!(&buf[..], &expected[..]);
    }

    #[test]
    fn test_timestamp_binary_is_micros_since_2000() {
        let mut buf = BytesMut::new();
        let ts = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 1).unwrap();
        write_binary_value(&mut buf, &SqlValue::TimestampTz(ts));
        assert_eq!(&buf[..4], &8i32.to_be_bytes());
        assert_eq!(&buf[4..], &1_000_000i64.to_be_bytes());

        buf.clear();
        let before = Utc.with_ymd_and_hms(1999, 12, 31, 23, 59, 59).unwrap();
        write_binary_value(&mut buf, &SqlValue::TimestampTz(before));
        assert_eq!(&buf[4..], &(-1_000_000i64).to_be_bytes());
    }

    #[test]
    fn test_text_row() {
        let encoder = CopyEncoder::new(CopyFormat::Text);
        let mut buf = BytesMut::new();
        let ts = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
        encoder.write_header(&mut buf);
        assert!(buf.is_empty());

        encoder.write_row(
            &mut buf,
            &[
                SqlValue::Text("a\tb".into()),
                SqlValue::I32(-3),
                SqlValue::Null,
                SqlValue::Bool(false),
                SqlValue::TimestampTz(ts),
            ],
        );
        assert_eq!(
            std::str::from_utf8(&buf).unwrap(),
            "a\\tb\t-3\t\\N\tf\t2021-03-04 05:06:07.000000+00\n"
        );

        buf.clear();
        encoder.write_trailer(&mut buf);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_options_clause() {
        assert_eq!(CopyEncoder::new(CopyFormat::Binary).options(), "FORMAT BINARY");
        assert_eq!(CopyEncoder::new(CopyFormat::Text).options(), "FORMAT TEXT");
    }
}
