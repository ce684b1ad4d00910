//! SQL value and row types shared by every driver.
//!
//! Drivers decode result sets into [`Row`]s of [`SqlValue`]s and bind
//! [`SqlValue`] parameters, so the engines above never touch driver types.

use std::borrow::Cow;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::core::dialect::Dialect;
use crate::core::identifier::quote_literal;

/// Type hint for NULL values so drivers can bind a typed NULL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlNullType {
    Bool,
    I64,
    F64,
    String,
    Bytes,
    Uuid,
    Decimal,
    DateTime,
    DateTimeOffset,
    Date,
    Time,
}

/// SQL value enum for type-safe row handling.
///
/// Uses `Cow` for string and byte data so parameters can borrow from
/// the caller's buffers; use `.into_owned()` to detach.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue<'a> {
    /// NULL with type hint for correct parameter binding.
    Null(SqlNullType),
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(Cow<'a, str>),
    Bytes(Cow<'a, [u8]>),
    Uuid(Uuid),
    Decimal(Decimal),
    /// Timestamp without timezone.
    DateTime(NaiveDateTime),
    /// Timestamp with timezone offset.
    DateTimeOffset(DateTime<FixedOffset>),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl<'a> SqlValue<'a> {
    /// Convert to a fully owned value with `'static` lifetime.
    #[must_use]
    pub fn into_owned(self) -> SqlValue<'static> {
        match self {
            SqlValue::Null(t) => SqlValue::Null(t),
            SqlValue::Bool(v) => SqlValue::Bool(v),
            SqlValue::I64(v) => SqlValue::I64(v),
            SqlValue::F64(v) => SqlValue::F64(v),
            SqlValue::Text(v) => SqlValue::Text(Cow::Owned(v.into_owned())),
            SqlValue::Bytes(v) => SqlValue::Bytes(Cow::Owned(v.into_owned())),
            SqlValue::Uuid(v) => SqlValue::Uuid(v),
            SqlValue::Decimal(v) => SqlValue::Decimal(v),
            SqlValue::DateTime(v) => SqlValue::DateTime(v),
            SqlValue::DateTimeOffset(v) => SqlValue::DateTimeOffset(v),
            SqlValue::Date(v) => SqlValue::Date(v),
            SqlValue::Time(v) => SqlValue::Time(v),
        }
    }

    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// Get the SqlNullType for this value.
    #[must_use]
    pub fn null_type(&self) -> SqlNullType {
        match self {
            SqlValue::Null(t) => *t,
            SqlValue::Bool(_) => SqlNullType::Bool,
            SqlValue::I64(_) => SqlNullType::I64,
            SqlValue::F64(_) => SqlNullType::F64,
            SqlValue::Text(_) => SqlNullType::String,
            SqlValue::Bytes(_) => SqlNullType::Bytes,
            SqlValue::Uuid(_) => SqlNullType::Uuid,
            SqlValue::Decimal(_) => SqlNullType::Decimal,
            SqlValue::DateTime(_) => SqlNullType::DateTime,
            SqlValue::DateTimeOffset(_) => SqlNullType::DateTimeOffset,
            SqlValue::Date(_) => SqlNullType::Date,
            SqlValue::Time(_) => SqlNullType::Time,
        }
    }

    /// Text rendering of the value; `None` for NULL. Bytes render as lowercase hex.
    pub fn to_text(&self) -> Option<String> {
        let s = match self {
            SqlValue::Null(_) => return None,
            SqlValue::Bool(v) => v.to_string(),
            SqlValue::I64(v) => v.to_string(),
            SqlValue::F64(v) => v.to_string(),
            SqlValue::Text(v) => v.to_string(),
            SqlValue::Bytes(v) => hex::encode(v),
            SqlValue::Uuid(v) => v.to_string(),
            SqlValue::Decimal(v) => v.to_string(),
            SqlValue::DateTime(v) => v.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            SqlValue::DateTimeOffset(v) => v.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string(),
            SqlValue::Date(v) => v.format("%Y-%m-%d").to_string(),
            SqlValue::Time(v) => v.format("%H:%M:%S%.f").to_string(),
        };
        Some(s)
    }

    /// Render as a SQL literal for `dialect`.
    pub fn to_literal(&self, dialect: Dialect) -> String {
        match self {
            SqlValue::Null(_) => "NULL".to_string(),
            SqlValue::I64(v) => v.to_string(),
            SqlValue::F64(v) => v.to_string(),
            SqlValue::Decimal(v) => v.to_string(),
            SqlValue::Bool(v) => match dialect {
                Dialect::SqlServer | Dialect::Sqlite | Dialect::Mysql => {
                    (if *v { "1" } else { "0" }).to_string()
                }
                Dialect::Postgres => (if *v { "TRUE" } else { "FALSE" }).to_string(),
            },
            SqlValue::Bytes(b) => match dialect {
                Dialect::Postgres => format!("'\\x{}'::bytea", hex::encode(b)),
                Dialect::Sqlite | Dialect::Mysql => format!("X'{}'", hex::encode(b)),
                Dialect::SqlServer => format!("0x{}", hex::encode(b)),
            },
            other => quote_literal(dialect, &other.to_text().unwrap_or_default()),
        }
    }
}

impl<'a> SqlValue<'a> {
    /// Create a text value from a borrowed string slice.
    #[must_use]
    pub fn text_borrowed(s: &'a str) -> Self {
        SqlValue::Text(Cow::Borrowed(s))
    }

    /// Create a text value from an owned String.
    #[must_use]
    pub fn text_owned(s: String) -> SqlValue<'static> {
        SqlValue::Text(Cow::Owned(s))
    }

    /// Create a bytes value from an owned Vec<u8>.
    #[must_use]
    pub fn bytes_owned(b: Vec<u8>) -> SqlValue<'static> {
        SqlValue::Bytes(Cow::Owned(b))
    }
}

impl From<bool> for SqlValue<'static> {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i64> for SqlValue<'static> {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<f64> for SqlValue<'static> {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<String> for SqlValue<'static> {
    fn from(v: String) -> Self {
        SqlValue::Text(Cow::Owned(v))
    }
}

impl<'a> From<&'a str> for SqlValue<'a> {
    fn from(v: &'a str) -> Self {
        SqlValue::Text(Cow::Borrowed(v))
    }
}

impl From<Vec<u8>> for SqlValue<'static> {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(Cow::Owned(v))
    }
}

impl From<Option<String>> for SqlValue<'static> {
    fn from(v: Option<String>) -> Self {
        match v {
            Some(s) => SqlValue::Text(Cow::Owned(s)),
            None => SqlValue::Null(SqlNullType::String),
        }
    }
}

impl From<DateTime<Utc>> for SqlValue<'static> {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::DateTimeOffset(v.fixed_offset())
    }
}

/// One result row. Column names are shared across the rows of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue<'static>>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue<'static>>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue<'static>] {
        &self.values
    }

    pub fn into_values(self) -> Vec<SqlValue<'static>> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&SqlValue<'static>> {
        self.values.get(idx)
    }

    /// Column index by case-insensitive name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Text rendering of a cell; `None` for NULL or out of range.
    pub fn get_str(&self, idx: usize) -> Option<String> {
        self.values.get(idx).and_then(SqlValue::to_text)
    }

    /// Text rendering of a cell, empty for NULL.
    pub fn get_string(&self, idx: usize) -> String {
        self.get_str(idx).unwrap_or_default()
    }

    /// Integer value, parsing text cells when needed.
    pub fn get_i64(&self, idx: usize) -> Option<i64> {
        match self.values.get(idx)? {
            SqlValue::I64(v) => Some(*v),
            SqlValue::Bool(v) => Some(i64::from(*v)),
            SqlValue::F64(v) => Some(*v as i64),
            SqlValue::Decimal(d) => d.trunc().to_string().parse().ok(),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean value; accepts 1/0, t/f, true/false, yes/no text.
    pub fn get_bool(&self, idx: usize) -> bool {
        match self.values.get(idx) {
            Some(SqlValue::Bool(v)) => *v,
            Some(SqlValue::I64(v)) => *v != 0,
            Some(SqlValue::Text(s)) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "1" | "t" | "true" | "y" | "yes" | "on"
            ),
            Some(SqlValue::Bytes(b)) => b.first().is_some_and(|v| *v != 0 && *v != b'0'),
            _ => false,
        }
    }

    /// Timestamp value, parsing text cells in the common server formats.
    pub fn get_timestamp(&self, idx: usize) -> Option<DateTime<Utc>> {
        match self.values.get(idx)? {
            SqlValue::DateTimeOffset(v) => Some(v.with_timezone(&Utc)),
            SqlValue::DateTime(v) => Some(Utc.from_utc_datetime(v)),
            SqlValue::I64(v) => Utc.timestamp_opt(*v, 0).single(),
            SqlValue::Text(s) => parse_timestamp(s).map(|(dt, _)| dt),
            _ => None,
        }
    }
}

/// Accepted timestamp layouts, tried in order. Offsets are optional.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%#z",
    "%Y-%m-%dT%H:%M:%S%.f%#z",
    "%Y-%m-%d %H:%M:%S%.f %:z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse a timestamp string. The flag reports whether it carried an offset.
pub fn parse_timestamp(s: &str) -> Option<(DateTime<Utc>, bool)> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some((dt.with_timezone(&Utc), true));
    }
    let zulu = s.strip_suffix('Z').unwrap_or(s);
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some((dt.with_timezone(&Utc), true));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(zulu, fmt) {
            return Some((Utc.from_utc_datetime(&dt), s.ends_with('Z')));
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(zulu, "%Y-%m-%d") {
        let dt = d.and_hms_opt(0, 0, 0)?;
        return Some((Utc.from_utc_datetime(&dt), false));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: Vec<SqlValue<'static>>) -> Row {
        let cols: Vec<String> = (0..values.len()).map(|i| format!("c{}", i)).collect();
        Row::new(cols.into(), values)
    }

    #[test]
    fn test_sql_value_into_owned() {
        let borrowed: SqlValue<'_> = SqlValue::Text(Cow::Borrowed("hello"));
        let owned: SqlValue<'static> = borrowed.into_owned();
        assert_eq!(owned, SqlValue::Text(Cow::Owned("hello".to_string())));
    }

    #[test]
    fn test_sql_value_is_null() {
        assert!(SqlValue::<'static>::Null(SqlNullType::String).is_null());
        assert!(!SqlValue::I64(42).is_null());
    }

    #[test]
    fn test_to_literal() {
        assert_eq!(SqlValue::I64(5).to_literal(Dialect::Postgres), "5");
        assert_eq!(
            SqlValue::text_borrowed("O'Neil").to_literal(Dialect::Postgres),
            "'O''Neil'"
        );
        assert_eq!(
            SqlValue::bytes_owned(vec![0xab, 0x01]).to_literal(Dialect::Sqlite),
            "X'ab01'"
        );
        assert_eq!(
            SqlValue::Null(SqlNullType::String).to_literal(Dialect::Mysql),
            "NULL"
        );
        assert_eq!(SqlValue::Bool(true).to_literal(Dialect::SqlServer), "1");
    }

    #[test]
    fn test_row_lenient_getters() {
        let r = row(vec![
            SqlValue::text_owned("42".into()),
            SqlValue::text_owned("t".into()),
            SqlValue::I64(0),
            SqlValue::Null(SqlNullType::String),
        ]);
        assert_eq!(r.get_i64(0), Some(42));
        assert!(r.get_bool(1));
        assert!(!r.get_bool(2));
        assert_eq!(r.get_str(3), None);
        assert_eq!(r.get_string(3), "");
        assert_eq!(r.index_of("C1"), Some(1));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let (dt, offset) = parse_timestamp("2006-01-02 15:04:05").unwrap();
        assert_eq!(dt.timestamp(), 1136214245);
        assert!(!offset);

        let (dt, offset) = parse_timestamp("2006-01-02T15:04:05+07:00").unwrap();
        assert_eq!(dt.timestamp(), 1136189045);
        assert!(offset);

        let (dt, _) = parse_timestamp("2006-01-02 15:04:05.123456+00").unwrap();
        assert_eq!(dt.timestamp(), 1136214245);

        let (dt, _) = parse_timestamp("2006-01-02").unwrap();
        assert_eq!(dt.timestamp(), 1136160000);

        assert!(parse_timestamp("not a date").is_none());
    }

    #[test]
    fn test_get_timestamp_from_text() {
        let r = row(vec![SqlValue::text_owned("2024-05-01 10:00:00".into())]);
        assert_eq!(r.get_timestamp(0).unwrap().timestamp(), 1714557600);
    }
}
