//! One CSV file into one table.

use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::batch::{BatchInsert, Produce};
use crate::config::LoadOptions;
use crate::core::catalog::{Catalog, Column, Table};
use crate::core::dialect::Dialect;
use crate::core::identifier::validate_identifier;
use crate::core::normalize::normalize_column_type;
use crate::core::traits::Session;
use crate::core::value::{parse_timestamp, SqlNullType, SqlValue};
use crate::drivers::common::SessionSetting;
use crate::error::{MigrateError, Result};

pub(crate) const BINARY_TYPES: &[&str] = &[
    "BYTEA",
    "BINARY",
    "VARBINARY",
    "BLOB",
    "TINYBLOB",
    "MEDIUMBLOB",
    "LONGBLOB",
    "VARBIT",
    "UUID",
];

const SQLITE_TIME_TYPES: &[&str] = &["TIMESTAMP", "DATETIME", "DATE"];

/// Schema and table named by a CSV file.
///
/// `03_sales.orders.csv` names `sales.orders`; `film.tsv` names `film` in the
/// current schema.
pub fn table_ref(filename: &str) -> (String, String) {
    let base = filename.rsplit('/').next().unwrap_or(filename);
    let stem = base
        .rsplit_once('.')
        .filter(|(_, ext)| ext.eq_ignore_ascii_case("csv") || ext.eq_ignore_ascii_case("tsv"))
        .map_or(base, |(stem, _)| stem);
    let digits = stem.bytes().take_while(u8::is_ascii_digit).count();
    let stem = if digits > 0 && stem.as_bytes().get(digits) == Some(&b'_') {
        &stem[digits + 1..]
    } else {
        stem
    };
    match stem.split_once('.') {
        Some((schema, table)) => (schema.to_string(), table.to_string()),
        None => (String::new(), stem.to_string()),
    }
}

/// Whether `filename` is tab-delimited.
pub fn is_tsv(filename: &str) -> bool {
    filename.to_ascii_lowercase().ends_with(".tsv")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Text,
    Binary,
    PgUuid,
    PgArray,
    UnixTime,
}

/// Converts CSV cells into values for one target column.
#[derive(Debug, Clone)]
pub struct CellCoercer {
    kind: CellKind,
    null_string: Option<String>,
    binary_prefix: Option<String>,
}

impl CellCoercer {
    pub fn new(dialect: Dialect, column: &Column, opts: &LoadOptions) -> Self {
        let ty = normalize_column_type(dialect, &column.column_type);
        let kind = if dialect == Dialect::Postgres && ty.is_array() {
            CellKind::PgArray
        } else if dialect == Dialect::Postgres && ty.base == "UUID" {
            CellKind::PgUuid
        } else if ty.is_one_of(BINARY_TYPES) {
            CellKind::Binary
        } else if dialect == Dialect::Sqlite && opts.timestamp_as_integer && ty.is_one_of(SQLITE_TIME_TYPES) {
            CellKind::UnixTime
        } else {
            CellKind::Text
        };
        Self {
            kind,
            null_string: opts.null_string.clone(),
            binary_prefix: opts.binary_prefix.clone(),
        }
    }

    pub fn coerce(&self, cell: &str) -> std::result::Result<SqlValue<'static>, String> {
        if self.null_string.as_deref() == Some(cell) {
            let hint = match self.kind {
                CellKind::Binary => SqlNullType::Bytes,
                CellKind::UnixTime => SqlNullType::I64,
                _ => SqlNullType::String,
            };
            return Ok(SqlValue::Null(hint));
        }
        match self.kind {
            CellKind::Binary | CellKind::PgUuid => {
                let Some(hex) = self.strip_binary_prefix(cell) else {
                    return Ok(SqlValue::text_owned(cell.to_string()));
                };
                let bytes = hex::decode(hex).map_err(|e| format!("invalid hex {:?}: {}", cell, e))?;
                if self.kind == CellKind::PgUuid {
                    let uuid = Uuid::from_slice(&bytes).map_err(|e| format!("invalid uuid {:?}: {}", cell, e))?;
                    return Ok(SqlValue::text_owned(uuid.hyphenated().to_string()));
                }
                Ok(SqlValue::bytes_owned(bytes))
            }
            CellKind::PgArray if cell.starts_with('[') => match serde_json::from_str::<JsonValue>(cell) {
                Ok(JsonValue::Array(items)) => Ok(SqlValue::text_owned(pg_array_literal(&items))),
                _ => Ok(SqlValue::text_owned(cell.to_string())),
            },
            CellKind::UnixTime => match parse_timestamp(cell) {
                Some((dt, _)) => Ok(SqlValue::I64(dt.timestamp())),
                None => Ok(SqlValue::text_owned(cell.to_string())),
            },
            _ => Ok(SqlValue::text_owned(cell.to_string())),
        }
    }

    fn strip_binary_prefix<'c>(&self, cell: &'c str) -> Option<&'c str> {
        let prefix = self.binary_prefix.as_deref()?;
        cell.strip_prefix(prefix)
    }
}

/// Postgres array literal for a JSON array: `[1,[2,null],"a b"]` becomes `{1,{2,NULL},"a b"}`.
pub fn pg_array_literal(items: &[JsonValue]) -> String {
    let parts: Vec<String> = items
        .iter()
        .map(|item| match item {
            JsonValue::Null => "NULL".to_string(),
            JsonValue::Bool(b) => b.to_string(),
            JsonValue::Number(n) => n.to_string(),
            JsonValue::Array(inner) => pg_array_literal(inner),
            JsonValue::String(s) => pg_array_element(s),
            other => pg_array_element(&other.to_string()),
        })
        .collect();
    format!("{{{}}}", parts.join(","))
}

fn pg_array_element(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Rows loaded from one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvLoaded {
    pub file: String,
    pub table: String,
    pub rows: u64,
}

/// Load `data` into the table named by `filename`, in its own transaction,
/// with foreign-key checks suspended.
pub async fn load_csv(
    session: &mut dyn Session,
    catalog: &Catalog,
    filename: &str,
    data: &[u8],
    opts: &LoadOptions,
    cancel: &CancellationToken,
) -> Result<CsvLoaded> {
    let (schema, name) = table_ref(filename);
    validate_identifier(&schema)?;
    validate_identifier(&name)?;
    let table = catalog
        .find_table(&schema, &name)
        .ok_or_else(|| MigrateError::load(filename, format!("table {} does not exist", name)))?;

    let fk = SessionSetting::foreign_keys(session, false).await?;
    let result = load_in_tx(session, catalog, table, filename, data, opts, cancel).await;
    let restored = fk.restore(session).await;
    let rows = result?;
    restored?;

    debug!("{}: {} rows into {}", filename, rows, table.name);
    let qualified = if table.schema.is_empty() || table.schema == catalog.current_schema {
        table.name.clone()
    } else {
        format!("{}.{}", table.schema, table.name)
    };
    Ok(CsvLoaded {
        file: filename.to_string(),
        table: qualified,
        rows,
    })
}

async fn load_in_tx(
    session: &mut dyn Session,
    catalog: &Catalog,
    table: &Table,
    filename: &str,
    data: &[u8],
    opts: &LoadOptions,
    cancel: &CancellationToken,
) -> Result<u64> {
    let dialect = session.dialect();
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(if is_tsv(filename) { b'\t' } else { b',' })
        .from_reader(data);

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let mut columns = Vec::with_capacity(headers.len());
    let mut coercers = Vec::with_capacity(headers.len());
    for header in &headers {
        let column = table.find_column(dialect, header).ok_or_else(|| {
            MigrateError::load(filename, format!("table {} has no column {}", table.name, header))
        })?;
        columns.push(column.name.clone());
        coercers.push(CellCoercer::new(dialect, column, opts));
    }
    let identity: Vec<String> = table
        .columns
        .iter()
        .filter(|c| !c.identity.is_empty())
        .map(|c| c.name.clone())
        .collect();

    let insert = BatchInsert::new(dialect, &table.name, columns)
        .schema(&table.schema, &catalog.current_schema)
        .identity(identity)
        .batch_size(opts.batch_size);

    session.begin().await?;
    let mut records = reader.into_records();
    let mut line = 1u64;
    let outcome = insert
        .run(session, |row| {
            if cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }
            let Some(record) = records.next() else {
                return Ok(Produce::End);
            };
            let record = record?;
            line += 1;
            if record.len() != coercers.len() {
                return Err(MigrateError::load(
                    filename,
                    format!("line {}: {} fields, expected {}", line, record.len(), coercers.len()),
                ));
            }
            for (cell, coercer) in record.iter().zip(&coercers) {
                let value = coercer
                    .coerce(cell)
                    .map_err(|msg| MigrateError::load(filename, format!("line {}: {}", line, msg)))?;
                row.push(value);
            }
            Ok(Produce::Continue)
        })
        .await;

    match outcome {
        Ok(rows) => {
            session.commit().await?;
            Ok(rows)
        }
        Err(e) => {
            if let Err(rollback) = session.rollback().await {
                debug!("{}: rollback failed: {}", filename, rollback);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coercer(dialect: Dialect, ty: &str, opts: &LoadOptions) -> CellCoercer {
        let column = Column {
            name: "c".into(),
            column_type: ty.into(),
            ..Default::default()
        };
        CellCoercer::new(dialect, &column, opts)
    }

    #[test]
    fn test_table_ref_strips_prefix_and_splits_schema() {
        assert_eq!(table_ref("film.csv"), (String::new(), "film".into()));
        assert_eq!(table_ref("03_sales.orders.csv"), ("sales".into(), "orders".into()));
        assert_eq!(table_ref("data/12_actor.tsv"), (String::new(), "actor".into()));
        assert_eq!(table_ref("2024stats.csv"), (String::new(), "2024stats".into()));
    }

    #[tokio::test]
    async fn test_overlong_table_name_is_config_error() {
        use crate::core::traits::Database;
        use crate::drivers::sqlite::SqliteDatabase;

        let db = SqliteDatabase::connect(":memory:").await.unwrap();
        let mut s = db.session().await.unwrap();
        let filename = format!("{}.csv", "t".repeat(200));
        let err = load_csv(
            s.as_mut(),
            &Catalog::new(Dialect::Sqlite),
            &filename,
            b"id\n1\n",
            &LoadOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }

    #[test]
    fn test_null_sentinel() {
        let opts = LoadOptions::default();
        let c = coercer(Dialect::Postgres, "TEXT", &opts);
        assert!(c.coerce("\\N").unwrap().is_null());
        assert_eq!(c.coerce("").unwrap(), SqlValue::text_borrowed(""));

        let no_null = LoadOptions {
            null_string: None,
            ..LoadOptions::default()
        };
        let c = coercer(Dialect::Postgres, "TEXT", &no_null);
        assert_eq!(c.coerce("\\N").unwrap(), SqlValue::text_borrowed("\\N"));
    }

    #[test]
    fn test_binary_hex_decoding() {
        let opts = LoadOptions::default();
        let c = coercer(Dialect::Mysql, "VARBINARY(16)", &opts);
        assert_eq!(c.coerce("0xdeadbeef").unwrap(), SqlValue::bytes_owned(vec![0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(c.coerce("plain").unwrap(), SqlValue::text_borrowed("plain"));
        assert!(c.coerce("0xzz").is_err());
        assert_eq!(c.coerce("\\N").unwrap(), SqlValue::Null(SqlNullType::Bytes));
    }

    #[test]
    fn test_postgres_uuid_from_hex() {
        let c = coercer(Dialect::Postgres, "uuid", &LoadOptions::default());
        assert_eq!(
            c.coerce("0x67e5504410b1426f9247bb680e5fe0c8").unwrap(),
            SqlValue::text_borrowed("67e55044-10b1-426f-9247-bb680e5fe0c8")
        );
        assert_eq!(
            c.coerce("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap(),
            SqlValue::text_borrowed("67e55044-10b1-426f-9247-bb680e5fe0c8")
        );
    }

    #[test]
    fn test_postgres_array_from_json() {
        let c = coercer(Dialect::Postgres, "text[]", &LoadOptions::default());
        assert_eq!(
            c.coerce(r#"["Deleted Scenes","Behind the \"Scenes\""]"#).unwrap(),
            SqlValue::text_borrowed(r#"{"Deleted Scenes","Behind the \"Scenes\""}"#)
        );
        let ints = coercer(Dialect::Postgres, "_int4", &LoadOptions::default());
        assert_eq!(ints.coerce("[[1,2],[3,null]]").unwrap(), SqlValue::text_borrowed("{{1,2},{3,NULL}}"));
        assert_eq!(ints.coerce("{1,2}").unwrap(), SqlValue::text_borrowed("{1,2}"));
    }

    #[test]
    fn test_sqlite_timestamp_as_integer() {
        let opts = LoadOptions {
            timestamp_as_integer: true,
            ..LoadOptions::default()
        };
        let c = coercer(Dialect::Sqlite, "DATETIME", &opts);
        assert_eq!(c.coerce("2006-01-02 15:04:05").unwrap(), SqlValue::I64(1136214245));
        assert_eq!(c.coerce("2006-01-02").unwrap(), SqlValue::I64(1136160000));
        assert_eq!(c.coerce("soon").unwrap(), SqlValue::text_borrowed("soon"));

        let off = coercer(Dialect::Sqlite, "DATETIME", &LoadOptions::default());
        assert_eq!(off.coerce("2006-01-02").unwrap(), SqlValue::text_borrowed("2006-01-02"));
    }
}
