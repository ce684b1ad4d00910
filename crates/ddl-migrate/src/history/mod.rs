//! Migration history table.
//!
//! One row per migration filename:
//! `{filename PK, checksum, started_at, time_taken_ns, success}`.
//! A row with `success = false` means the script aborted and may have been
//! partially applied.

mod commands;

pub use commands::{list, remove, rename, touch, FileStatus, ListEntry, ListFilter};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::batch::{BatchInsert, Produce};
use crate::core::dialect::Dialect;
use crate::core::identifier::{qualify, quote_literal};
use crate::core::traits::Session;
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};

const COLUMNS: [&str; 5] = ["filename", "checksum", "started_at", "time_taken_ns", "success"];

/// One history row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub filename: String,
    /// Recorded for every file; compared only for repeatable ones.
    pub checksum: String,
    pub started_at: DateTime<Utc>,
    pub time_taken_ns: i64,
    pub success: bool,
}

/// Access to the history table of one database.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    dialect: Dialect,
    schema: String,
    table: String,
}

impl HistoryStore {
    /// `name` may be schema-qualified (`tools.ddl_history`).
    pub fn new(dialect: Dialect, name: &str) -> Self {
        let (schema, table) = match name.split_once('.') {
            Some((s, t)) => (s.to_string(), t.to_string()),
            None => (String::new(), name.to_string()),
        };
        Self {
            dialect,
            schema,
            table,
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Quoted, possibly qualified table name.
    pub fn qualified(&self) -> String {
        qualify(self.dialect, &self.schema, &self.table, "")
    }

    fn create_sql(&self) -> String {
        let d = self.dialect;
        let table = self.qualified();
        let text = if d == Dialect::SqlServer { "NVARCHAR" } else { "VARCHAR" };
        let columns = format!(
            "filename {text}(255) NOT NULL PRIMARY KEY, checksum {text}(64), started_at {}, time_taken_ns BIGINT, success {}",
            d.timestamp_type(),
            d.bool_type(),
        );
        match d {
            Dialect::SqlServer => format!(
                "IF OBJECT_ID({}, N'U') IS NULL CREATE TABLE {} ({})",
                quote_literal(d, &table),
                table,
                columns
            ),
            _ => format!("CREATE TABLE IF NOT EXISTS {} ({})", table, columns),
        }
    }

    /// Create the table if it does not exist.
    pub async fn ensure_table(&self, session: &mut dyn Session) -> Result<()> {
        let sql = self.create_sql();
        debug!("ensuring history table {}", self.qualified());
        session.exec(&sql).await.map_err(|e| MigrateError::sql(&sql, e))?;
        Ok(())
    }

    /// Every row, keyed by filename.
    pub async fn read_all(
        &self,
        session: &mut dyn Session,
    ) -> Result<BTreeMap<String, MigrationRecord>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY filename",
            COLUMNS.join(", "),
            self.qualified()
        );
        let rows = session.query(&sql, &[]).await.map_err(|e| MigrateError::sql(&sql, e))?;
        let mut records = BTreeMap::new();
        for row in rows {
            let record = MigrationRecord {
                filename: row.get_string(0),
                checksum: row.get_string(1),
                started_at: row.get_timestamp(2).unwrap_or_default(),
                time_taken_ns: row.get_i64(3).unwrap_or(0),
                success: row.get_bool(4),
            };
            records.insert(record.filename.clone(), record);
        }
        Ok(records)
    }

    /// Insert or replace rows by filename.
    pub async fn upsert(&self, session: &mut dyn Session, records: &[MigrationRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let dialect = self.dialect;
        let batch = BatchInsert::new(dialect, &self.table, COLUMNS.iter().map(|c| c.to_string()).collect())
            .schema(&self.schema, "")
            .keys(vec!["filename".to_string()]);

        let mut pending = records.iter();
        batch
            .run(session, |row| {
                let Some(r) = pending.next() else {
                    return Ok(Produce::End);
                };
                row.push(SqlValue::text_owned(r.filename.clone()));
                row.push(SqlValue::text_owned(r.checksum.clone()));
                row.push(timestamp_value(dialect, r.started_at));
                row.push(SqlValue::I64(r.time_taken_ns));
                row.push(SqlValue::Bool(r.success));
                Ok(Produce::Continue)
            })
            .await?;
        debug!("recorded {} history row(s)", records.len());
        Ok(())
    }

    /// Change a filename. Exactly one row must match.
    pub async fn rename(&self, session: &mut dyn Session, old: &str, new: &str) -> Result<()> {
        let d = self.dialect;
        let sql = format!(
            "UPDATE {} SET filename = {} WHERE filename = {}",
            self.qualified(),
            d.placeholder(1),
            d.placeholder(2)
        );
        let n = session
            .exec_params(&sql, &[SqlValue::text_borrowed(new), SqlValue::text_borrowed(old)])
            .await
            .map_err(|e| MigrateError::sql(&sql, e))?;
        if n != 1 {
            return Err(MigrateError::History(format!(
                "expected to rename exactly one row for {}, matched {}",
                old, n
            )));
        }
        Ok(())
    }

    /// Delete rows; returns how many were removed.
    pub async fn remove(&self, session: &mut dyn Session, filenames: &[String]) -> Result<u64> {
        if filenames.is_empty() {
            return Ok(0);
        }
        let d = self.dialect;
        let placeholders: Vec<String> = (1..=filenames.len()).map(|i| d.placeholder(i)).collect();
        let sql = format!(
            "DELETE FROM {} WHERE filename IN ({})",
            self.qualified(),
            placeholders.join(", ")
        );
        let params: Vec<SqlValue<'_>> = filenames.iter().map(|f| SqlValue::text_borrowed(f)).collect();
        session
            .exec_params(&sql, &params)
            .await
            .map_err(|e| MigrateError::sql(&sql, e))
    }
}

/// Timestamp parameter in the form each dialect's history column accepts.
fn timestamp_value(dialect: Dialect, at: DateTime<Utc>) -> SqlValue<'static> {
    match dialect {
        Dialect::Postgres | Dialect::SqlServer => SqlValue::DateTimeOffset(at.fixed_offset()),
        Dialect::Sqlite | Dialect::Mysql => SqlValue::DateTime(at.naive_utc()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::Database;
    use crate::drivers::sqlite::SqliteDatabase;

    #[test]
    fn test_create_sql_per_dialect() {
        let pg = HistoryStore::new(Dialect::Postgres, "ddl_history").create_sql();
        assert!(pg.starts_with("CREATE TABLE IF NOT EXISTS ddl_history ("));
        assert!(pg.contains("started_at TIMESTAMPTZ"));
        assert!(pg.contains("success BOOLEAN"));

        let ms = HistoryStore::new(Dialect::SqlServer, "tools.ddl_history").create_sql();
        assert!(ms.starts_with("IF OBJECT_ID(N'tools.ddl_history', N'U') IS NULL CREATE TABLE tools.ddl_history"));
        assert!(ms.contains("started_at DATETIMEOFFSET"));
        assert!(ms.contains("success BIT"));
    }

    #[tokio::test]
    async fn test_upsert_read_rename_remove() {
        let db = SqliteDatabase::connect(":memory:").await.unwrap();
        let mut s = db.session().await.unwrap();
        let store = HistoryStore::new(Dialect::Sqlite, "ddl_history");
        store.ensure_table(s.as_mut()).await.unwrap();
        store.ensure_table(s.as_mut()).await.unwrap();

        let at = Utc::now();
        let mut record = MigrationRecord {
            filename: "01_init.sql".into(),
            checksum: "abc".into(),
            started_at: at,
            time_taken_ns: 1500,
            success: false,
        };
        store.upsert(s.as_mut(), &[record.clone()]).await.unwrap();
        record.success = true;
        store.upsert(s.as_mut(), &[record.clone()]).await.unwrap();

        let rows = store.read_all(s.as_mut()).await.unwrap();
        assert_eq!(rows.len(), 1);
        let got = &rows["01_init.sql"];
        assert!(got.success);
        assert_eq!(got.time_taken_ns, 1500);
        assert_eq!(got.started_at.timestamp(), at.timestamp());

        store.rename(s.as_mut(), "01_init.sql", "01_base.sql").await.unwrap();
        assert!(store.rename(s.as_mut(), "01_init.sql", "x.sql").await.is_err());
        assert_eq!(
            store.remove(s.as_mut(), &["01_base.sql".into(), "nope.sql".into()]).await.unwrap(),
            1
        );
        assert!(store.read_all(s.as_mut()).await.unwrap().is_empty());
    }
}
