//! SQLite pool and session over sqlx.
//!
//! SQLite allows a single writer, so the pool holds exactly one connection and
//! a command keeps it checked out for its whole run.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Arguments, Column, Row as _, TypeInfo, ValueRef};
use tracing::{debug, info};

use crate::core::dialect::Dialect;
use crate::core::traits::{Database, RowSink, Session};
use crate::core::value::{Row, SqlNullType, SqlValue};
use crate::error::{MigrateError, Result};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// SQLite database handle.
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    /// Open (creating if missing) the database file at `path`, or `:memory:`.
    pub async fn connect(path: &str) -> Result<Self> {
        let options = if path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };

        // An in-memory database lives as long as its only connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| MigrateError::pool(e, "opening SQLite database"))?;

        // Test connection
        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| MigrateError::pool(e, "testing SQLite connection"))?;

        info!("Opened SQLite database: {}", path);
        Ok(Self { pool })
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn session(&self) -> Result<Box<dyn Session>> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| MigrateError::pool(e, "getting SQLite connection"))?;
        Ok(Box::new(SqliteSession { conn }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// The single SQLite connection.
pub struct SqliteSession {
    conn: PoolConnection<Sqlite>,
}

#[async_trait]
impl Session for SqliteSession {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn exec(&mut self, sql: &str) -> Result<u64> {
        debug!("exec: {}", sql.trim().lines().next().unwrap_or(""));
        let conn: &mut sqlx::SqliteConnection = &mut self.conn;
        let result = sqlx::Executor::execute(conn, sqlx::raw_sql(sql)).await?;
        Ok(result.rows_affected())
    }

    async fn exec_params(&mut self, sql: &str, params: &[SqlValue<'_>]) -> Result<u64> {
        debug!("exec_params: {} params", params.len());
        let args = to_arguments(params)?;
        let result = sqlx::query_with(sql, args).execute(&mut *self.conn).await?;
        Ok(result.rows_affected())
    }

    async fn query_each(
        &mut self,
        sql: &str,
        params: &[SqlValue<'_>],
        sink: &mut RowSink<'_>,
    ) -> Result<()> {
        let args = to_arguments(params)?;
        let mut rows = sqlx::query_with(sql, args).fetch(&mut *self.conn);
        let mut columns: Option<Arc<[String]>> = None;
        while let Some(row) = rows.try_next().await? {
            let names = columns
                .get_or_insert_with(|| row.columns().iter().map(|c| c.name().to_string()).collect())
                .clone();
            let values = (0..row.len()).map(|i| convert_value(&row, i)).collect();
            sink(Row::new(names, values))?;
        }
        Ok(())
    }
}

fn to_arguments<'q>(params: &[SqlValue<'_>]) -> Result<SqliteArguments<'q>> {
    let mut args = SqliteArguments::default();
    for param in params {
        let added = match param {
            SqlValue::Null(SqlNullType::I64 | SqlNullType::Bool) => args.add(Option::<i64>::None),
            SqlValue::Null(SqlNullType::F64) => args.add(Option::<f64>::None),
            SqlValue::Null(SqlNullType::Bytes) => args.add(Option::<Vec<u8>>::None),
            SqlValue::Null(_) => args.add(Option::<String>::None),
            SqlValue::Bool(v) => args.add(*v),
            SqlValue::I64(v) => args.add(*v),
            SqlValue::F64(v) => args.add(*v),
            SqlValue::Bytes(v) => args.add(v.to_vec()),
            other => args.add(other.to_text().unwrap_or_default()),
        };
        added.map_err(|e| MigrateError::Sqlite(sqlx::Error::Encode(e)))?;
    }
    Ok(args)
}

/// Decode a cell by its storage class; SQLite columns are dynamically typed.
fn convert_value(row: &SqliteRow, i: usize) -> SqlValue<'static> {
    let storage = match row.try_get_raw(i) {
        Ok(raw) if raw.is_null() => return SqlValue::Null(SqlNullType::String),
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return SqlValue::Null(SqlNullType::String),
    };
    match storage.as_str() {
        "INTEGER" => row
            .try_get_unchecked::<i64, _>(i)
            .map(SqlValue::I64)
            .unwrap_or(SqlValue::Null(SqlNullType::I64)),
        "REAL" => row
            .try_get_unchecked::<f64, _>(i)
            .map(SqlValue::F64)
            .unwrap_or(SqlValue::Null(SqlNullType::F64)),
        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(i)
            .map(SqlValue::bytes_owned)
            .unwrap_or(SqlValue::Null(SqlNullType::Bytes)),
        _ => row
            .try_get_unchecked::<String, _>(i)
            .map(SqlValue::text_owned)
            .unwrap_or(SqlValue::Null(SqlNullType::String)),
    }
}
