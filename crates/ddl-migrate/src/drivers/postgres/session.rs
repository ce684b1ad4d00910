//! PostgreSQL pool and session.
//!
//! Uses deadpool-postgres over tokio-postgres. Parameters are sent in text
//! format so the server casts them to whatever type it inferred, which lets
//! CSV cells bind to any column type without client-side conversion.

use std::error::Error as StdError;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::{pin_mut, TryStreamExt};
use tokio_postgres::types::{to_sql_checked, Format, IsNull, ToSql, Type};
use tokio_postgres::{Config as PgConfig, SimpleQueryMessage};
use tracing::{debug, info, warn};

use crate::core::dialect::Dialect;
use crate::core::traits::{Database, RowSink, Session};
use crate::core::value::{Row, SqlNullType, SqlValue};
use crate::drivers::common::{split_sslmode, SslMode, TlsBuilder};
use crate::drivers::dsn::redact;
use crate::error::{MigrateError, Result};

/// Connection timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum pooled connections.
const POOL_MAX_SIZE: usize = 8;

/// PostgreSQL connection pool.
pub struct PostgresDatabase {
    pool: Pool,
}

impl PostgresDatabase {
    /// Connect to a `postgres://` DSN. `sslmode` selects the TLS connector.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let (url, ssl_mode) = split_sslmode(dsn)?;
        let mut pg_config =
            PgConfig::from_str(&url).map_err(|e| MigrateError::Dsn(format!("{}: {}", e, redact(dsn))))?;

        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);
        pg_config.ssl_mode(ssl_mode.to_postgres());

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let pool = match TlsBuilder::new(ssl_mode).build()? {
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(POOL_MAX_SIZE)
                    .build()
                    .map_err(|e| MigrateError::pool(e, "creating PostgreSQL pool"))?
            }
            Some(tls) => {
                let mgr = Manager::from_config(pg_config, tls, mgr_config);
                Pool::builder(mgr)
                    .max_size(POOL_MAX_SIZE)
                    .build()
                    .map_err(|e| MigrateError::pool(e, "creating PostgreSQL pool"))?
            }
        };

        // Test connection
        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "testing PostgreSQL connection"))?;
        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL: {} (sslmode={:?})",
            redact(dsn),
            ssl_mode
        );
        if ssl_mode == SslMode::Prefer {
            debug!("sslmode=prefer: falling back to plain TCP if the server refuses TLS");
        }

        Ok(Self { pool })
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn session(&self) -> Result<Box<dyn Session>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "getting PostgreSQL connection"))?;
        Ok(Box::new(PostgresSession { client }))
    }

    async fn close(&self) {
        self.pool.close();
    }
}

/// One pooled PostgreSQL connection.
pub struct PostgresSession {
    client: Object,
}

#[async_trait]
impl Session for PostgresSession {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn exec(&mut self, sql: &str) -> Result<u64> {
        debug!("exec: {}", first_line(sql));
        let messages = self.client.simple_query(sql).await?;
        Ok(messages
            .iter()
            .map(|m| match m {
                SimpleQueryMessage::CommandComplete(n) => *n,
                _ => 0,
            })
            .sum())
    }

    async fn exec_params(&mut self, sql: &str, params: &[SqlValue<'_>]) -> Result<u64> {
        debug!("exec_params: {} ({} params)", first_line(sql), params.len());
        let bound: Vec<PgParam<'_, '_>> = params.iter().map(PgParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        Ok(self.client.execute(sql, &refs).await?)
    }

    async fn query_each(
        &mut self,
        sql: &str,
        params: &[SqlValue<'_>],
        sink: &mut RowSink<'_>,
    ) -> Result<()> {
        if params.is_empty() {
            // Simple protocol: every column arrives as text, whatever its type.
            let messages = self.client.simple_query(sql).await?;
            let mut columns: Option<Arc<[String]>> = None;
            for message in messages {
                if let SimpleQueryMessage::Row(row) = message {
                    let cols = columns
                        .get_or_insert_with(|| {
                            row.columns().iter().map(|c| c.name().to_string()).collect()
                        })
                        .clone();
                    let values = (0..row.len())
                        .map(|i| match row.get(i) {
                            Some(s) => SqlValue::text_owned(s.to_string()),
                            None => SqlValue::Null(SqlNullType::String),
                        })
                        .collect();
                    sink(Row::new(cols, values))?;
                }
            }
            return Ok(());
        }

        let bound: Vec<PgParam<'_, '_>> = params.iter().map(PgParam).collect();
        let stream = self
            .client
            .query_raw(sql, bound.iter().map(|p| p as &(dyn ToSql + Sync)))
            .await?;
        pin_mut!(stream);

        let mut columns: Option<Arc<[String]>> = None;
        while let Some(row) = stream.try_next().await? {
            let cols = columns
                .get_or_insert_with(|| row.columns().iter().map(|c| c.name().to_string()).collect())
                .clone();
            let mut values = Vec::with_capacity(row.len());
            for (idx, column) in row.columns().iter().enumerate() {
                values.push(decode_value(&row, idx, column.type_()).map_err(|e| {
                    MigrateError::sql(sql, format!("column {}: {}", column.name(), e))
                })?);
            }
            sink(Row::new(cols, values))?;
        }
        Ok(())
    }
}

fn first_line(sql: &str) -> &str {
    sql.trim().lines().next().unwrap_or("")
}

type DecodeError = Box<dyn StdError + Sync + Send>;

/// Decode one column of a typed (extended-protocol) row.
fn decode_value(
    row: &tokio_postgres::Row,
    idx: usize,
    ty: &Type,
) -> std::result::Result<SqlValue<'static>, DecodeError> {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(SqlValue::Bool),
        Type::INT2 => row.try_get::<_, Option<i16>>(idx)?.map(|v| SqlValue::I64(v.into())),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx)?.map(|v| SqlValue::I64(v.into())),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::I64),
        Type::OID => row.try_get::<_, Option<u32>>(idx)?.map(|v| SqlValue::I64(v.into())),
        Type::FLOAT4 => row.try_get::<_, Option<f32>>(idx)?.map(|v| SqlValue::F64(v.into())),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(SqlValue::F64),
        Type::NUMERIC => row
            .try_get::<_, Option<rust_decimal::Decimal>>(idx)?
            .map(SqlValue::Decimal),
        Type::UUID => row.try_get::<_, Option<uuid::Uuid>>(idx)?.map(SqlValue::Uuid),
        Type::TIMESTAMP => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)?
            .map(SqlValue::DateTime),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)?
            .map(|v| SqlValue::DateTimeOffset(v.fixed_offset())),
        Type::DATE => row.try_get::<_, Option<chrono::NaiveDate>>(idx)?.map(SqlValue::Date),
        Type::TIME => row.try_get::<_, Option<chrono::NaiveTime>>(idx)?.map(SqlValue::Time),
        Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(SqlValue::bytes_owned),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(|v| SqlValue::text_owned(v.to_string())),
        _ => row.try_get::<_, Option<String>>(idx)?.map(SqlValue::text_owned),
    };
    Ok(value.unwrap_or(SqlValue::Null(null_type_for(ty))))
}

fn null_type_for(ty: &Type) -> SqlNullType {
    match *ty {
        Type::BOOL => SqlNullType::Bool,
        Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => SqlNullType::I64,
        Type::FLOAT4 | Type::FLOAT8 => SqlNullType::F64,
        Type::NUMERIC => SqlNullType::Decimal,
        Type::UUID => SqlNullType::Uuid,
        Type::TIMESTAMP => SqlNullType::DateTime,
        Type::TIMESTAMPTZ => SqlNullType::DateTimeOffset,
        Type::DATE => SqlNullType::Date,
        Type::TIME => SqlNullType::Time,
        Type::BYTEA => SqlNullType::Bytes,
        _ => SqlNullType::String,
    }
}

/// Text-format parameter. The server parses the text as the inferred type.
#[derive(Debug)]
struct PgParam<'v, 'a>(&'v SqlValue<'a>);

impl ToSql for PgParam<'_, '_> {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, DecodeError> {
        match self.0 {
            SqlValue::Null(_) => Ok(IsNull::Yes),
            SqlValue::Bool(v) => {
                out.put_slice(if *v { b"t" } else { b"f" });
                Ok(IsNull::No)
            }
            SqlValue::Bytes(b) => {
                out.put_slice(b"\\x");
                out.put_slice(hex::encode(b).as_bytes());
                Ok(IsNull::No)
            }
            other => {
                let text = other.to_text().unwrap_or_default();
                out.put_slice(text.as_bytes());
                Ok(IsNull::No)
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    to_sql_checked!();
}
