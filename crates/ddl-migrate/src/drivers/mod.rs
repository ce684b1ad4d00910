//! Database driver implementations.
//!
//! Each driver provides a [`Database`] pool, its [`Session`] and a catalog
//! introspector:
//!
//! - [`sqlite`]: sqlx, a single-connection pool
//! - [`postgres`]: tokio-postgres over deadpool with rustls
//! - [`mysql`]: mysql_async
//! - [`mssql`]: Tiberius over bb8
//!
//! [`connect`] recognizes a DSN and opens the matching driver; [`introspect`]
//! dispatches on the session's dialect.

pub mod common;
pub mod dsn;
pub mod mssql;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

use tracing::debug;

pub use common::{SslMode, TlsBuilder};
pub use mssql::MssqlDatabase;
pub use mysql::MysqlDatabase;
pub use postgres::PostgresDatabase;
pub use sqlite::SqliteDatabase;

use crate::core::catalog::Catalog;
use crate::core::dialect::Dialect;
use crate::core::traits::{Database, Session};
use crate::error::Result;

/// Open a pool for `dsn`.
pub async fn connect(dsn: &str) -> Result<Arc<dyn Database>> {
    let normalized = dsn::normalize(dsn)?;
    debug!(
        "connecting with driver {} to {}",
        normalized.driver_name,
        dsn::redact(&normalized.dsn)
    );
    let db: Arc<dyn Database> = match normalized.dialect {
        Dialect::Sqlite => Arc::new(SqliteDatabase::connect(&normalized.dsn).await?),
        Dialect::Postgres => Arc::new(PostgresDatabase::connect(&normalized.dsn).await?),
        Dialect::Mysql => Arc::new(MysqlDatabase::connect(&normalized.dsn).await?),
        Dialect::SqlServer => Arc::new(MssqlDatabase::connect(&normalized.dsn).await?),
    };
    Ok(db)
}

/// Read the full catalog visible to `session`.
pub async fn introspect(session: &mut dyn Session) -> Result<Catalog> {
    match session.dialect() {
        Dialect::Sqlite => sqlite::introspect::introspect(session).await,
        Dialect::Postgres => postgres::introspect::introspect(session).await,
        Dialect::Mysql => mysql::introspect::introspect(session).await,
        Dialect::SqlServer => mssql::introspect::introspect(session).await,
    }
}
