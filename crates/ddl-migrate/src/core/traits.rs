//! Core traits for database-agnostic execution.
//!
//! - [`Database`]: a pooled handle for one DSN
//! - [`Session`]: one connection checked out of the pool, held for a whole
//!   command so session-scoped settings apply uniformly
//!
//! Transactions are driven with plain `BEGIN`/`COMMIT`/`ROLLBACK` text on the
//! session, which keeps every engine on the same code path for all four drivers.

use async_trait::async_trait;

use super::dialect::Dialect;
use super::value::{Row, SqlValue};
use crate::error::Result;

/// Callback invoked for each streamed row.
pub type RowSink<'a> = dyn FnMut(Row) -> Result<()> + Send + 'a;

/// One database connection.
#[async_trait]
pub trait Session: Send {
    /// Dialect of the connected server.
    fn dialect(&self) -> Dialect;

    /// Execute a script that may contain several statements. No parameters.
    ///
    /// Returns the number of rows affected where the driver reports it.
    async fn exec(&mut self, sql: &str) -> Result<u64>;

    /// Execute a single statement with positional parameters.
    async fn exec_params(&mut self, sql: &str, params: &[SqlValue<'_>]) -> Result<u64>;

    /// Stream the rows of a query into `sink`.
    async fn query_each(
        &mut self,
        sql: &str,
        params: &[SqlValue<'_>],
        sink: &mut RowSink<'_>,
    ) -> Result<()>;

    /// Collect every row of a query.
    async fn query(&mut self, sql: &str, params: &[SqlValue<'_>]) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        self.query_each(sql, params, &mut |row| {
            rows.push(row);
            Ok(())
        })
        .await?;
        Ok(rows)
    }

    /// First row of a query, if any.
    async fn query_row(&mut self, sql: &str, params: &[SqlValue<'_>]) -> Result<Option<Row>> {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    async fn begin(&mut self) -> Result<()> {
        let sql = self.dialect().begin_sql();
        self.exec(sql).await.map(|_| ())
    }

    async fn commit(&mut self) -> Result<()> {
        let sql = self.dialect().commit_sql();
        self.exec(sql).await.map(|_| ())
    }

    async fn rollback(&mut self) -> Result<()> {
        let sql = self.dialect().rollback_sql();
        self.exec(sql).await.map(|_| ())
    }
}

/// A pooled database handle.
///
/// Implementations must be `Send + Sync` so parallel CSV loads can share one handle.
#[async_trait]
pub trait Database: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Check a connection out of the pool.
    async fn session(&self) -> Result<Box<dyn Session>>;

    /// Close the pool.
    async fn close(&self);
}
