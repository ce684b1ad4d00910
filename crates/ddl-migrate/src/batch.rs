//! Batched multi-row INSERT and upsert.
//!
//! Rows come from a producer callback and are flushed as one prepared
//! statement per batch. With key columns the statement becomes an upsert:
//!
//! - Postgres, SQLite: `INSERT ... ON CONFLICT (...) DO UPDATE SET c = EXCLUDED.c`
//! - MySQL: `INSERT ... ON DUPLICATE KEY UPDATE c = VALUES(c)`
//! - SQL Server: `MERGE ... USING (VALUES ...) AS src`

use tracing::debug;

use crate::core::dialect::Dialect;
use crate::core::identifier::{qualify, quote_identifier, quote_literal};
use crate::core::traits::Session;
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};

/// SQL Server rejects table value constructors with more than 1000 rows.
const MSSQL_MAX_VALUES_ROWS: usize = 1000;

/// Outcome of one producer call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Produce {
    /// The buffer holds a row.
    Continue,
    /// No more rows; the buffer is ignored.
    End,
}

/// Target table and batching parameters.
#[derive(Debug, Clone)]
pub struct BatchInsert {
    pub dialect: Dialect,
    pub schema: String,
    pub table: String,
    /// Schema that is left unqualified in generated SQL.
    pub current_schema: String,
    pub columns: Vec<String>,
    /// Conflict target. Empty means plain INSERT.
    pub key_columns: Vec<String>,
    pub identity_columns: Vec<String>,
    pub batch_size: usize,
}

impl BatchInsert {
    pub fn new(dialect: Dialect, table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            dialect,
            schema: String::new(),
            table: table.into(),
            current_schema: String::new(),
            columns,
            key_columns: Vec::new(),
            identity_columns: Vec::new(),
            batch_size: 500,
        }
    }

    pub fn schema(mut self, schema: impl Into<String>, current_schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self.current_schema = current_schema.into();
        self
    }

    pub fn keys(mut self, key_columns: Vec<String>) -> Self {
        self.key_columns = key_columns;
        self
    }

    pub fn identity(mut self, identity_columns: Vec<String>) -> Self {
        self.identity_columns = identity_columns;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    fn qualified_table(&self) -> String {
        qualify(self.dialect, &self.schema, &self.table, &self.current_schema)
    }

    /// Rows per statement after applying the dialect's parameter ceiling.
    pub fn rows_per_statement(&self) -> usize {
        let ncols = self.columns.len().max(1);
        let mut limit = (self.dialect.max_params() / ncols).max(1);
        if self.dialect == Dialect::SqlServer {
            limit = limit.min(MSSQL_MAX_VALUES_ROWS);
        }
        self.batch_size.max(1).min(limit)
    }

    /// Statement text for `rows` rows.
    pub fn statement(&self, rows: usize) -> String {
        let d = self.dialect;
        let table = self.qualified_table();
        let cols: Vec<String> = self.columns.iter().map(|c| quote_identifier(d, c)).collect();
        let ncols = cols.len();

        let mut values = String::new();
        for r in 0..rows {
            if r > 0 {
                values.push_str(", ");
            }
            values.push('(');
            for c in 0..ncols {
                if c > 0 {
                    values.push_str(", ");
                }
                values.push_str(&d.placeholder(r * ncols + c + 1));
            }
            values.push(')');
        }

        let non_keys: Vec<&String> = cols
            .iter()
            .zip(&self.columns)
            .filter(|(_, raw)| !self.key_columns.iter().any(|k| k == *raw))
            .map(|(quoted, _)| quoted)
            .collect();
        let keys: Vec<String> = self.key_columns.iter().map(|c| quote_identifier(d, c)).collect();

        if keys.is_empty() {
            return format!("INSERT INTO {} ({}) VALUES {}", table, cols.join(", "), values);
        }

        match d {
            Dialect::Postgres | Dialect::Sqlite => {
                let action = if non_keys.is_empty() {
                    "DO NOTHING".to_string()
                } else {
                    let sets: Vec<String> = non_keys
                        .iter()
                        .map(|c| format!("{0} = EXCLUDED.{0}", c))
                        .collect();
                    format!("DO UPDATE SET {}", sets.join(", "))
                };
                format!(
                    "INSERT INTO {} ({}) VALUES {} ON CONFLICT ({}) {}",
                    table,
                    cols.join(", "),
                    values,
                    keys.join(", "),
                    action
                )
            }
            Dialect::Mysql => {
                let targets: Vec<&String> = if non_keys.is_empty() {
                    keys.iter().collect()
                } else {
                    non_keys
                };
                let sets: Vec<String> = targets
                    .iter()
                    .map(|c| format!("{0} = VALUES({0})", c))
                    .collect();
                format!(
                    "INSERT INTO {} ({}) VALUES {} ON DUPLICATE KEY UPDATE {}",
                    table,
                    cols.join(", "),
                    values,
                    sets.join(", ")
                )
            }
            Dialect::SqlServer => {
                let on: Vec<String> = keys
                    .iter()
                    .map(|k| format!("tgt.{0} = src.{0}", k))
                    .collect();
                let src_cols: Vec<String> = cols.iter().map(|c| format!("src.{}", c)).collect();
                let matched = if non_keys.is_empty() {
                    String::new()
                } else {
                    let sets: Vec<String> = non_keys
                        .iter()
                        .map(|c| format!("{0} = src.{0}", c))
                        .collect();
                    format!(" WHEN MATCHED THEN UPDATE SET {}", sets.join(", "))
                };
                format!(
                    "MERGE INTO {} AS tgt USING (VALUES {}) AS src ({}) ON {}{} \
                     WHEN NOT MATCHED THEN INSERT ({}) VALUES ({});",
                    table,
                    values,
                    cols.join(", "),
                    on.join(" AND "),
                    matched,
                    cols.join(", "),
                    src_cols.join(", ")
                )
            }
        }
    }

    /// Index positions of identity columns within `columns`.
    fn identity_positions(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                self.identity_columns
                    .iter()
                    .any(|i| i.eq_ignore_ascii_case(c))
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Pull rows from `produce` until it returns [`Produce::End`], inserting
    /// them in batches. Returns the rows affected as reported by the database.
    pub async fn run<F>(&self, session: &mut dyn Session, mut produce: F) -> Result<u64>
    where
        F: FnMut(&mut Vec<SqlValue<'static>>) -> Result<Produce> + Send,
    {
        let ncols = self.columns.len();
        if ncols == 0 {
            return Err(MigrateError::Config(format!(
                "no columns to insert into {}",
                self.table
            )));
        }
        let per_statement = self.rows_per_statement();
        let identity = self.identity_positions();

        let mut params: Vec<SqlValue<'static>> = Vec::with_capacity(per_statement * ncols);
        let mut row: Vec<SqlValue<'static>> = Vec::with_capacity(ncols);
        let mut identity_seen = false;
        let mut batch_has_identity = false;
        let mut total = 0u64;

        loop {
            row.clear();
            let step = produce(&mut row)?;
            if step == Produce::Continue {
                if row.len() != ncols {
                    return Err(MigrateError::load(
                        &self.table,
                        format!("row has {} values, expected {}", row.len(), ncols),
                    ));
                }
                if identity.iter().any(|&i| !row[i].is_null()) {
                    batch_has_identity = true;
                }
                params.append(&mut row);
            }

            let rows = params.len() / ncols;
            let full = rows >= per_statement;
            if (full || step == Produce::End) && rows > 0 {
                total += self.flush(session, &params, rows, batch_has_identity).await?;
                identity_seen |= batch_has_identity;
                batch_has_identity = false;
                params.clear();
            }
            if step == Produce::End {
                break;
            }
        }

        if identity_seen {
            self.sync_sequences(session).await?;
        }
        Ok(total)
    }

    /// Statement for `rows` rows that carry explicit identity values.
    ///
    /// SQL Server needs `IDENTITY_INSERT` switched on around the insert; other
    /// dialects accept the values as they are.
    pub fn identity_statement(&self, rows: usize) -> String {
        let sql = self.statement(rows);
        if self.dialect != Dialect::SqlServer {
            return sql;
        }
        let table = self.qualified_table();
        let body = if sql.ends_with(';') { sql } else { format!("{};", sql) };
        format!("SET IDENTITY_INSERT {0} ON; {1} SET IDENTITY_INSERT {0} OFF;", table, body)
    }

    /// Postgres statements that move each identity sequence past the largest
    /// stored value. Empty for other dialects.
    pub fn sequence_sync_statements(&self) -> Vec<String> {
        if self.dialect != Dialect::Postgres {
            return Vec::new();
        }
        let table = self.qualified_table();
        self.identity_columns
            .iter()
            .map(|col| {
                format!(
                    "SELECT setval(pg_get_serial_sequence({}, {}), COALESCE((SELECT MAX({}) FROM {}), 0) + 1, false)",
                    quote_literal(Dialect::Postgres, &table),
                    quote_literal(Dialect::Postgres, col),
                    quote_identifier(Dialect::Postgres, col),
                    table
                )
            })
            .collect()
    }

    async fn flush(
        &self,
        session: &mut dyn Session,
        params: &[SqlValue<'static>],
        rows: usize,
        has_identity: bool,
    ) -> Result<u64> {
        let sql = if has_identity {
            self.identity_statement(rows)
        } else {
            self.statement(rows)
        };
        debug!("{}: inserting {} rows", self.table, rows);
        session
            .exec_params(&sql, params)
            .await
            .map_err(|e| MigrateError::sql(first_line(&sql), e))
    }

    async fn sync_sequences(&self, session: &mut dyn Session) -> Result<()> {
        for sql in self.sequence_sync_statements() {
            debug!("{}: syncing identity sequence", self.table);
            session.exec(&sql).await.map_err(|e| MigrateError::sql(&sql, e))?;
        }
        Ok(())
    }
}

fn first_line(sql: &str) -> String {
    let line = sql.lines().next().unwrap_or("");
    match line.find(" VALUES ") {
        Some(pos) => format!("{} VALUES ...", &line[..pos]),
        None => line.to_string(),
    }
}
