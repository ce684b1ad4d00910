//! The four supported SQL dialects and their syntax differences.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// SQL dialect tag. Every subsystem switches on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Sqlite,
    Postgres,
    Mysql,
    #[serde(alias = "mssql")]
    SqlServer,
}

impl Dialect {
    /// Parse a dialect name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not recognized.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::Mysql),
            "sqlserver" | "mssql" | "sql_server" => Ok(Dialect::SqlServer),
            other => Err(MigrateError::Config(format!(
                "Unknown dialect: '{}'. Supported dialects: sqlite, postgres, mysql, sqlserver",
                other
            ))),
        }
    }

    /// Canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
            Dialect::SqlServer => "sqlserver",
        }
    }

    /// Positional parameter placeholder (1-based).
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            Dialect::SqlServer => format!("@P{}", index),
            Dialect::Sqlite | Dialect::Mysql => "?".to_string(),
        }
    }

    /// Upper bound on bound parameters in a single statement.
    pub fn max_params(&self) -> usize {
        match self {
            Dialect::Postgres | Dialect::Mysql => 65535,
            Dialect::SqlServer => 2098,
            Dialect::Sqlite => 32766,
        }
    }

    /// Statement that opens a transaction.
    pub fn begin_sql(&self) -> &'static str {
        match self {
            Dialect::SqlServer => "BEGIN TRANSACTION",
            _ => "BEGIN",
        }
    }

    /// Statement that commits a transaction.
    pub fn commit_sql(&self) -> &'static str {
        match self {
            Dialect::SqlServer => "COMMIT TRANSACTION",
            _ => "COMMIT",
        }
    }

    /// Statement that rolls back a transaction.
    pub fn rollback_sql(&self) -> &'static str {
        match self {
            Dialect::SqlServer => "ROLLBACK TRANSACTION",
            _ => "ROLLBACK",
        }
    }

    /// Whether DDL statements participate in transactions.
    pub fn transactional_ddl(&self) -> bool {
        !matches!(self, Dialect::Mysql)
    }

    /// Whether several connections may write concurrently.
    pub fn concurrent_writers(&self) -> bool {
        !matches!(self, Dialect::Sqlite)
    }

    /// Column type for timestamps in the history table.
    pub fn timestamp_type(&self) -> &'static str {
        match self {
            Dialect::Postgres => "TIMESTAMPTZ",
            Dialect::SqlServer => "DATETIMEOFFSET",
            Dialect::Sqlite | Dialect::Mysql => "DATETIME",
        }
    }

    /// Column type for booleans in the history table.
    pub fn bool_type(&self) -> &'static str {
        match self {
            Dialect::SqlServer => "BIT",
            _ => "BOOLEAN",
        }
    }

    /// Default schema when none is set on the catalog.
    pub fn default_schema(&self) -> &'static str {
        match self {
            Dialect::Postgres => "public",
            Dialect::SqlServer => "dbo",
            Dialect::Sqlite => "main",
            Dialect::Mysql => "",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
