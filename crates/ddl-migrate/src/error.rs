//! Error types for the migration library.

use thiserror::Error;

/// Exit code for configuration, DSN and refused-warning errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for a failed migration script or CSV load.
pub const EXIT_MIGRATION_FAILED: u8 = 2;
/// Exit code for driver and pool failures.
pub const EXIT_DATABASE_ERROR: u8 = 3;
/// Exit code for filesystem and archive failures.
pub const EXIT_IO_ERROR: u8 = 7;
/// Exit code after SIGINT/SIGTERM.
pub const EXIT_CANCELLED: u8 = 130;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid flags, YAML, durations, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// DSN could not be recognized or parsed
    #[error("Invalid DSN: {0}")]
    Dsn(String),

    /// PostgreSQL driver error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// MySQL driver error
    #[error("MySQL error: {0}")]
    Mysql(#[from] mysql_async::Error),

    /// SQL Server driver error
    #[error("SQL Server error: {0}")]
    Mssql(#[from] tiberius::error::Error),

    /// SQLite driver error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Statement failed; carries the offending SQL for context
    #[error("{message}\n  Statement: {statement}")]
    Sql { statement: String, message: String },

    /// Catalog introspection failed
    #[error("Introspection failed: {0}")]
    Introspection(String),

    /// A migration script failed. The undo annotation is informational.
    #[error("{filename}: {source}{}", undo_note(.undo))]
    Migration {
        filename: String,
        source: Box<MigrateError>,
        undo: Option<String>,
    },

    /// Loading a CSV or SQL file failed
    #[error("Load failed for {file}: {message}")]
    Load { file: String, message: String },

    /// History table inconsistency (missing row on rename, etc.)
    #[error("History error: {0}")]
    History(String),

    /// Diff produced warnings and they were not accepted
    #[error("{} warning(s) raised; rerun with --accept-warnings to proceed", .0.len())]
    Warnings(Vec<String>),

    /// Archive could not be read or written
    #[error("Archive error: {0}")]
    Archive(String),

    /// Zip archive error
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// CSV decode/encode error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation was cancelled (SIGINT, etc.)
    #[error("Operation cancelled")]
    Cancelled,
}

fn undo_note(undo: &Option<String>) -> String {
    match undo {
        Some(note) => format!(" ({})", note),
        None => String::new(),
    }
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Attach the failing statement to an error.
    pub fn sql(statement: impl Into<String>, err: impl std::fmt::Display) -> Self {
        MigrateError::Sql {
            statement: truncate_statement(&statement.into()),
            message: err.to_string(),
        }
    }

    /// Create a Load error
    pub fn load(file: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Load {
            file: file.into(),
            message: message.into(),
        }
    }

    /// Wrap an error with the migration filename that produced it.
    pub fn migration(filename: impl Into<String>, source: MigrateError) -> Self {
        MigrateError::Migration {
            filename: filename.into(),
            source: Box::new(source),
            undo: None,
        }
    }

    /// Whether the database reported a lock timeout. These are retried by the runner.
    pub fn is_lock_timeout(&self) -> bool {
        match self {
            MigrateError::Postgres(e) => e
                .code()
                .is_some_and(|c| *c == tokio_postgres::error::SqlState::LOCK_NOT_AVAILABLE),
            MigrateError::Mysql(mysql_async::Error::Server(e)) => e.code == 1205,
            MigrateError::Mssql(tiberius::error::Error::Server(e)) => e.code() == 1222,
            MigrateError::Sqlite(sqlx::Error::Database(e)) => {
                e.code().is_some_and(|c| c == "5" || c == "6")
                    || e.message().contains("database is locked")
            }
            MigrateError::Sql { message, .. } => {
                message.contains("lock timeout")
                    || message.contains("database is locked")
                    || message.contains("Lock wait timeout exceeded")
            }
            MigrateError::Migration { source, .. } => source.is_lock_timeout(),
            _ => false,
        }
    }

    /// Whether this error (or the error it wraps) is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            MigrateError::Cancelled => true,
            MigrateError::Migration { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Dsn(_) | MigrateError::Warnings(_) => {
                EXIT_CONFIG_ERROR
            }
            MigrateError::Yaml(_) | MigrateError::Json(_) => EXIT_CONFIG_ERROR,
            MigrateError::Migration { source, .. } if source.is_cancelled() => EXIT_CANCELLED,
            MigrateError::Migration { .. }
            | MigrateError::Load { .. }
            | MigrateError::Sql { .. }
            | MigrateError::History(_)
            | MigrateError::Csv(_) => EXIT_MIGRATION_FAILED,
            MigrateError::Postgres(_)
            | MigrateError::Mysql(_)
            | MigrateError::Mssql(_)
            | MigrateError::Sqlite(_)
            | MigrateError::Pool { .. }
            | MigrateError::Introspection(_) => EXIT_DATABASE_ERROR,
            MigrateError::Io(_) | MigrateError::Zip(_) | MigrateError::Archive(_) => EXIT_IO_ERROR,
            MigrateError::Cancelled => EXIT_CANCELLED,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        if let MigrateError::Warnings(warnings) = self {
            for warning in warnings {
                output.push_str(&format!("  warning: {}\n", warning));
            }
        }

        // Add error chain for wrapped errors
        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

fn truncate_statement(statement: &str) -> String {
    const MAX: usize = 500;
    let trimmed = statement.trim();
    if trimmed.len() <= MAX {
        return trimmed.to_string();
    }
    let mut end = MAX;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
