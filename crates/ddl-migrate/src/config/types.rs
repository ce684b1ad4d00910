//! Option types for each command, with defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default name of the history table.
pub const DEFAULT_HISTORY_TABLE: &str = "ddl_history";

/// Root of the optional YAML configuration file.
///
/// Every field is optional; command-line flags override whatever is set here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Database DSN.
    pub db: Option<String>,

    /// Migration directory.
    pub dir: Option<PathBuf>,

    /// History table name.
    pub history_table: Option<String>,

    /// Lock timeout as a duration string ("5s", "500ms").
    pub lock_timeout: Option<String>,

    /// Retry behaviour for lock timeouts.
    pub retry: Option<RetryFileConfig>,

    /// CSV loader settings.
    pub load: Option<LoadFileConfig>,
}

/// `retry:` block of the YAML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryFileConfig {
    pub max_attempts: Option<u32>,
    pub base_delay: Option<String>,
    pub max_delay: Option<String>,
}

/// `load:` block of the YAML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadFileConfig {
    pub batch_size: Option<usize>,
    pub null_string: Option<String>,
    pub binary_prefix: Option<String>,
    pub timestamp_as_integer: Option<bool>,
}

/// Exponential back-off parameters for lock-timeout retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts per retryable flush (default: 10).
    pub max_attempts: u32,

    /// Lower bound of each sleep (default: 1s).
    pub base_delay: Duration,

    /// Upper bound of each sleep (default: 5m).
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
        }
    }
}

/// Options for `migrate` and the execution half of `automigrate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateOptions {
    /// History table name (default: "ddl_history").
    pub history_table: String,

    /// Session lock timeout; zero leaves the server default untouched.
    pub lock_timeout: Duration,

    /// Retry behaviour for lock timeouts.
    pub retry: RetryPolicy,

    /// Print timestamps and transaction boundaries.
    pub verbose: bool,

    /// Do not read or write the history table.
    pub skip_history: bool,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            history_table: DEFAULT_HISTORY_TABLE.to_string(),
            lock_timeout: Duration::ZERO,
            retry: RetryPolicy::default(),
            verbose: false,
            skip_history: false,
        }
    }
}

/// Options for the diff engines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffOptions {
    /// Emit DROP statements for objects present only in the source.
    pub drop_objects: bool,

    /// Filename prefix; empty means a UTC timestamp.
    pub prefix: String,
}

/// Options for `load`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Rows per INSERT statement (default: 500).
    pub batch_size: usize,

    /// Cell value that decodes to NULL; `None` disables the sentinel.
    pub null_string: Option<String>,

    /// Prefix marking hex-encoded binary cells; `None` disables decoding.
    pub binary_prefix: Option<String>,

    /// Store SQLite TIMESTAMP/DATETIME/DATE cells as Unix seconds.
    pub timestamp_as_integer: bool,

    /// Print one line per loaded file.
    pub verbose: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: 500,
            null_string: Some("\\N".to_string()),
            binary_prefix: Some("0x".to_string()),
            timestamp_as_integer: false,
            verbose: false,
        }
    }
}

/// Archive format for dump output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveFormat {
    Zip(String),
    Tgz(String),
}

/// A subset query for dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsetQuery {
    pub query: String,
    /// Also follow foreign keys that point at collected rows.
    pub extended: bool,
}

/// Options for `dump`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DumpOptions {
    pub output_dir: PathBuf,
    pub data_only: bool,
    pub schema_only: bool,
    pub archive: Option<ArchiveFormat>,
    pub subsets: Vec<SubsetQuery>,
}
