//! Configuration loading, duration parsing and validation.

mod types;
pub mod validation;

pub use types::*;

use std::path::Path;
use std::time::Duration;

use crate::error::{MigrateError, Result};

impl FileConfig {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Err(MigrateError::Config("configuration file is empty".into()));
        }
        let config: FileConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate durations and numeric fields without touching a database.
    pub fn validate(&self) -> Result<()> {
        self.apply_migrate(&mut MigrateOptions::default())?;
        self.apply_load(&mut LoadOptions::default())?;
        Ok(())
    }

    /// Copy file values onto migrate options.
    pub fn apply_migrate(&self, opts: &mut MigrateOptions) -> Result<()> {
        if let Some(table) = &self.history_table {
            opts.history_table = table.clone();
        }
        if let Some(timeout) = &self.lock_timeout {
            opts.lock_timeout = parse_duration(timeout)?;
        }
        if let Some(retry) = &self.retry {
            if let Some(n) = retry.max_attempts {
                opts.retry.max_attempts = n;
            }
            if let Some(d) = &retry.base_delay {
                opts.retry.base_delay = parse_duration(d)?;
            }
            if let Some(d) = &retry.max_delay {
                opts.retry.max_delay = parse_duration(d)?;
            }
        }
        validation::validate_migrate(opts)
    }

    /// Copy file values onto load options.
    pub fn apply_load(&self, opts: &mut LoadOptions) -> Result<()> {
        if let Some(load) = &self.load {
            if let Some(n) = load.batch_size {
                opts.batch_size = n;
            }
            if let Some(s) = &load.null_string {
                opts.null_string = Some(s.clone());
            }
            if let Some(s) = &load.binary_prefix {
                opts.binary_prefix = Some(s.clone());
            }
            if let Some(b) = load.timestamp_as_integer {
                opts.timestamp_as_integer = b;
            }
        }
        validation::validate_load(opts)
    }
}

/// Parse a Go-style duration string: "300ms", "1.5s", "1m30s", "2h", "0".
///
/// Units: ns, us (or µs), ms, s, m, h. A bare integer is taken as seconds.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    let invalid = || MigrateError::Config(format!("invalid duration '{}'", input));

    if s.is_empty() {
        return Err(invalid());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total_nanos: f64 = 0.0;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if num_len == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..num_len].parse().map_err(|_| invalid())?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let multiplier = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            _ => return Err(invalid()),
        };
        total_nanos += value * multiplier;
        rest = &rest[unit_len..];
    }

    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("5").unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("1s5").is_err());
    }

    #[test]
    fn test_from_yaml_overrides() {
        let yaml = r#"
db: "sqlite:test.db"
history_table: my_history
lock_timeout: 5s
retry:
  max_attempts: 3
  base_delay: 100ms
  max_delay: 2s
load:
  batch_size: 50
  timestamp_as_integer: true
"#;
        let config = FileConfig::from_yaml(yaml).unwrap();
        let mut opts = MigrateOptions::default();
        config.apply_migrate(&mut opts).unwrap();
        assert_eq!(opts.history_table, "my_history");
        assert_eq!(opts.lock_timeout, Duration::from_secs(5));
        assert_eq!(opts.retry.max_attempts, 3);
        assert_eq!(opts.retry.base_delay, Duration::from_millis(100));

        let mut load = LoadOptions::default();
        config.apply_load(&mut load).unwrap();
        assert_eq!(load.batch_size, 50);
        assert!(load.timestamp_as_integer);
        assert_eq!(load.null_string.as_deref(), Some("\\N"));
    }

    #[test]
    fn test_from_yaml_rejects_bad_duration() {
        let err = FileConfig::from_yaml("lock_timeout: soon\n").unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }

    #[test]
    fn test_from_yaml_rejects_unknown_field() {
        assert!(FileConfig::from_yaml("database: x\n").is_err());
    }

    #[test]
    fn test_from_yaml_empty() {
        assert!(FileConfig::from_yaml("   \n").is_err());
    }
}
