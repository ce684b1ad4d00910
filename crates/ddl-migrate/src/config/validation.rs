//! Configuration validation.

use super::{DumpOptions, LoadOptions, MigrateOptions};
use crate::core::identifier::validate_identifier;
use crate::error::{MigrateError, Result};

/// Validate migrate options.
pub fn validate_migrate(opts: &MigrateOptions) -> Result<()> {
    if opts.history_table.trim().is_empty() {
        return Err(MigrateError::Config(
            "history table name cannot be empty".into(),
        ));
    }
    for part in opts.history_table.split('.') {
        if part.is_empty() {
            return Err(MigrateError::Config(format!(
                "history table name {:?} has an empty part",
                opts.history_table
            )));
        }
        validate_identifier(part)?;
    }
    if opts.retry.max_attempts == 0 {
        return Err(MigrateError::Config(
            "max-attempts must be at least 1".into(),
        ));
    }
    if opts.retry.base_delay > opts.retry.max_delay {
        return Err(MigrateError::Config(format!(
            "base-delay ({:?}) cannot exceed max-delay ({:?})",
            opts.retry.base_delay, opts.retry.max_delay
        )));
    }
    Ok(())
}

/// Validate load options.
pub fn validate_load(opts: &LoadOptions) -> Result<()> {
    if opts.batch_size == 0 {
        return Err(MigrateError::Config("batchsize must be at least 1".into()));
    }
    if let Some(s) = &opts.null_string {
        if s.is_empty() {
            return Err(MigrateError::Config(
                "nullstring cannot be empty (use --no-nullstring instead)".into(),
            ));
        }
    }
    if let Some(s) = &opts.binary_prefix {
        if s.is_empty() {
            return Err(MigrateError::Config(
                "binaryprefix cannot be empty (use --no-binaryprefix instead)".into(),
            ));
        }
    }
    Ok(())
}

/// Validate dump options.
pub fn validate_dump(opts: &DumpOptions) -> Result<()> {
    if opts.data_only && opts.schema_only {
        return Err(MigrateError::Config(
            "--data-only and --schema-only are mutually exclusive".into(),
        ));
    }
    if opts.output_dir.as_os_str().is_empty() {
        return Err(MigrateError::Config("--output-dir is required".into()));
    }
    if opts.schema_only && !opts.subsets.is_empty() {
        return Err(MigrateError::Config(
            "--subset cannot be combined with --schema-only".into(),
        ));
    }
    Ok(())
}
