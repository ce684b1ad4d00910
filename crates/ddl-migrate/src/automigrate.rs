//! Diff the live database against a desired catalog and apply the result.
//!
//! Destinations are JSON catalog files or DSNs of reference databases.
//! Several destinations are merged when they describe disjoint tables.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{DiffOptions, MigrateOptions};
use crate::core::catalog::{names_equal, Catalog, Schema};
use crate::core::traits::Session;
use crate::diff::{self, DiffOutput};
use crate::drivers;
use crate::error::{MigrateError, Result};
use crate::history::HistoryStore;
use crate::runner::{RunSummary, Reporter, Runner};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutomigrateOptions {
    /// JSON catalog files or DSNs.
    pub dest: Vec<String>,
    pub diff: DiffOptions,
    pub migrate: MigrateOptions,
    pub accept_warnings: bool,
    pub dry_run: bool,
}

#[derive(Debug, Default)]
pub struct AutomigrateSummary {
    pub diff: DiffOutput,
    /// None for dry runs and empty diffs.
    pub run: Option<RunSummary>,
}

fn is_catalog_file(entry: &str) -> bool {
    Path::new(entry)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Read one destination: a serialized catalog or a database to introspect.
pub async fn load_destination(entry: &str) -> Result<Catalog> {
    if is_catalog_file(entry) {
        let data = std::fs::read(entry)
            .map_err(|e| MigrateError::Config(format!("cannot read catalog {}: {}", entry, e)))?;
        let catalog: Catalog = serde_json::from_slice(&data)?;
        info!("destination {}: {} table(s) from file", entry, catalog.tables().count());
        return Ok(catalog);
    }
    let db = drivers::connect(entry).await?;
    let catalog = {
        let mut session = db.session().await?;
        drivers::introspect(session.as_mut()).await
    };
    db.close().await;
    let catalog = catalog?;
    info!("destination {}: {} table(s) introspected", drivers::dsn::redact(entry), catalog.tables().count());
    Ok(catalog)
}

/// Combine destinations that describe disjoint tables.
pub fn merge(catalogs: Vec<Catalog>) -> Result<Catalog> {
    let mut iter = catalogs.into_iter();
    let Some(mut merged) = iter.next() else {
        return Err(MigrateError::Config("no destination given".into()));
    };
    for mut other in iter {
        if other.dialect != merged.dialect {
            return Err(MigrateError::Config(format!(
                "destinations mix {} and {} catalogs",
                merged.dialect, other.dialect
            )));
        }
        let d = merged.dialect;
        for schema in std::mem::take(&mut other.schemas) {
            let name = other.schema_name(&schema.name).to_string();
            let position = merged
                .schemas
                .iter()
                .position(|s| names_equal(d, merged.schema_name(&s.name), &name));
            let target = match position {
                Some(i) => &mut merged.schemas[i],
                None => {
                    merged.schemas.push(Schema {
                        name: schema.name.clone(),
                        ignore: schema.ignore,
                        ..Default::default()
                    });
                    let last = merged.schemas.len() - 1;
                    &mut merged.schemas[last]
                }
            };
            for table in schema.tables {
                if target.tables.iter().any(|t| names_equal(d, &t.name, &table.name)) {
                    return Err(MigrateError::Config(format!(
                        "table {}.{} is described by more than one destination",
                        name, table.name
                    )));
                }
                target.tables.push(table);
            }
            target.views.extend(schema.views);
            target.routines.extend(schema.routines);
            target.enums.extend(schema.enums);
            target.domains.extend(schema.domains);
        }
    }
    Ok(merged)
}

fn ignore_history(catalog: &mut Catalog, store: &HistoryStore) {
    let d = catalog.dialect;
    let schema = catalog.schema_name(store.schema()).to_string();
    let current = catalog.current_schema.clone();
    for s in &mut catalog.schemas {
        let name = if s.name.is_empty() { current.as_str() } else { s.name.as_str() };
        if !names_equal(d, name, &schema) {
            continue;
        }
        for t in &mut s.tables {
            if names_equal(d, &t.name, store.table()) {
                t.ignore = true;
            }
        }
    }
}

/// Make `dest` comparable with the live catalog `src`.
pub fn prepare(src: &mut Catalog, dest: &mut Catalog, history_table: &str) -> Result<()> {
    if src.dialect != dest.dialect {
        return Err(MigrateError::Config(format!(
            "cannot migrate a {} database to a {} catalog",
            src.dialect, dest.dialect
        )));
    }
    if dest.version_nums.is_empty() {
        dest.version_nums = src.version_nums.clone();
    }
    if dest.current_schema.is_empty() {
        dest.current_schema = src.current_schema.clone();
    }
    let store = HistoryStore::new(src.dialect, history_table);
    ignore_history(src, &store);
    ignore_history(dest, &store);
    Ok(())
}

/// Diff the database behind `session` against `opts.dest` and apply or print the result.
pub async fn automigrate(
    session: &mut dyn Session,
    opts: &AutomigrateOptions,
    mut reporter: Reporter,
    cancel: &CancellationToken,
) -> Result<AutomigrateSummary> {
    let mut src = drivers::introspect(session).await?;
    let mut dests = Vec::with_capacity(opts.dest.len());
    for entry in &opts.dest {
        dests.push(load_destination(entry).await?);
    }
    let mut dest = merge(dests)?;
    prepare(&mut src, &mut dest, &opts.migrate.history_table)?;

    let output = diff::diff(&src, &dest, &opts.diff)?;
    if !output.warnings.is_empty() {
        for w in &output.warnings {
            warn!("{}", w);
            reporter.error_line(&format!("warning: {}", w));
        }
        if !opts.accept_warnings {
            reporter.flush();
            return Err(MigrateError::Warnings(output.warnings.clone()));
        }
    }

    if opts.dry_run {
        for m in &output.migrations {
            reporter.line(&format!("-- {}", m.filename));
            reporter.line(m.sql.trim_end());
        }
        reporter.flush();
        return Ok(AutomigrateSummary { diff: output, run: None });
    }
    if output.is_empty() {
        info!("database already matches the destination");
        return Ok(AutomigrateSummary { diff: output, run: None });
    }

    let fs = output.to_memfs();
    let mut runner = Runner::new(src.dialect, opts.migrate.clone()).with_reporter(reporter);
    let run = runner.run(session, &fs, &output.filenames(), cancel).await?;
    Ok(AutomigrateSummary {
        diff: output,
        run: Some(run),
    })
}
