//! Dumper: the inverse of the loader.
//!
//! Writes `schema.sql`, one CSV per table, `indexes.sql` and
//! `constraints.sql` to a directory, a zip archive or a tgz archive. The
//! output loads back with [`crate::load::Loader`].

pub mod subset;

use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

use flate2::write::GzEncoder;
use flate2::Compression;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{ArchiveFormat, DumpOptions};
use crate::core::catalog::{Catalog, Table};
use crate::core::dialect::Dialect;
use crate::core::identifier::quote_literal;
use crate::core::normalize::normalize_column_type;
use crate::core::traits::Session;
use crate::core::value::{Row, SqlValue};
use crate::diff::render::Ddl;
use crate::drivers;
use crate::error::{MigrateError, Result};
use crate::load::csv::BINARY_TYPES;
use crate::load::{CONSTRAINTS_SQL, INDEXES_SQL, SCHEMA_SQL};

const NULL_CELL: &str = "\\N";
const BINARY_PREFIX: &str = "0x";

/// What a dump wrote.
#[derive(Debug, Clone, Default)]
pub struct DumpSummary {
    /// Directory or archive path.
    pub location: PathBuf,
    pub files: Vec<String>,
    pub rows: u64,
}

/// Destination for dump files.
enum Sink {
    Dir(PathBuf),
    Zip(zip::ZipWriter<File>),
    Tgz(tar::Builder<GzEncoder<File>>),
}

fn with_extension(name: &str, ext: &str, also: &[&str]) -> String {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(ext) || also.iter().any(|a| lower.ends_with(a)) {
        name.to_string()
    } else {
        format!("{}{}", name, ext)
    }
}

impl Sink {
    fn open(opts: &DumpOptions) -> Result<(Self, PathBuf)> {
        fs::create_dir_all(&opts.output_dir)?;
        match &opts.archive {
            None => Ok((Sink::Dir(opts.output_dir.clone()), opts.output_dir.clone())),
            Some(ArchiveFormat::Zip(name)) => {
                let path = opts.output_dir.join(with_extension(name, ".zip", &[]));
                let file = File::create(&path)?;
                Ok((Sink::Zip(zip::ZipWriter::new(file)), path))
            }
            Some(ArchiveFormat::Tgz(name)) => {
                let path = opts.output_dir.join(with_extension(name, ".tgz", &[".tar.gz"]));
                let file = File::create(&path)?;
                let gz = GzEncoder::new(file, Compression::default());
                Ok((Sink::Tgz(tar::Builder::new(gz)), path))
            }
        }
    }

    fn write(&mut self, name: &str, data: &[u8]) -> Result<()> {
        debug!("writing {} ({} bytes)", name, data.len());
        match self {
            Sink::Dir(root) => fs::write(root.join(name), data)?,
            Sink::Zip(zw) => {
                zw.start_file(name, zip::write::SimpleFileOptions::default())?;
                zw.write_all(data)?;
            }
            Sink::Tgz(tb) => {
                let mut header = tar::Header::new_gnu();
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
                header.set_cksum();
                tb.append_data(&mut header, name, data)?;
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<()> {
        match self {
            Sink::Dir(_) => {}
            Sink::Zip(zw) => {
                zw.finish()?;
            }
            Sink::Tgz(tb) => {
                tb.into_inner()?.finish()?;
            }
        }
        Ok(())
    }
}

/// CSV filename for a table: `schema.table.csv` outside the current schema.
pub fn csv_filename(catalog: &Catalog, table: &Table) -> String {
    if table.schema.is_empty() || table.schema == catalog.current_schema {
        format!("{}.csv", table.name)
    } else {
        format!("{}.{}.csv", table.schema, table.name)
    }
}

/// Columns that can be written back: not generated, not ignored.
pub(crate) fn dump_columns(table: &Table) -> Vec<String> {
    table
        .columns
        .iter()
        .filter(|c| !c.ignore && !c.is_generated)
        .map(|c| c.name.clone())
        .collect()
}

/// Text for one CSV cell.
pub fn cell_text(value: &SqlValue<'_>, binary: bool) -> String {
    match value {
        SqlValue::Null(_) => NULL_CELL.to_string(),
        SqlValue::Bytes(b) => format!("{}{}", BINARY_PREFIX, hex::encode(b)),
        // Postgres text protocol renders bytea as \x...
        SqlValue::Text(s) if binary && s.starts_with("\\x") => format!("{}{}", BINARY_PREFIX, &s[2..]),
        other => other.to_text().unwrap_or_default(),
    }
}

fn binary_flags(dialect: Dialect, table: &Table, columns: &[String]) -> Vec<bool> {
    columns
        .iter()
        .map(|name| {
            table
                .find_column(dialect, name)
                .map(|c| normalize_column_type(dialect, &c.column_type).is_one_of(BINARY_TYPES))
                .unwrap_or(false)
        })
        .collect()
}

/// `schema.sql`: schemas, types and tables with every constraint but foreign
/// keys inline. SQLite keeps foreign keys inline too.
pub fn schema_sql(catalog: &Catalog) -> String {
    let d = catalog.dialect;
    let ddl = Ddl::new(d, &catalog.current_schema);
    let mut out = String::new();
    for schema in catalog.schemas.iter().filter(|s| !s.ignore) {
        let custom = !schema.name.is_empty() && schema.name != catalog.current_schema;
        if custom && !schema.tables.is_empty() {
            match d {
                Dialect::Postgres => {
                    out.push_str(&format!("CREATE SCHEMA IF NOT EXISTS {};\n", ddl.ident(&schema.name)));
                }
                Dialect::SqlServer => out.push_str(&format!(
                    "IF SCHEMA_ID({}) IS NULL EXEC({});\n",
                    quote_literal(d, &schema.name),
                    quote_literal(d, &format!("CREATE SCHEMA {}", ddl.ident(&schema.name)))
                )),
                Dialect::Sqlite | Dialect::Mysql => {}
            }
        }
        for e in schema.enums.iter().filter(|e| !e.ignore) {
            out.push_str(&ddl.create_enum(e));
        }
        for domain in schema.domains.iter().filter(|x| !x.ignore) {
            out.push_str(&ddl.create_domain(domain));
        }
    }
    for table in catalog.tables() {
        out.push_str(&ddl.create_table(table, &ddl.table_name(table), d == Dialect::Sqlite));
    }
    out
}

/// `indexes.sql`: every secondary index.
pub fn indexes_sql(catalog: &Catalog) -> String {
    let ddl = Ddl::new(catalog.dialect, &catalog.current_schema);
    catalog
        .tables()
        .flat_map(|t| t.indexes.iter().filter(|i| !i.ignore))
        .map(|i| ddl.create_index(i, false))
        .collect()
}

/// `constraints.sql`: foreign keys. Empty on SQLite, where they are inline.
pub fn constraints_sql(catalog: &Catalog) -> String {
    if catalog.dialect == Dialect::Sqlite {
        return String::new();
    }
    let ddl = &Ddl::new(catalog.dialect, &catalog.current_schema);
    catalog
        .tables()
        .flat_map(|t| t.foreign_keys().map(move |c| ddl.add_constraint(t, c)))
        .collect()
}

/// Compare two cells: numerically when both are numbers, as text otherwise.
pub(crate) fn compare_cells(a: &SqlValue<'_>, b: &SqlValue<'_>) -> Ordering {
    match (a.to_text(), b.to_text()) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => match (x.parse::<f64>(), y.parse::<f64>()) {
            (Ok(fx), Ok(fy)) => fx.partial_cmp(&fy).unwrap_or(Ordering::Equal),
            _ => x.cmp(&y),
        },
    }
}

/// CSV bytes for `rows`, picking `columns` out of each row by name.
pub(crate) fn write_csv(
    dialect: Dialect,
    table: &Table,
    columns: &[String],
    rows: &[Row],
) -> Result<Vec<u8>> {
    let binary = binary_flags(dialect, table, columns);
    let mut writer = ::csv::Writer::from_writer(Vec::new());
    writer.write_record(columns)?;
    for row in rows {
        let mut record = Vec::with_capacity(columns.len());
        for (name, is_binary) in columns.iter().zip(&binary) {
            let idx = row.index_of(name).ok_or_else(|| {
                MigrateError::Config(format!("row for {} has no column {}", table.name, name))
            })?;
            record.push(row.get(idx).map(|v| cell_text(v, *is_binary)).unwrap_or_default());
        }
        writer.write_record(&record)?;
    }
    writer
        .into_inner()
        .map_err(|e| MigrateError::Io(std::io::Error::other(e.to_string())))
}

/// Stream a whole table, ordered by primary key, into CSV bytes.
async fn table_csv(session: &mut dyn Session, catalog: &Catalog, table: &Table) -> Result<(Vec<u8>, u64)> {
    let d = catalog.dialect;
    let ddl = Ddl::new(d, &catalog.current_schema);
    let columns = dump_columns(table);
    let binary = binary_flags(d, table, &columns);
    let mut sql = format!(
        "SELECT {} FROM {}",
        columns.iter().map(|c| ddl.ident(c)).collect::<Vec<_>>().join(", "),
        ddl.table_name(table)
    );
    let pk = table.primary_key_columns();
    if !pk.is_empty() {
        sql.push_str(&format!(
            " ORDER BY {}",
            pk.iter().map(|c| ddl.ident(c)).collect::<Vec<_>>().join(", ")
        ));
    }

    let mut writer = ::csv::Writer::from_writer(Vec::new());
    writer.write_record(&columns)?;
    let mut rows = 0u64;
    session
        .query_each(&sql, &[], &mut |row| {
            let record: Vec<String> = row
                .values()
                .iter()
                .zip(&binary)
                .map(|(v, b)| cell_text(v, *b))
                .collect();
            writer.write_record(&record)?;
            rows += 1;
            Ok(())
        })
        .await
        .map_err(|e| MigrateError::sql(&sql, e))?;
    let data = writer
        .into_inner()
        .map_err(|e| MigrateError::Io(std::io::Error::other(e.to_string())))?;
    Ok((data, rows))
}

/// Dump the database behind `session` according to `opts`.
pub async fn dump(session: &mut dyn Session, opts: &DumpOptions, cancel: &CancellationToken) -> Result<DumpSummary> {
    let catalog = drivers::introspect(session).await?;
    let (mut sink, location) = Sink::open(opts)?;
    let mut summary = DumpSummary {
        location,
        ..Default::default()
    };
    if !opts.data_only {
        emit(&mut sink, &mut summary, SCHEMA_SQL, schema_sql(&catalog).as_bytes())?;
    }

    if !opts.schema_only {
        if opts.subsets.is_empty() {
            for table in catalog.tables() {
                if cancel.is_cancelled() {
                    return Err(MigrateError::Cancelled);
                }
                let (data, rows) = table_csv(session, &catalog, table).await?;
                debug!("{}: {} rows", table.name, rows);
                summary.rows += rows;
                emit(&mut sink, &mut summary, &csv_filename(&catalog, table), &data)?;
            }
        } else {
            let collected = subset::collect(session, &catalog, &opts.subsets, cancel).await?;
            for (table, rows) in collected.tables(&catalog) {
                let data = write_csv(catalog.dialect, table, &dump_columns(table), &rows)?;
                summary.rows += rows.len() as u64;
                emit(&mut sink, &mut summary, &csv_filename(&catalog, table), &data)?;
            }
        }
    }

    if !opts.data_only {
        emit(&mut sink, &mut summary, INDEXES_SQL, indexes_sql(&catalog).as_bytes())?;
        emit(&mut sink, &mut summary, CONSTRAINTS_SQL, constraints_sql(&catalog).as_bytes())?;
    }
    sink.finish()?;

    info!(
        "dumped {} files ({} rows) to {}",
        summary.files.len(),
        summary.rows,
        summary.location.display()
    );
    Ok(summary)
}

fn emit(sink: &mut Sink, summary: &mut DumpSummary, name: &str, data: &[u8]) -> Result<()> {
    sink.write(name, data)?;
    summary.files.push(name.to_string());
    Ok(())
}
