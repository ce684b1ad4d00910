//! Schema diff: compare a source catalog (the live database) with a
//! destination catalog and emit the migration files that turn one into the
//! other.
//!
//! Discovery is shared; statement generation is per dialect because each
//! database has its own limits on what `ALTER TABLE` can do online.

mod mssql;
mod mysql;
mod postgres;
pub mod render;
mod sqlite;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::DiffOptions;
use crate::core::catalog::{names_equal, Catalog, Column, Constraint, Index, Table};
use crate::core::dialect::Dialect;
use crate::core::normalize::{
    is_literal_default, normalize_column_type, normalize_default, normalize_expression,
};
use crate::error::{MigrateError, Result};
use crate::fsview::MemFs;

use render::{is_default_rule, Ddl};

/// One generated migration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Migration {
    pub filename: String,
    pub sql: String,
}

/// Everything a diff produced.
#[derive(Debug, Clone, Default)]
pub struct DiffOutput {
    pub migrations: Vec<Migration>,
    /// Potentially unsafe changes, one line each.
    pub warnings: Vec<String>,
}

impl DiffOutput {
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn filenames(&self) -> Vec<String> {
        self.migrations.iter().map(|m| m.filename.clone()).collect()
    }

    /// Generated files as an in-memory directory, ready for the runner.
    pub fn to_memfs(&self) -> MemFs {
        let mut fs = MemFs::new();
        for m in &self.migrations {
            fs.insert(&m.filename, m.sql.as_bytes());
        }
        fs
    }
}

/// Compute the migrations that turn `src` into `dest`.
pub fn diff(src: &Catalog, dest: &Catalog, opts: &DiffOptions) -> Result<DiffOutput> {
    if src.dialect != dest.dialect {
        return Err(MigrateError::Config(format!(
            "cannot diff a {} catalog against a {} catalog",
            src.dialect, dest.dialect
        )));
    }
    let mut src = src.clone();
    let mut dest = dest.clone();
    src.normalize_names();
    dest.normalize_names();

    let prefix = if opts.prefix.is_empty() {
        Utc::now().format("%Y%m%d%H%M%S").to_string()
    } else {
        opts.prefix.clone()
    };
    let cx = Context::new(&src, &dest, opts);
    let mut files = Files::new(prefix);

    match src.dialect {
        Dialect::Sqlite => sqlite::diff(&cx, &mut files),
        Dialect::Postgres => postgres::diff(&cx, &mut files),
        Dialect::Mysql => mysql::diff(&cx, &mut files),
        Dialect::SqlServer => mssql::diff(&cx, &mut files),
    }

    let output = files.finish();
    info!(
        "diff produced {} file(s), {} warning(s)",
        output.migrations.len(),
        output.warnings.len()
    );
    Ok(output)
}

/// Inputs shared by the per-dialect engines.
pub(crate) struct Context<'a> {
    pub src: &'a Catalog,
    pub dest: &'a Catalog,
    pub opts: &'a DiffOptions,
    pub dialect: Dialect,
    pub ddl: Ddl,
}

impl<'a> Context<'a> {
    fn new(src: &'a Catalog, dest: &'a Catalog, opts: &'a DiffOptions) -> Self {
        Self {
            src,
            dest,
            opts,
            dialect: src.dialect,
            ddl: Ddl::new(src.dialect, &src.current_schema),
        }
    }

    pub fn drop_objects(&self) -> bool {
        self.opts.drop_objects
    }

    fn same_schema(&self, src_schema: &str, dest_schema: &str) -> bool {
        names_equal(
            self.dialect,
            self.src.schema_name(src_schema),
            self.dest.schema_name(dest_schema),
        )
    }

    /// Match tables across catalogs. Ignored tables on either side are left
    /// alone; source-only tables are reported only when dropping objects.
    pub fn tables(&self) -> Tables<'a> {
        let d = self.dialect;
        let mut out = Tables::default();
        let src_all: Vec<(&'a Table, bool)> = self
            .src
            .schemas
            .iter()
            .flat_map(|s| s.tables.iter().map(move |t| (t, s.ignore || t.ignore)))
            .collect();
        let dest_all: Vec<(&'a Table, bool)> = self
            .dest
            .schemas
            .iter()
            .flat_map(|s| s.tables.iter().map(move |t| (t, s.ignore || t.ignore)))
            .collect();

        for &(dest, dest_ignored) in &dest_all {
            let found = src_all
                .iter()
                .find(|(s, _)| self.same_schema(&s.schema, &dest.schema) && names_equal(d, &s.name, &dest.name));
            match found {
                Some(&(src, src_ignored)) => {
                    if !src_ignored && !dest_ignored {
                        out.common.push(TablePair { src, dest });
                    }
                }
                None if !dest_ignored => out.added.push(dest),
                None => {}
            }
        }
        if !self.drop_objects() {
            return out;
        }
        for &(src, src_ignored) in &src_all {
            let kept = dest_all
                .iter()
                .any(|(t, _)| self.same_schema(&src.schema, &t.schema) && names_equal(d, &src.name, &t.name));
            if !kept && !src_ignored {
                out.dropped.push(src);
            }
        }
        out
    }

    fn effective_collation<'c>(&self, catalog: &'c Catalog, column: &'c Column) -> &'c str {
        if column.collation.is_empty() {
            &catalog.default_collation
        } else {
            &column.collation
        }
    }

    /// Attribute-level comparison of one column.
    pub fn column_delta(&self, src: &Column, dest: &Column) -> ColumnDelta {
        let d = self.dialect;
        let type_changed = normalize_column_type(d, &src.column_type)
            != normalize_column_type(d, &dest.column_type);

        let identity_changed = src.identity.is_empty() != dest.identity.is_empty();
        let default_changed = if !dest.identity.is_empty() || !src.identity.is_empty() {
            false
        } else {
            !defaults_equal(d, &src.default, &dest.default)
        };

        let pk = src.is_primary_key || dest.is_primary_key;
        let null_changed = !pk && src.is_not_null != dest.is_not_null;

        let src_collation = self.effective_collation(self.src, src);
        let dest_collation = self.effective_collation(self.dest, dest);
        let collation_changed = !src_collation.is_empty()
            && !dest_collation.is_empty()
            && !src_collation.eq_ignore_ascii_case(dest_collation);

        let generated_changed = src.is_generated != dest.is_generated
            || (dest.is_generated
                && (normalize_expression(&src.generated_expr)
                    != normalize_expression(&dest.generated_expr)
                    || !generated_kind(src).eq_ignore_ascii_case(generated_kind(dest))));

        ColumnDelta {
            type_changed,
            default_changed,
            null_changed,
            identity_changed,
            collation_changed,
            generated_changed,
        }
    }

    pub fn columns(&self, pair: &TablePair<'a>) -> ColumnChanges<'a> {
        let d = self.dialect;
        let mut out = ColumnChanges::default();
        for dest in &pair.dest.columns {
            match pair.src.columns.iter().find(|c| names_equal(d, &c.name, &dest.name)) {
                Some(src) if src.ignore || dest.ignore => {}
                Some(src) => {
                    let delta = self.column_delta(src, dest);
                    if !delta.is_empty() {
                        out.altered.push(AlteredColumn { src, dest, delta });
                    }
                }
                None if !dest.ignore => out.added.push(dest),
                None => {}
            }
        }
        if !self.drop_objects() {
            return out;
        }
        for src in &pair.src.columns {
            if !src.ignore && pair.dest.find_column(d, &src.name).is_none() {
                out.dropped.push(src);
            }
        }
        out
    }

    /// Changed indexes appear in both lists: drop the old, create the new.
    /// Source-only indexes are dropped only when dropping objects.
    pub fn indexes(&self, pair: &TablePair<'a>) -> Changes<'a, Index> {
        let d = self.dialect;
        let mut out = Changes::default();
        for dest in pair.dest.indexes.iter().filter(|i| !i.ignore) {
            match pair.src.indexes.iter().find(|i| names_equal(d, &i.name, &dest.name)) {
                Some(src) if src.ignore => {}
                Some(src) if indexes_equal(src, dest) => {}
                Some(src) => {
                    out.dropped.push(src);
                    out.added.push(dest);
                }
                None => out.added.push(dest),
            }
        }
        if !self.drop_objects() {
            return out;
        }
        for src in pair.src.indexes.iter().filter(|i| !i.ignore) {
            if !pair.dest.indexes.iter().any(|i| names_equal(d, &i.name, &src.name)) {
                out.dropped.push(src);
            }
        }
        out
    }

    /// Changed constraints appear in both lists, like indexes.
    pub fn constraints(&self, pair: &TablePair<'a>) -> Changes<'a, Constraint> {
        let d = self.dialect;
        let mut out = Changes::default();
        let same = |a: &Constraint, b: &Constraint| a.kind == b.kind && names_equal(d, &a.name, &b.name);
        for dest in pair.dest.constraints.iter().filter(|c| !c.ignore) {
            match pair.src.constraints.iter().find(|c| same(c, dest)) {
                Some(src) if src.ignore => {}
                Some(src) if self.constraints_equal(src, dest) => {}
                Some(src) => {
                    out.dropped.push(src);
                    out.added.push(dest);
                }
                None => out.added.push(dest),
            }
        }
        if !self.drop_objects() {
            return out;
        }
        for src in pair.src.constraints.iter().filter(|c| !c.ignore) {
            if !pair.dest.constraints.iter().any(|c| same(src, c)) {
                out.dropped.push(src);
            }
        }
        out
    }

    fn constraints_equal(&self, a: &Constraint, b: &Constraint) -> bool {
        let d = self.dialect;
        let list_eq = |x: &[String], y: &[String]| {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| names_equal(d, p, q))
        };
        let rule_eq = |x: &str, y: &str| {
            (is_default_rule(x) && is_default_rule(y)) || x.eq_ignore_ascii_case(y)
        };
        list_eq(&a.columns, &b.columns)
            && names_equal(
                d,
                self.src.schema_name(&a.references_schema),
                self.dest.schema_name(&b.references_schema),
            )
            && names_equal(d, &a.references_table, &b.references_table)
            && list_eq(&a.references_columns, &b.references_columns)
            && rule_eq(&a.update_rule, &b.update_rule)
            && rule_eq(&a.delete_rule, &b.delete_rule)
            && a.match_option.eq_ignore_ascii_case(&b.match_option)
            && normalize_expression(&a.check_expr) == normalize_expression(&b.check_expr)
            && normalize_expression(&a.exclusion_expr) == normalize_expression(&b.exclusion_expr)
            && a.is_deferrable == b.is_deferrable
            && a.is_initially_deferred == b.is_initially_deferred
    }

    pub fn warn(&self, files: &mut Files, message: String) {
        debug!("diff warning: {}", message);
        files.warnings.push(message);
    }
}

fn generated_kind(c: &Column) -> &str {
    if c.generated_kind.is_empty() {
        "VIRTUAL"
    } else {
        &c.generated_kind
    }
}

/// Compare defaults after normalization; expressions compare case- and
/// whitespace-insensitively.
pub(crate) fn defaults_equal(dialect: Dialect, a: &str, b: &str) -> bool {
    let a = normalize_default(dialect, a);
    let b = normalize_default(dialect, b);
    if a == b {
        return true;
    }
    if is_literal_default(&a) && is_literal_default(&b) {
        return false;
    }
    normalize_expression(&a) == normalize_expression(&b)
}

fn index_entry_key(entry: &str) -> String {
    normalize_expression(entry).replace(['"', '`', '[', ']'], "")
}

fn indexes_equal(a: &Index, b: &Index) -> bool {
    let list_eq = |x: &[String], y: &[String]| {
        x.len() == y.len() && x.iter().zip(y).all(|(p, q)| index_entry_key(p) == index_entry_key(q))
    };
    let using = |u: &str| {
        let u = u.to_ascii_lowercase();
        if u == "btree" || u == "nonclustered" {
            String::new()
        } else {
            u
        }
    };
    a.is_unique == b.is_unique
        && list_eq(&a.columns, &b.columns)
        && list_eq(&a.include, &b.include)
        && normalize_expression(&a.predicate) == normalize_expression(&b.predicate)
        && using(&a.using) == using(&b.using)
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TablePair<'a> {
    pub src: &'a Table,
    pub dest: &'a Table,
}

#[derive(Debug, Default)]
pub(crate) struct Tables<'a> {
    pub added: Vec<&'a Table>,
    pub common: Vec<TablePair<'a>>,
    pub dropped: Vec<&'a Table>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ColumnDelta {
    pub type_changed: bool,
    pub default_changed: bool,
    pub null_changed: bool,
    pub identity_changed: bool,
    pub collation_changed: bool,
    pub generated_changed: bool,
}

impl ColumnDelta {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug)]
pub(crate) struct AlteredColumn<'a> {
    pub src: &'a Column,
    pub dest: &'a Column,
    pub delta: ColumnDelta,
}

#[derive(Debug, Default)]
pub(crate) struct ColumnChanges<'a> {
    pub added: Vec<&'a Column>,
    pub dropped: Vec<&'a Column>,
    pub altered: Vec<AlteredColumn<'a>>,
}

impl ColumnChanges<'_> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.dropped.is_empty() && self.altered.is_empty()
    }
}

#[derive(Debug)]
pub(crate) struct Changes<'a, T> {
    pub added: Vec<&'a T>,
    pub dropped: Vec<&'a T>,
}

impl<T> Default for Changes<'_, T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            dropped: Vec::new(),
        }
    }
}

impl<T> Changes<'_, T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.dropped.is_empty()
    }
}

/// How the runner treats a generated file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileKind {
    /// Shares a transaction with its neighbours.
    Plain,
    /// Runs alone in its own transaction.
    Tx,
    /// Runs alone outside any transaction.
    TxOff,
}

impl FileKind {
    fn extension(&self) -> &'static str {
        match self {
            FileKind::Plain => "sql",
            FileKind::Tx => "tx.sql",
            FileKind::TxOff => "txoff.sql",
        }
    }
}

struct PendingFile {
    stem: String,
    kind: FileKind,
    sql: String,
    undo: Option<String>,
}

/// Collects generated files; names are assigned at the end so the counter
/// width covers every file.
pub(crate) struct Files {
    prefix: String,
    pending: Vec<PendingFile>,
    pub warnings: Vec<String>,
}

impl Files {
    pub fn new(prefix: String) -> Self {
        Self {
            prefix,
            pending: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add(&mut self, action: &str, object: &str, kind: FileKind, sql: String) {
        self.push(action, object, kind, sql, None);
    }

    /// A `.txoff.sql` file with its `.undo.sql` compensation.
    pub fn add_with_undo(&mut self, action: &str, object: &str, sql: String, undo: String) {
        self.push(action, object, FileKind::TxOff, sql, Some(undo));
    }

    fn push(&mut self, action: &str, object: &str, kind: FileKind, sql: String, undo: Option<String>) {
        if sql.trim().is_empty() {
            return;
        }
        self.pending.push(PendingFile {
            stem: format!("{}_{}", action, sanitize(object)),
            kind,
            sql,
            undo,
        });
    }

    pub fn finish(self) -> DiffOutput {
        let width = self.pending.len().to_string().len().max(2);
        let mut migrations = Vec::new();
        for (i, file) in self.pending.into_iter().enumerate() {
            let base = format!("{}_{:0width$}_{}", self.prefix, i + 1, file.stem, width = width);
            migrations.push(Migration {
                filename: format!("{}.{}", base, file.kind.extension()),
                sql: file.sql,
            });
            if let Some(undo) = file.undo {
                migrations.push(Migration {
                    filename: format!("{}.undo.sql", base),
                    sql: undo,
                });
            }
        }
        DiffOutput {
            migrations,
            warnings: self.warnings,
        }
    }
}

/// Statements grouped by an unordered pair of tables, in first-seen order,
/// so every foreign key between the same two tables lands in one file.
#[derive(Debug, Default)]
pub(crate) struct PairBuckets {
    entries: Vec<((String, String), String)>,
}

impl PairBuckets {
    pub fn push(&mut self, a: &str, b: &str, sql: &str) {
        let key = if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, buf)) => buf.push_str(sql),
            None => self.entries.push((key, sql.to_string())),
        }
    }

    pub fn emit(self, files: &mut Files, action: &str, kind: FileKind) {
        for ((a, b), sql) in self.entries {
            let object = if a == b { a } else { format!("{}_{}", a, b) };
            files.add(action, &object, kind, sql);
        }
    }
}

/// Keep filenames portable.
fn sanitize(object: &str) -> String {
    object
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Object name used in filenames: `schema_table` outside the current schema.
pub(crate) fn object_name(cx: &Context<'_>, schema: &str, name: &str) -> String {
    if schema.is_empty() || names_equal(cx.dialect, schema, &cx.src.current_schema) {
        name.to_string()
    } else {
        format!("{}_{}", schema, name)
    }
}
