//! CSV loader.
//!
//! Each item is a `.sql` or `.csv`/`.tsv` file, a directory, or a zip/tgz
//! archive. Directories and archives load in four phases:
//!
//! 1. `schema.sql`
//! 2. every top-level CSV, one table per file
//! 3. `indexes.sql`
//! 4. `constraints.sql`
//!
//! CSVs load concurrently on every dialect except SQLite, each on its own
//! session and in its own transaction. The first failure cancels the rest.

pub mod csv;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::LoadOptions;
use crate::core::catalog::Catalog;
use crate::core::traits::{Database, Session};
use crate::drivers;
use crate::error::{MigrateError, Result};
use crate::fsview::{unpack_tgz, unpack_zip, DirFs, FileView, MemFs};
use crate::runner::Reporter;

pub use self::csv::{load_csv, table_ref, CellCoercer, CsvLoaded};

/// Load-phase script names, in execution order around the CSVs.
pub const SCHEMA_SQL: &str = "schema.sql";
pub const INDEXES_SQL: &str = "indexes.sql";
pub const CONSTRAINTS_SQL: &str = "constraints.sql";

/// What a load did.
#[derive(Debug, Clone, Default)]
pub struct LoadSummary {
    pub scripts: Vec<String>,
    pub tables: Vec<CsvLoaded>,
}

impl LoadSummary {
    pub fn rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum()
    }

    fn extend(&mut self, other: LoadSummary) {
        self.scripts.extend(other.scripts);
        self.tables.extend(other.tables);
    }
}

fn is_csv(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".csv") || lower.ends_with(".tsv")
}

fn is_tgz(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".tgz") || lower.ends_with(".tar.gz")
}

pub struct Loader {
    db: Arc<dyn Database>,
    opts: LoadOptions,
    reporter: Reporter,
}

impl Loader {
    pub fn new(db: Arc<dyn Database>, opts: LoadOptions) -> Self {
        let reporter = Reporter::stdio(opts.verbose);
        Self { db, opts, reporter }
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Load every item in order.
    pub async fn load(&mut self, items: &[impl AsRef<Path>], cancel: &CancellationToken) -> Result<LoadSummary> {
        let mut summary = LoadSummary::default();
        for item in items {
            if cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }
            let path = item.as_ref();
            let name = path.to_string_lossy().into_owned();
            let loaded = if path.is_dir() {
                self.load_view(Arc::new(DirFs::new(path)), cancel).await?
            } else if name.to_ascii_lowercase().ends_with(".zip") {
                self.load_view(Arc::new(unpack_zip(path)?), cancel).await?
            } else if is_tgz(&name) {
                self.load_view(Arc::new(unpack_tgz(path)?), cancel).await?
            } else {
                self.load_file(path, cancel).await?
            };
            summary.extend(loaded);
        }
        self.reporter.flush();
        info!(
            "loaded {} rows into {} tables",
            summary.rows(),
            summary.tables.len()
        );
        Ok(summary)
    }

    /// A loose `.sql` or CSV file.
    async fn load_file(&mut self, path: &Path, cancel: &CancellationToken) -> Result<LoadSummary> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content = std::fs::read(path)?;

        let mut summary = LoadSummary::default();
        let mut session = self.db.session().await?;
        if is_csv(&name) {
            let catalog = drivers::introspect(session.as_mut()).await?;
            let started = Instant::now();
            let loaded = load_csv(session.as_mut(), &catalog, &name, &content, &self.opts, cancel).await;
            match loaded {
                Ok(loaded) => {
                    self.reporter.ok(&name, started.elapsed());
                    summary.tables.push(loaded);
                }
                Err(e) => {
                    self.reporter.fail(&name, started.elapsed());
                    return Err(e);
                }
            }
        } else if name.to_ascii_lowercase().ends_with(".sql") {
            let mut fs = MemFs::new();
            fs.insert(name.clone(), content);
            self.run_script(session.as_mut(), &fs, &name).await?;
            summary.scripts.push(name);
        } else {
            return Err(MigrateError::load(
                path.to_string_lossy(),
                "not a .sql, .csv, .tsv, .zip or .tgz file",
            ));
        }
        Ok(summary)
    }

    /// A directory or unpacked archive.
    pub async fn load_view(&mut self, fs: Arc<dyn FileView>, cancel: &CancellationToken) -> Result<LoadSummary> {
        let mut summary = LoadSummary::default();
        let mut session = self.db.session().await?;

        if fs.exists(SCHEMA_SQL) {
            self.run_script(session.as_mut(), fs.as_ref(), SCHEMA_SQL).await?;
            summary.scripts.push(SCHEMA_SQL.to_string());
        }

        let names: Vec<String> = fs
            .list()?
            .into_iter()
            .filter(|n| !n.contains('/') && is_csv(n))
            .collect();
        if !names.is_empty() {
            let catalog = Arc::new(drivers::introspect(session.as_mut()).await?);
            let loaded = if self.db.dialect().concurrent_writers() {
                drop(session);
                let loaded = self.load_parallel(&fs, &names, &catalog, cancel).await;
                session = self.db.session().await?;
                loaded?
            } else {
                self.load_serial(session.as_mut(), fs.as_ref(), &names, &catalog, cancel).await?
            };
            summary.tables.extend(loaded);
        }

        for script in [INDEXES_SQL, CONSTRAINTS_SQL] {
            if fs.exists(script) {
                self.run_script(session.as_mut(), fs.as_ref(), script).await?;
                summary.scripts.push(script.to_string());
            }
        }
        Ok(summary)
    }

    async fn run_script(&mut self, session: &mut dyn Session, fs: &dyn FileView, name: &str) -> Result<()> {
        let sql = fs.read_to_string(name)?;
        let started = Instant::now();
        debug!("{}: executing", name);
        match session.exec(&sql).await {
            Ok(_) => {
                self.reporter.ok(name, started.elapsed());
                Ok(())
            }
            Err(e) => {
                self.reporter.fail(name, started.elapsed());
                Err(MigrateError::migration(name, e))
            }
        }
    }

    async fn load_serial(
        &mut self,
        session: &mut dyn Session,
        fs: &dyn FileView,
        names: &[String],
        catalog: &Catalog,
        cancel: &CancellationToken,
    ) -> Result<Vec<CsvLoaded>> {
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            if cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }
            let started = Instant::now();
            let data = fs.read(name)?;
            match load_csv(session, catalog, name, &data, &self.opts, cancel).await {
                Ok(loaded) => {
                    self.reporter.ok(name, started.elapsed());
                    out.push(loaded);
                }
                Err(e) => {
                    self.reporter.fail(name, started.elapsed());
                    return Err(e);
                }
            }
        }
        Ok(out)
    }

    async fn load_parallel(
        &mut self,
        fs: &Arc<dyn FileView>,
        names: &[String],
        catalog: &Arc<Catalog>,
        cancel: &CancellationToken,
    ) -> Result<Vec<CsvLoaded>> {
        let token = cancel.child_token();
        let mut set = JoinSet::new();
        for name in names {
            let (db, fs, catalog, opts, token) = (
                self.db.clone(),
                fs.clone(),
                catalog.clone(),
                self.opts.clone(),
                token.clone(),
            );
            let name = name.clone();
            set.spawn(async move {
                let started = Instant::now();
                let result: Result<CsvLoaded> = async {
                    let data = fs.read(&name)?;
                    let mut session = db.session().await?;
                    load_csv(session.as_mut(), &catalog, &name, &data, &opts, &token).await
                }
                .await;
                if result.is_err() {
                    token.cancel();
                }
                (name, started.elapsed(), result)
            });
        }

        let mut loaded = Vec::with_capacity(names.len());
        let mut failure: Option<MigrateError> = None;
        while let Some(joined) = set.join_next().await {
            let (name, elapsed, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    token.cancel();
                    failure.get_or_insert(MigrateError::load("csv worker", e.to_string()));
                    continue;
                }
            };
            match result {
                Ok(done) => {
                    self.reporter.ok(&name, elapsed);
                    loaded.push(done);
                }
                Err(e) => {
                    self.reporter.fail(&name, elapsed);
                    // Peers cancelled by the first failure report Cancelled; keep the cause.
                    let replace = match &failure {
                        None => true,
                        Some(prev) => prev.is_cancelled() && !e.is_cancelled(),
                    };
                    if replace {
                        failure = Some(e);
                    }
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        loaded.sort_by(|a, b| a.file.cmp(&b.file));
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::sqlite::SqliteDatabase;

    async fn sqlite() -> (tempfile::TempDir, Arc<dyn Database>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("load.db");
        let db = SqliteDatabase::connect(&path.to_string_lossy()).await.unwrap();
        (dir, Arc::new(db))
    }

    fn sakila_fs() -> MemFs {
        let mut fs = MemFs::new();
        fs.insert(
            "schema.sql",
            "CREATE TABLE language (language_id INTEGER PRIMARY KEY, name TEXT NOT NULL);\n\
             CREATE TABLE film (film_id INTEGER PRIMARY KEY, title TEXT, language_id INTEGER \
             REFERENCES language (language_id), cover BLOB);\n",
        );
        // film before language alphabetically; FK checks are suspended.
        fs.insert("01_film.csv", "film_id,title,language_id,cover\n1,ACADEMY DINOSAUR,1,0x0102\n2,\\N,1,\\N\n");
        fs.insert("02_language.csv", "language_id,name\n1,English\n");
        fs.insert("indexes.sql", "CREATE INDEX film_title_idx ON film (title);\n");
        fs
    }

    #[tokio::test]
    async fn test_load_view_runs_phases_in_order() {
        let (_dir, db) = sqlite().await;
        let mut loader = Loader::new(db.clone(), LoadOptions::default()).with_reporter(Reporter::silent());
        let summary = loader
            .load_view(Arc::new(sakila_fs()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.scripts, vec!["schema.sql", "indexes.sql"]);
        assert_eq!(summary.rows(), 3);
        assert_eq!(summary.tables[0].table, "film");

        let mut s = db.session().await.unwrap();
        let rows = s
            .query("SELECT title IS NULL, hex(cover) FROM film ORDER BY film_id", &[])
            .await
            .unwrap();
        assert_eq!(rows[0].get_i64(0), Some(0));
        assert_eq!(rows[0].get_string(1), "0102");
        assert_eq!(rows[1].get_i64(0), Some(1));
        let idx = s
            .query("SELECT name FROM sqlite_master WHERE type = 'index' AND name = 'film_title_idx'", &[])
            .await
            .unwrap();
        assert_eq!(idx.len(), 1);
    }

    #[tokio::test]
    async fn test_bad_row_rolls_back_file() {
        let (_dir, db) = sqlite().await;
        let mut fs = MemFs::new();
        fs.insert("schema.sql", "CREATE TABLE t (id INTEGER PRIMARY KEY, n INTEGER NOT NULL);\n");
        fs.insert("t.csv", "id,n\n1,1\n2,\\N\n");
        let mut loader = Loader::new(db.clone(), LoadOptions::default()).with_reporter(Reporter::silent());
        let err = loader
            .load_view(Arc::new(fs), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Sql { .. } | MigrateError::Sqlite(_)), "{:?}", err);

        let mut s = db.session().await.unwrap();
        let n = s.query_row("SELECT COUNT(*) FROM t", &[]).await.unwrap().unwrap();
        assert_eq!(n.get_i64(0), Some(0));
    }

    #[tokio::test]
    async fn test_unknown_table_is_load_error() {
        let (_dir, db) = sqlite().await;
        let mut fs = MemFs::new();
        fs.insert("missing.csv", "id\n1\n");
        let mut loader = Loader::new(db, LoadOptions::default()).with_reporter(Reporter::silent());
        let err = loader
            .load_view(Arc::new(fs), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Load { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (_dir, db) = sqlite().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut loader = Loader::new(db, LoadOptions::default()).with_reporter(Reporter::silent());
        let err = loader.load(&["whatever.csv"], &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
