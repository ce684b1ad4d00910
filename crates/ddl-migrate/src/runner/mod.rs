//! Migration runner.
//!
//! Runs pending scripts in order, grouped into transactions where the
//! filename and dialect allow, retries lock timeouts with randomized
//! exponential back-off and runs `.undo.sql` compensation scripts for failed
//! non-transactional files. Every outcome, success or failure, is written to
//! the history table.

pub mod plan;
mod report;

pub use report::{Reporter, SharedBuffer};

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{MigrateOptions, RetryPolicy};
use crate::core::dialect::Dialect;
use crate::core::traits::Session;
use crate::drivers::common::SessionSetting;
use crate::error::{MigrateError, Result};
use crate::fsview::FileView;
use crate::history::{HistoryStore, MigrationRecord};
use plan::{group_files, is_single_statement, pending, read_planned, undo_filename, Group, PlannedFile};

/// Outcome of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Files executed successfully.
    pub applied: Vec<String>,

    /// Files skipped because history shows them applied.
    pub skipped: usize,

    /// File that stopped the run, if any.
    pub failed: Option<String>,

    /// Total duration in seconds.
    pub duration_seconds: f64,
}

impl RunSummary {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Sleep before retry number `attempt` (0-based): a uniform sample from
/// `[0, base * 2^attempt)` clamped into `[base, max]`.
pub fn retry_delay(policy: &RetryPolicy, attempt: u32, rng: &mut impl Rng) -> Duration {
    let base = policy.base_delay.as_millis().min(u64::MAX as u128) as u64;
    let max = policy.max_delay.as_millis().min(u64::MAX as u128) as u64;
    let ceiling = base.saturating_mul(1u64 << attempt.min(62));
    let sampled = if ceiling == 0 { 0 } else { rng.gen_range(0..ceiling) };
    Duration::from_millis(sampled.clamp(base, max.max(base)))
}

/// Executes migration files against one session.
pub struct Runner {
    dialect: Dialect,
    opts: MigrateOptions,
    store: HistoryStore,
    reporter: Reporter,
    rng: StdRng,
}

impl Runner {
    pub fn new(dialect: Dialect, opts: MigrateOptions) -> Self {
        let store = HistoryStore::new(dialect, &opts.history_table);
        let reporter = Reporter::stdio(opts.verbose);
        Self {
            dialect,
            opts,
            store,
            reporter,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn history(&self) -> &HistoryStore {
        &self.store
    }

    /// Run `filenames` from `fs` (every file in `fs` when empty).
    pub async fn run(
        &mut self,
        session: &mut dyn Session,
        fs: &dyn FileView,
        filenames: &[String],
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let started = Instant::now();
        let listed;
        let filenames = if filenames.is_empty() {
            listed = fs.list()?;
            &listed
        } else {
            filenames
        };

        let history = if self.opts.skip_history {
            Default::default()
        } else {
            self.store.ensure_table(session).await?;
            self.store.read_all(session).await?
        };

        let planned = read_planned(fs, filenames)?;
        let todo = pending(&planned, &history);
        let mut summary = RunSummary {
            skipped: planned.len() - todo.len(),
            ..Default::default()
        };
        info!(
            "{} migration(s) pending, {} already applied",
            todo.len(),
            summary.skipped
        );

        let lock = SessionSetting::lock_timeout(session, self.opts.lock_timeout).await?;
        let mut outcome = Ok(());
        for group in group_files(self.dialect, todo) {
            if cancel.is_cancelled() {
                outcome = Err(MigrateError::Cancelled);
                break;
            }
            match self.flush(session, fs, &group, cancel).await {
                Ok(()) => summary
                    .applied
                    .extend(group.files.iter().map(|f| f.filename.clone())),
                Err((filename, err)) => {
                    summary.failed = Some(filename);
                    outcome = Err(err);
                    break;
                }
            }
        }
        let restored = lock.restore(session).await;
        self.reporter.flush();

        summary.duration_seconds = started.elapsed().as_secs_f64();
        outcome?;
        restored?;
        Ok(summary)
    }

    /// Run one group, retrying lock timeouts. On failure returns the failing filename.
    async fn flush(
        &mut self,
        session: &mut dyn Session,
        fs: &dyn FileView,
        group: &Group,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), (String, MigrateError)> {
        let retryable = group.transactional
            || (group.files.len() == 1 && is_single_statement(&group.files[0].content));
        let mut attempt = 0u32;
        loop {
            let failure = match self.try_group(session, group, cancel).await {
                Ok(()) => return Ok(()),
                Err(failure) => failure,
            };
            let (index, err) = failure.error;

            if err.is_lock_timeout() && retryable && attempt + 1 < self.opts.retry.max_attempts {
                let delay = retry_delay(&self.opts.retry, attempt, &mut self.rng);
                attempt += 1;
                warn!(
                    "{}: lock timeout, retry {}/{} in {:?}",
                    group.files[index].filename, attempt, self.opts.retry.max_attempts, delay
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => continue,
                    _ = cancel.cancelled() => {
                        let filename = group.files[index].filename.clone();
                        let err = MigrateError::migration(&filename, MigrateError::Cancelled);
                        return Err((filename, err));
                    }
                }
            }

            let file = &group.files[index];
            if let Err(history_err) = self.record_failure(session, &group.files[..=index], failure.started).await {
                warn!("could not record failure of {}: {}", file.filename, history_err);
            }

            let mut wrapped = MigrateError::migration(&file.filename, err);
            if !group.transactional && !retryable {
                if let Some(note) = self.run_undo(session, fs, &file.filename).await {
                    if let MigrateError::Migration { undo, .. } = &mut wrapped {
                        *undo = Some(note);
                    }
                }
            }
            return Err((file.filename.clone(), wrapped));
        }
    }

    /// Execute a group once. Failures carry the index of the failing file.
    async fn try_group(
        &mut self,
        session: &mut dyn Session,
        group: &Group,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), GroupFailure> {
        let started_at = Utc::now();
        let fail = |index: usize, err: MigrateError| GroupFailure {
            error: (index, err),
            started: started_at,
        };

        // PRAGMA foreign_keys is ignored inside a transaction, so switch it first.
        let fk = if self.dialect == Dialect::Sqlite {
            Some(
                SessionSetting::foreign_keys(session, false)
                    .await
                    .map_err(|e| fail(0, e))?,
            )
        } else {
            None
        };

        let result = self.execute_group(session, group, cancel, started_at).await;

        if let Some(fk) = fk {
            if let Err(e) = fk.restore(session).await {
                warn!("restoring foreign_keys: {}", e);
            }
        }
        result.map_err(|(i, e)| fail(i, e))
    }

    async fn execute_group(
        &mut self,
        session: &mut dyn Session,
        group: &Group,
        cancel: &CancellationToken,
        started_at: DateTime<Utc>,
    ) -> std::result::Result<(), (usize, MigrateError)> {
        if group.transactional {
            session.begin().await.map_err(|e| (0, e))?;
            self.reporter.boundary("BEGIN");
        }

        let mut records = Vec::with_capacity(group.files.len());
        // Grouped files only count as applied once the transaction commits.
        let mut done: Vec<(&str, Duration)> = Vec::new();
        for (i, file) in group.files.iter().enumerate() {
            if cancel.is_cancelled() {
                self.abort(session, group).await;
                return Err((i, MigrateError::Cancelled));
            }
            let t0 = Instant::now();
            debug!("executing {}", file.filename);
            if let Err(e) = session.exec(&file.content).await {
                self.reporter.fail(&file.filename, t0.elapsed());
                self.abort(session, group).await;
                return Err((i, e));
            }
            let elapsed = t0.elapsed();
            if group.transactional {
                done.push((&file.filename, elapsed));
            } else {
                self.reporter.ok(&file.filename, elapsed);
            }
            records.push(success_record(file, started_at, elapsed));
        }

        let last = group.files.len() - 1;
        if group.transactional && self.dialect == Dialect::Sqlite {
            if let Err(e) = check_foreign_keys(session).await {
                self.abort(session, group).await;
                return Err((last, e));
            }
        }

        if !self.opts.skip_history {
            if let Err(e) = self.store.upsert(session, &records).await {
                self.abort(session, group).await;
                return Err((last, e));
            }
        }

        if group.transactional {
            if let Err(e) = session.commit().await {
                self.reporter.fail(&group.files[last].filename, Duration::ZERO);
                return Err((last, e));
            }
            for (filename, elapsed) in done {
                self.reporter.ok(filename, elapsed);
            }
            self.reporter.boundary("COMMIT");
        }
        Ok(())
    }

    async fn abort(&mut self, session: &mut dyn Session, group: &Group) {
        if !group.transactional {
            return;
        }
        if let Err(e) = session.rollback().await {
            debug!("rollback: {}", e);
        }
        self.reporter.boundary("ROLLBACK");
    }

    /// Mark every file up to the failing one as failed. They shared the rolled-back transaction.
    async fn record_failure(
        &mut self,
        session: &mut dyn Session,
        files: &[PlannedFile],
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        if self.opts.skip_history {
            return Ok(());
        }
        let elapsed = (Utc::now() - started_at).to_std().unwrap_or_default();
        let records: Vec<MigrationRecord> = files
            .iter()
            .map(|f| MigrationRecord {
                success: false,
                ..success_record(f, started_at, elapsed)
            })
            .collect();
        self.store.upsert(session, &records).await
    }

    /// Run the compensation script for `filename`. Returns a note on the outcome.
    async fn run_undo(
        &mut self,
        session: &mut dyn Session,
        fs: &dyn FileView,
        filename: &str,
    ) -> Option<String> {
        let undo = undo_filename(filename);
        if !fs.exists(&undo) {
            return None;
        }
        warn!("{} failed; running {}", filename, undo);
        let t0 = Instant::now();
        let sql = match fs.read_to_string(&undo) {
            Ok(sql) => sql,
            Err(e) => return Some(format!("undo {} unreadable: {}", undo, e)),
        };
        match session.exec(&sql).await {
            Ok(_) => {
                self.reporter.ok(&undo, t0.elapsed());
                Some(format!("undo {} succeeded", undo))
            }
            Err(e) => {
                self.reporter.fail(&undo, t0.elapsed());
                Some(format!("undo {} failed: {}", undo, e))
            }
        }
    }
}

struct GroupFailure {
    error: (usize, MigrateError),
    started: DateTime<Utc>,
}

fn success_record(file: &PlannedFile, started_at: DateTime<Utc>, elapsed: Duration) -> MigrationRecord {
    MigrationRecord {
        filename: file.filename.clone(),
        checksum: file.checksum.clone(),
        started_at,
        time_taken_ns: elapsed.as_nanos().min(i64::MAX as u128) as i64,
        success: true,
    }
}

/// Fail when the pending transaction left dangling foreign keys.
async fn check_foreign_keys(session: &mut dyn Session) -> Result<()> {
    let rows = session.query("PRAGMA foreign_key_check", &[]).await?;
    if let Some(row) = rows.first() {
        return Err(MigrateError::sql(
            "PRAGMA foreign_key_check",
            format!(
                "{} foreign key violation(s), first in table {} referencing {}",
                rows.len(),
                row.get_string(0),
                row.get_string(2)
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::Database;
    use crate::drivers::sqlite::SqliteDatabase;
    use crate::fsview::MemFs;

    #[test]
    fn test_retry_delay_bounds() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        };
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..20 {
            let d = retry_delay(&policy, attempt, &mut rng);
            assert!(d >= policy.base_delay, "attempt {} gave {:?}", attempt, d);
            assert!(d <= policy.max_delay, "attempt {} gave {:?}", attempt, d);
        }
        let zero = RetryPolicy {
            base_delay: Duration::ZERO,
            ..policy
        };
        assert_eq!(retry_delay(&zero, 3, &mut rng), Duration::ZERO);
    }

    fn quiet(opts: MigrateOptions) -> Runner {
        Runner::new(Dialect::Sqlite, opts).with_reporter(Reporter::silent())
    }

    async fn tables(session: &mut dyn Session) -> Vec<String> {
        session
            .query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name", &[])
            .await
            .unwrap()
            .iter()
            .map(|r| r.get_string(0))
            .collect()
    }

    #[tokio::test]
    async fn test_run_applies_then_skips() {
        let db = SqliteDatabase::connect(":memory:").await.unwrap();
        let mut s = db.session().await.unwrap();
        let mut fs = MemFs::new();
        fs.insert("01_a.sql", "CREATE TABLE a (id INTEGER PRIMARY KEY);");
        fs.insert("02_b.sql", "CREATE TABLE b (id INTEGER PRIMARY KEY, a_id INT REFERENCES a (id));");
        fs.insert("repeatable/v.sql", "DROP VIEW IF EXISTS v; CREATE VIEW v AS SELECT id FROM a;");

        let cancel = CancellationToken::new();
        let mut runner = quiet(MigrateOptions::default());
        let summary = runner.run(s.as_mut(), &fs, &[], &cancel).await.unwrap();
        assert_eq!(summary.applied, vec!["01_a.sql", "02_b.sql", "repeatable/v.sql"]);

        let again = runner.run(s.as_mut(), &fs, &[], &cancel).await.unwrap();
        assert!(again.applied.is_empty());
        assert_eq!(again.skipped, 3);

        fs.insert("repeatable/v.sql", "DROP VIEW IF EXISTS v; CREATE VIEW v AS SELECT id AS x FROM a;");
        let changed = runner.run(s.as_mut(), &fs, &[], &cancel).await.unwrap();
        assert_eq!(changed.applied, vec!["repeatable/v.sql"]);
    }

    #[tokio::test]
    async fn test_transactional_failure_marks_group() {
        let db = SqliteDatabase::connect(":memory:").await.unwrap();
        let mut s = db.session().await.unwrap();
        let mut fs = MemFs::new();
        fs.insert("01.sql", "CREATE TABLE t1 (id INT);");
        fs.insert("02.sql", "CREATE TABLE t2 (id INT); fail_here;");
        fs.insert("03.sql", "CREATE TABLE t3 (id INT);");

        let out = SharedBuffer::new();
        let err_buf = SharedBuffer::new();
        let mut runner = Runner::new(Dialect::Sqlite, MigrateOptions::default())
            .with_reporter(Reporter::new(Box::new(out.clone()), Box::new(err_buf.clone()), false));
        let err = runner
            .run(s.as_mut(), &fs, &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("02.sql: "));
        assert!(err_buf.contents().contains("[FAIL] 02.sql"));

        let history = runner.history().read_all(s.as_mut()).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history["01.sql"].success);
        assert!(!history["02.sql"].success);
        assert_eq!(tables(s.as_mut()).await, vec!["ddl_history"]);
    }

    #[tokio::test]
    async fn test_txoff_failure_runs_undo() {
        let db = SqliteDatabase::connect(":memory:").await.unwrap();
        let mut s = db.session().await.unwrap();
        let mut fs = MemFs::new();
        fs.insert("01.txoff.sql", "CREATE TABLE table1 (id INT);");
        fs.insert("01.undo.sql", "DROP TABLE IF EXISTS table1;");
        fs.insert("02.txoff.sql", "CREATE TABLE table2 (id INT); fail_here;");
        fs.insert("02.undo.sql", "DROP TABLE IF EXISTS table2;");
        fs.insert("03.txoff.sql", "CREATE TABLE table3 (id INT);");
        fs.insert("03.undo.sql", "DROP TABLE IF EXISTS table3;");

        let mut runner = quiet(MigrateOptions::default());
        let err = runner
            .run(s.as_mut(), &fs, &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("undo 02.undo.sql succeeded"));

        let history = runner.history().read_all(s.as_mut()).await.unwrap();
        assert!(history["01.txoff.sql"].success);
        assert!(!history["02.txoff.sql"].success);
        assert!(!history.contains_key("03.txoff.sql"));
        assert_eq!(tables(s.as_mut()).await, vec!["ddl_history", "table1"]);
    }

    #[tokio::test]
    async fn test_sqlite_foreign_key_check_fails_group() {
        let db = SqliteDatabase::connect(":memory:").await.unwrap();
        let mut s = db.session().await.unwrap();
        let mut fs = MemFs::new();
        fs.insert(
            "01.sql",
            "CREATE TABLE p (id INTEGER PRIMARY KEY); \
             CREATE TABLE c (id INTEGER PRIMARY KEY, p_id INT REFERENCES p (id)); \
             INSERT INTO c VALUES (1, 42);",
        );
        let mut runner = quiet(MigrateOptions::default());
        let err = runner
            .run(s.as_mut(), &fs, &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("foreign key violation"));
        assert_eq!(tables(s.as_mut()).await, vec!["ddl_history"]);
    }

    #[tokio::test]
    async fn test_group_reports_ok_only_after_commit() {
        let db = SqliteDatabase::connect(":memory:").await.unwrap();
        let mut s = db.session().await.unwrap();
        let mut fs = MemFs::new();
        fs.insert("01.sql", "CREATE TABLE t1 (id INT);");
        fs.insert("02.sql", "fail_here;");
        fs.insert("03.sql", "CREATE TABLE t3 (id INT);");

        let out = SharedBuffer::new();
        let err_buf = SharedBuffer::new();
        let mut runner = Runner::new(Dialect::Sqlite, MigrateOptions::default())
            .with_reporter(Reporter::new(Box::new(out.clone()), Box::new(err_buf.clone()), false));
        runner
            .run(s.as_mut(), &fs, &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(!out.contents().contains("[OK] 01.sql"), "{}", out.contents());
        assert!(err_buf.contents().contains("[FAIL] 02.sql"));

        fs.insert("02.sql", "CREATE TABLE t2 (id INT);");
        runner
            .run(s.as_mut(), &fs, &[], &CancellationToken::new())
            .await
            .unwrap();
        let printed = out.contents();
        assert!(printed.contains("[OK] 01.sql"));
        assert!(printed.contains("[OK] 03.sql"));
    }

    /// Session that fails scripts containing `LOCKED` with a lock timeout
    /// a fixed number of times, and records every script it is given.
    struct LockingSession {
        lock_failures: u32,
        log: Vec<String>,
    }

    impl LockingSession {
        fn new(lock_failures: u32) -> Self {
            Self {
                lock_failures,
                log: Vec::new(),
            }
        }

        fn count(&self, needle: &str) -> usize {
            self.log.iter().filter(|sql| sql.contains(needle)).count()
        }
    }

    #[async_trait::async_trait]
    impl Session for LockingSession {
        fn dialect(&self) -> Dialect {
            Dialect::Postgres
        }

        async fn exec(&mut self, sql: &str) -> Result<u64> {
            self.log.push(sql.to_string());
            if sql.contains("LOCKED") && self.lock_failures > 0 {
                self.lock_failures -= 1;
                return Err(MigrateError::sql(sql, "canceling statement due to lock timeout"));
            }
            Ok(0)
        }

        async fn exec_params(&mut self, sql: &str, _params: &[crate::core::value::SqlValue<'_>]) -> Result<u64> {
            self.exec(sql).await
        }

        async fn query_each(
            &mut self,
            _sql: &str,
            _params: &[crate::core::value::SqlValue<'_>],
            _sink: &mut crate::core::traits::RowSink<'_>,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn retrying(max_attempts: u32) -> Runner {
        let opts = MigrateOptions {
            skip_history: true,
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            ..Default::default()
        };
        Runner::new(Dialect::Postgres, opts).with_reporter(Reporter::silent())
    }

    #[tokio::test]
    async fn test_lock_timeout_group_retries_until_success() {
        let mut fs = MemFs::new();
        fs.insert("01.sql", "CREATE TABLE a (id INT);");
        fs.insert("02.sql", "ALTER TABLE LOCKED ADD COLUMN b INT; ALTER TABLE a ADD COLUMN c INT;");
        let mut s = LockingSession::new(2);

        let summary = retrying(5)
            .run(&mut s, &fs, &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.applied, vec!["01.sql", "02.sql"]);
        assert_eq!(s.count("LOCKED"), 3);
        assert_eq!(s.count("CREATE TABLE a"), 3);
        assert_eq!(s.count("ROLLBACK"), 2);
        assert_eq!(s.count("COMMIT"), 1);
    }

    #[tokio::test]
    async fn test_lock_timeout_stops_at_max_attempts() {
        let mut fs = MemFs::new();
        fs.insert("01.sql", "ALTER TABLE LOCKED ADD COLUMN b INT;");
        let mut s = LockingSession::new(u32::MAX);

        let err = retrying(3)
            .run(&mut s, &fs, &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_lock_timeout());
        assert!(err.to_string().starts_with("01.sql: "));
        assert_eq!(s.count("LOCKED"), 3);
    }

    #[tokio::test]
    async fn test_single_statement_txoff_is_retried() {
        let mut fs = MemFs::new();
        fs.insert("01.txoff.sql", "CREATE INDEX CONCURRENTLY i ON LOCKED (id);");
        fs.insert("01.undo.sql", "DROP INDEX IF EXISTS i;");
        let mut s = LockingSession::new(1);

        retrying(3)
            .run(&mut s, &fs, &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(s.count("LOCKED"), 2);
        assert_eq!(s.count("DROP INDEX"), 0);
    }

    #[tokio::test]
    async fn test_multi_statement_txoff_runs_undo_without_retry() {
        let mut fs = MemFs::new();
        fs.insert("01.txoff.sql", "CREATE TABLE t (id INT);\nALTER TABLE LOCKED ADD COLUMN b INT;");
        fs.insert("01.undo.sql", "DROP TABLE IF EXISTS t;");
        let mut s = LockingSession::new(u32::MAX);

        let err = retrying(5)
            .run(&mut s, &fs, &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_lock_timeout());
        assert!(err.to_string().contains("undo 01.undo.sql succeeded"));
        assert_eq!(s.count("LOCKED"), 1);
        assert_eq!(s.count("DROP TABLE IF EXISTS t"), 1);
        assert_eq!(s.count("BEGIN"), 0);
    }

    #[tokio::test]
    async fn test_skip_history_writes_nothing() {
        let db = SqliteDatabase::connect(":memory:").await.unwrap();
        let mut s = db.session().await.unwrap();
        let mut fs = MemFs::new();
        fs.insert("01.sql", "CREATE TABLE a (id INT);");
        let opts = MigrateOptions {
            skip_history: true,
            ..Default::default()
        };
        quiet(opts)
            .run(s.as_mut(), &fs, &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(tables(s.as_mut()).await, vec!["a"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let db = SqliteDatabase::connect(":memory:").await.unwrap();
        let mut s = db.session().await.unwrap();
        let mut fs = MemFs::new();
        fs.insert("01.sql", "CREATE TABLE a (id INT);");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = quiet(MigrateOptions::default())
            .run(s.as_mut(), &fs, &[], &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
