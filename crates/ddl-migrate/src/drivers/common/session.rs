//! Session-scoped settings with one-shot restore.
//!
//! A [`SessionSetting`] records the prior value of a session variable,
//! applies the new one and hands back a guard. `restore` puts the prior
//! value back exactly once, no matter how many exit paths call it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::debug;

use crate::core::dialect::Dialect;
use crate::core::traits::Session;
use crate::error::Result;

/// Guard over one changed session variable.
#[derive(Debug)]
pub struct SessionSetting {
    name: &'static str,
    restore_sql: Option<String>,
    restored: AtomicBool,
}

impl SessionSetting {
    /// A guard that restores nothing.
    pub fn noop(name: &'static str) -> Self {
        Self {
            name,
            restore_sql: None,
            restored: AtomicBool::new(false),
        }
    }

    fn with_restore(name: &'static str, restore_sql: String) -> Self {
        Self {
            name,
            restore_sql: Some(restore_sql),
            restored: AtomicBool::new(false),
        }
    }

    /// Apply a lock timeout. A zero timeout leaves the session untouched.
    pub async fn lock_timeout(session: &mut dyn Session, timeout: Duration) -> Result<Self> {
        const NAME: &str = "lock_timeout";
        if timeout.is_zero() {
            return Ok(Self::noop(NAME));
        }
        let millis = timeout.as_millis();

        let (read, set, restore): (&str, String, fn(String) -> String) = match session.dialect() {
            Dialect::Postgres => (
                "SHOW lock_timeout",
                format!("SET lock_timeout = '{}ms'", millis),
                |prior| format!("SET lock_timeout = '{}'", prior.replace('\'', "''")),
            ),
            Dialect::Mysql => (
                "SELECT @@SESSION.lock_wait_timeout",
                // lock_wait_timeout is whole seconds, minimum 1
                format!(
                    "SET SESSION lock_wait_timeout = {}",
                    timeout.as_secs_f64().ceil().max(1.0) as u64
                ),
                |prior| format!("SET SESSION lock_wait_timeout = {}", numeric_or(&prior, "31536000")),
            ),
            Dialect::SqlServer => (
                "SELECT @@LOCK_TIMEOUT",
                format!("SET LOCK_TIMEOUT {}", millis),
                |prior| format!("SET LOCK_TIMEOUT {}", numeric_or(&prior, "-1")),
            ),
            Dialect::Sqlite => (
                "PRAGMA busy_timeout",
                format!("PRAGMA busy_timeout = {}", millis),
                |prior| format!("PRAGMA busy_timeout = {}", numeric_or(&prior, "0")),
            ),
        };

        let prior = read_first(session, read).await?;
        session.exec(&set).await?;
        debug!("{}: {} (was {})", NAME, set, prior);
        Ok(Self::with_restore(NAME, restore(prior)))
    }

    /// Enable or disable foreign-key enforcement for the session.
    ///
    /// Postgres and SQL Server have no session switch for this; the guard is a no-op there.
    pub async fn foreign_keys(session: &mut dyn Session, enabled: bool) -> Result<Self> {
        const NAME: &str = "foreign_keys";
        let (read, set, restore): (&str, String, fn(String) -> String) = match session.dialect() {
            Dialect::Sqlite => (
                "PRAGMA foreign_keys",
                format!("PRAGMA foreign_keys = {}", if enabled { "ON" } else { "OFF" }),
                |prior| format!("PRAGMA foreign_keys = {}", numeric_or(&prior, "1")),
            ),
            Dialect::Mysql => (
                "SELECT @@SESSION.foreign_key_checks",
                format!("SET SESSION foreign_key_checks = {}", u8::from(enabled)),
                |prior| format!("SET SESSION foreign_key_checks = {}", numeric_or(&prior, "1")),
            ),
            Dialect::Postgres | Dialect::SqlServer => return Ok(Self::noop(NAME)),
        };

        let prior = read_first(session, read).await?;
        session.exec(&set).await?;
        debug!("{}: {} (was {})", NAME, set, prior);
        Ok(Self::with_restore(NAME, restore(prior)))
    }

    /// Put the prior value back. Only the first call does anything.
    pub async fn restore(&self, session: &mut dyn Session) -> Result<()> {
        if self
            .restored
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        if let Some(sql) = &self.restore_sql {
            debug!("restoring {}: {}", self.name, sql);
            session.exec(sql).await?;
        }
        Ok(())
    }

    /// Whether `restore` has already run.
    pub fn is_restored(&self) -> bool {
        self.restored.load(Ordering::Acquire)
    }
}

async fn read_first(session: &mut dyn Session, sql: &str) -> Result<String> {
    let row = session.query_row(sql, &[]).await?;
    Ok(row.map(|r| r.get_string(0)).unwrap_or_default())
}

/// Keep only a plain integer value, else fall back to the engine default.
fn numeric_or(prior: &str, fallback: &str) -> String {
    let trimmed = prior.trim();
    if !trimmed.is_empty() && trimmed.trim_start_matches('-').chars().all(|c| c.is_ascii_digit()) {
        trimmed.to_string()
    } else {
        fallback.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::{Row, SqlValue};
    use crate::core::traits::RowSink;
    use async_trait::async_trait;

    /// Records executed statements and answers every query with one fixed value.
    struct FakeSession {
        dialect: Dialect,
        answer: &'static str,
        executed: Vec<String>,
    }

    #[async_trait]
    impl Session for FakeSession {
        fn dialect(&self) -> Dialect {
            self.dialect
        }

        async fn exec(&mut self, sql: &str) -> Result<u64> {
            self.executed.push(sql.to_string());
            Ok(0)
        }

        async fn exec_params(&mut self, sql: &str, _params: &[SqlValue<'_>]) -> Result<u64> {
            self.executed.push(sql.to_string());
            Ok(0)
        }

        async fn query_each(
            &mut self,
            _sql: &str,
            _params: &[SqlValue<'_>],
            sink: &mut RowSink<'_>,
        ) -> Result<()> {
            let cols: Vec<String> = vec!["v".into()];
            sink(Row::new(cols.into(), vec![SqlValue::text_owned(self.answer.into())]))
        }
    }

    fn fake(dialect: Dialect, answer: &'static str) -> FakeSession {
        FakeSession {
            dialect,
            answer,
            executed: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_lock_timeout_postgres_restores_once() {
        let mut s = fake(Dialect::Postgres, "0");
        let guard = SessionSetting::lock_timeout(&mut s, Duration::from_secs(2)).await.unwrap();
        assert_eq!(s.executed, vec!["SET lock_timeout = '2000ms'"]);

        guard.restore(&mut s).await.unwrap();
        guard.restore(&mut s).await.unwrap();
        assert!(guard.is_restored());
        assert_eq!(s.executed.len(), 2);
        assert_eq!(s.executed[1], "SET lock_timeout = '0'");
    }

    #[tokio::test]
    async fn test_lock_timeout_zero_is_noop() {
        let mut s = fake(Dialect::SqlServer, "-1");
        let guard = SessionSetting::lock_timeout(&mut s, Duration::ZERO).await.unwrap();
        guard.restore(&mut s).await.unwrap();
        assert!(s.executed.is_empty());
    }

    #[tokio::test]
    async fn test_lock_timeout_mysql_rounds_up_to_seconds() {
        let mut s = fake(Dialect::Mysql, "50");
        let guard = SessionSetting::lock_timeout(&mut s, Duration::from_millis(1500))
            .await
            .unwrap();
        assert_eq!(s.executed[0], "SET SESSION lock_wait_timeout = 2");
        guard.restore(&mut s).await.unwrap();
        assert_eq!(s.executed[1], "SET SESSION lock_wait_timeout = 50");
    }

    #[tokio::test]
    async fn test_foreign_keys_sqlite() {
        let mut s = fake(Dialect::Sqlite, "1");
        let guard = SessionSetting::foreign_keys(&mut s, false).await.unwrap();
        assert_eq!(s.executed[0], "PRAGMA foreign_keys = OFF");
        guard.restore(&mut s).await.unwrap();
        assert_eq!(s.executed[1], "PRAGMA foreign_keys = 1");
    }

    #[tokio::test]
    async fn test_foreign_keys_postgres_noop() {
        let mut s = fake(Dialect::Postgres, "");
        let guard = SessionSetting::foreign_keys(&mut s, false).await.unwrap();
        guard.restore(&mut s).await.unwrap();
        assert!(s.executed.is_empty());
    }

    #[test]
    fn test_numeric_or() {
        assert_eq!(numeric_or(" 30 ", "1"), "30");
        assert_eq!(numeric_or("-1", "0"), "-1");
        assert_eq!(numeric_or("", "7"), "7");
        assert_eq!(numeric_or("5s", "7"), "7");
    }
}
