//! Drop every user object in the connected database.
//!
//! The drop script is rendered from the introspected catalog in dependency
//! order: foreign keys first so tables can go in any order, then views,
//! tables, routines, types and finally the schemas that held them.

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::catalog::Catalog;
use crate::core::dialect::Dialect;
use crate::core::traits::Session;
use crate::diff::render::Ddl;
use crate::drivers::{self, common::SessionSetting};
use crate::error::{MigrateError, Result};
use crate::runner::Reporter;

/// Render the drop script for `catalog`. Empty when there is nothing to drop.
pub fn wipe_script(catalog: &Catalog) -> String {
    let d = catalog.dialect;
    let ddl = Ddl::new(d, &catalog.current_schema);
    let mut sql = String::new();

    if d == Dialect::Sqlite {
        // Tables go in catalog order; let the checks run at commit.
        if catalog.tables().next().is_some() {
            sql.push_str("PRAGMA defer_foreign_keys = ON;\n");
        }
    } else {
        for table in catalog.tables() {
            for fk in table.foreign_keys() {
                sql.push_str(&ddl.drop_constraint(table, fk));
            }
        }
    }

    for schema in catalog.schemas.iter().filter(|s| !s.ignore) {
        for view in schema.views.iter().filter(|v| !v.ignore) {
            let kind = if view.is_materialized { "MATERIALIZED VIEW" } else { "VIEW" };
            sql.push_str(&format!("DROP {} {};\n", kind, ddl.name(&view.schema, &view.name)));
        }
    }

    for table in catalog.tables() {
        sql.push_str(&ddl.drop_table(table));
    }

    for schema in catalog.schemas.iter().filter(|s| !s.ignore) {
        for routine in schema.routines.iter().filter(|r| !r.ignore) {
            let name = ddl.name(&routine.schema, &routine.name);
            let kind = if routine.kind.is_empty() { "FUNCTION" } else { routine.kind.as_str() };
            if d == Dialect::Postgres {
                sql.push_str(&format!("DROP {} {}({});\n", kind, name, routine.identity_arguments));
            } else {
                sql.push_str(&format!("DROP {} {};\n", kind, name));
            }
        }
    }

    for schema in catalog.schemas.iter().filter(|s| !s.ignore) {
        for e in schema.enums.iter().filter(|e| !e.ignore) {
            sql.push_str(&format!("DROP TYPE {};\n", ddl.name(&e.schema, &e.name)));
        }
        for domain in schema.domains.iter().filter(|x| !x.ignore) {
            sql.push_str(&format!("DROP DOMAIN {};\n", ddl.name(&domain.schema, &domain.name)));
        }
    }

    // MySQL schemas are databases and SQLite attachments are files; leave both.
    if matches!(d, Dialect::Postgres | Dialect::SqlServer) {
        for schema in catalog.schemas.iter().filter(|s| !s.ignore) {
            let name = catalog.schema_name(&schema.name);
            if name == d.default_schema() || name == catalog.current_schema {
                continue;
            }
            sql.push_str(&format!("DROP SCHEMA {};\n", ddl.ident(name)));
        }
    }
    sql
}

/// Wipe the database, or print the script when `dry_run` is set.
///
/// Returns the script that was (or would have been) executed.
pub async fn wipe(
    session: &mut dyn Session,
    dry_run: bool,
    reporter: &mut Reporter,
    cancel: &CancellationToken,
) -> Result<String> {
    let catalog = drivers::introspect(session).await?;
    let script = wipe_script(&catalog);
    if script.is_empty() {
        info!("wipe: nothing to drop");
        return Ok(script);
    }
    if dry_run {
        reporter.line(script.trim_end());
        reporter.flush();
        return Ok(script);
    }
    if cancel.is_cancelled() {
        return Err(MigrateError::Cancelled);
    }

    let fk_checks = if catalog.dialect == Dialect::Mysql {
        SessionSetting::foreign_keys(session, false).await?
    } else {
        SessionSetting::noop("foreign_keys")
    };
    let result = run_in_tx(session, &script, reporter).await;
    let restored = fk_checks.restore(session).await;
    result?;
    restored?;
    info!("wipe: dropped {} statements", script.lines().count());
    Ok(script)
}

async fn run_in_tx(session: &mut dyn Session, script: &str, reporter: &mut Reporter) -> Result<()> {
    session.begin().await?;
    reporter.boundary("BEGIN");
    match session.exec(script).await {
        Ok(_) => {
            session.commit().await?;
            reporter.boundary("COMMIT");
            Ok(())
        }
        Err(e) => {
            let _ = session.rollback().await;
            reporter.boundary("ROLLBACK");
            Err(MigrateError::sql(script, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::{Constraint, ConstraintKind, Enum, Routine, Schema, Table, View};
    use crate::core::traits::Database;
    use crate::drivers::sqlite::SqliteDatabase;
    use crate::runner::SharedBuffer;

    fn pg_catalog() -> Catalog {
        let mut catalog = Catalog::new(Dialect::Postgres);
        let film = Table {
            schema: "public".into(),
            name: "film".into(),
            constraints: vec![Constraint {
                schema: "public".into(),
                table: "film".into(),
                name: "film_language_id_fkey".into(),
                kind: ConstraintKind::ForeignKey,
                columns: vec!["language_id".into()],
                references_table: "language".into(),
                references_columns: vec!["language_id".into()],
                ..Default::default()
            }],
            ..Default::default()
        };
        let language = Table {
            schema: "public".into(),
            name: "language".into(),
            ..Default::default()
        };
        catalog.schemas.push(Schema {
            name: "public".into(),
            tables: vec![film, language],
            views: vec![View {
                schema: "public".into(),
                name: "film_list".into(),
                ..Default::default()
            }],
            routines: vec![Routine {
                schema: "public".into(),
                name: "last_day".into(),
                kind: "FUNCTION".into(),
                identity_arguments: "timestamp with time zone".into(),
                ..Default::default()
            }],
            enums: vec![Enum {
                schema: "public".into(),
                name: "mpaa_rating".into(),
                labels: vec!["G".into()],
                ..Default::default()
            }],
            ..Default::default()
        });
        catalog.schemas.push(Schema {
            name: "archive".into(),
            ..Default::default()
        });
        catalog
    }

    #[test]
    fn test_postgres_wipe_order() {
        assert_eq!(
            wipe_script(&pg_catalog()),
            "ALTER TABLE film DROP CONSTRAINT film_language_id_fkey;\n\
             DROP VIEW film_list;\n\
             DROP TABLE film;\n\
             DROP TABLE language;\n\
             DROP FUNCTION last_day(timestamp with time zone);\n\
             DROP TYPE mpaa_rating;\n\
             DROP SCHEMA archive;\n"
        );
    }

    #[test]
    fn test_empty_catalog_has_empty_script() {
        assert_eq!(wipe_script(&Catalog::new(Dialect::Sqlite)), "");
    }

    async fn seeded() -> (tempfile::TempDir, Box<dyn Session>) {
        let dir = tempfile::tempdir().unwrap();
        let db = SqliteDatabase::connect(&dir.path().join("w.db").to_string_lossy())
            .await
            .unwrap();
        let mut s = db.session().await.unwrap();
        s.exec(
            "PRAGMA foreign_keys = ON;\n\
             CREATE TABLE parent (id INTEGER PRIMARY KEY);\n\
             CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES parent (id));\n\
             CREATE VIEW v AS SELECT * FROM child;\n\
             INSERT INTO parent VALUES (1);\n\
             INSERT INTO child VALUES (1, 1);\n",
        )
        .await
        .unwrap();
        (dir, s)
    }

    #[tokio::test]
    async fn test_sqlite_wipe_drops_everything() {
        let (_dir, mut s) = seeded().await;
        let mut reporter = Reporter::silent();
        wipe(s.as_mut(), false, &mut reporter, &CancellationToken::new())
            .await
            .unwrap();
        let left = s
            .query("SELECT name FROM sqlite_master WHERE name NOT LIKE 'sqlite\\_%' ESCAPE '\\'", &[])
            .await
            .unwrap();
        assert!(left.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_prints_script() {
        let (_dir, mut s) = seeded().await;
        let out = SharedBuffer::new();
        let mut reporter = Reporter::new(Box::new(out.clone()), Box::new(std::io::sink()), false);
        let script = wipe(s.as_mut(), true, &mut reporter, &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.contents().contains("DROP VIEW v;"));
        assert!(script.contains("DROP TABLE parent;"));
        let left = s
            .query("SELECT count(*) FROM sqlite_master WHERE type = 'table'", &[])
            .await
            .unwrap();
        assert_eq!(left[0].get_i64(0), Some(2));
    }
}
