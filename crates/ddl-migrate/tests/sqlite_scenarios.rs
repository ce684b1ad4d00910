//! End-to-end runs against SQLite databases in temporary directories.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use ddl_migrate::history::{self, MigrationRecord};
use ddl_migrate::runner::SharedBuffer;
use ddl_migrate::{
    drivers, AutomigrateOptions, Database, Dialect, DirFs, DumpOptions, HistoryStore, ListFilter,
    LoadOptions, Loader, MigrateError, MigrateOptions, Reporter, RunSummary, Runner, Session,
};
use tokio_util::sync::CancellationToken;

const SAKILA: &str = "\
CREATE TABLE language (
    language_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE film (
    film_id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    language_id INTEGER NOT NULL REFERENCES language (language_id)
);
CREATE INDEX film_title_idx ON film (title);
CREATE TABLE customer (
    customer_id INTEGER PRIMARY KEY,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL
);
";

const EMPLOYEE: &str = "\
CREATE TABLE employee (
    emp_no INTEGER PRIMARY KEY,
    birth_date DATE NOT NULL,
    first_name TEXT NOT NULL
);
";

async fn open(dir: &Path, name: &str) -> Arc<dyn Database> {
    drivers::connect(&format!("sqlite:{}", dir.join(name).display()))
        .await
        .unwrap()
}

fn write(root: &Path, name: &str, content: &str) {
    let path = root.join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

async fn migrate(session: &mut dyn Session, dir: &Path) -> Result<RunSummary, MigrateError> {
    Runner::new(Dialect::Sqlite, MigrateOptions::default())
        .with_reporter(Reporter::silent())
        .run(session, &DirFs::new(dir), &[], &CancellationToken::new())
        .await
}

async fn history_rows(session: &mut dyn Session) -> BTreeMap<String, MigrationRecord> {
    HistoryStore::new(Dialect::Sqlite, "ddl_history")
        .read_all(session)
        .await
        .unwrap()
}

async fn table_names(session: &mut dyn Session) -> Vec<String> {
    session
        .query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name", &[])
        .await
        .unwrap()
        .iter()
        .map(|r| r.get_string(0))
        .collect()
}

fn sakila_dir(root: &Path) {
    write(root, "01_sakila.sql", SAKILA);
    write(root, "02_employee.sql", EMPLOYEE);
    write(
        root,
        "repeatable/views/customer_list.sql",
        "DROP VIEW IF EXISTS customer_list;\n\
         CREATE VIEW customer_list AS SELECT customer_id, first_name || ' ' || last_name AS name FROM customer;\n",
    );
    write(
        root,
        "repeatable/views/film_list.sql",
        "DROP VIEW IF EXISTS film_list;\n\
         CREATE VIEW film_list AS SELECT f.film_id, f.title, l.name AS language FROM film f JOIN language l USING (language_id);\n",
    );
}

#[tokio::test]
async fn test_migrate_all() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("sqlite_migrations");
    sakila_dir(&migrations);
    let db = open(dir.path(), "sakila.db").await;
    let mut s = db.session().await.unwrap();

    let summary = migrate(s.as_mut(), &migrations).await.unwrap();
    assert_eq!(
        summary.applied,
        vec![
            "01_sakila.sql",
            "02_employee.sql",
            "repeatable/views/customer_list.sql",
            "repeatable/views/film_list.sql",
        ]
    );
    let rows = history_rows(s.as_mut()).await;
    assert_eq!(rows.len(), 4);
    assert!(rows.values().all(|r| r.success));

    // Unchanged tree: nothing to do.
    let again = migrate(s.as_mut(), &migrations).await.unwrap();
    assert!(again.applied.is_empty());
    assert_eq!(again.skipped, 4);

    // Line endings alone do not change a checksum.
    let crlf = std::fs::read_to_string(migrations.join("repeatable/views/film_list.sql"))
        .unwrap()
        .replace('\n', "\r\n");
    write(&migrations, "repeatable/views/film_list.sql", &crlf);
    assert!(migrate(s.as_mut(), &migrations).await.unwrap().applied.is_empty());

    // One changed byte does.
    write(
        &migrations,
        "repeatable/views/film_list.sql",
        "DROP VIEW IF EXISTS film_list;\nCREATE VIEW film_list AS SELECT film_id, title FROM film;\n",
    );
    let rerun = migrate(s.as_mut(), &migrations).await.unwrap();
    assert_eq!(rerun.applied, vec!["repeatable/views/film_list.sql"]);
}

#[tokio::test]
async fn test_transactional_failure_rolls_back_group() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("m");
    write(&migrations, "01.sql", "CREATE TABLE table1 (id INTEGER PRIMARY KEY);\n");
    write(&migrations, "02.sql", "CREATE TABLE table2 (id INTEGER PRIMARY KEY);\nfail_here;\n");
    write(&migrations, "03.sql", "CREATE TABLE table3 (id INTEGER PRIMARY KEY);\n");
    let db = open(dir.path(), "t.db").await;
    let mut s = db.session().await.unwrap();

    let err = migrate(s.as_mut(), &migrations).await.unwrap_err();
    assert!(matches!(err, MigrateError::Migration { ref filename, .. } if filename == "02.sql"));

    let rows = history_rows(s.as_mut()).await;
    assert_eq!(rows.keys().collect::<Vec<_>>(), vec!["01.sql", "02.sql"]);
    assert!(rows.values().all(|r| !r.success));
    assert_eq!(table_names(s.as_mut()).await, vec!["ddl_history"]);
}

#[tokio::test]
async fn test_non_transactional_failure_runs_undo() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("m");
    for (n, extra) in [(1, ""), (2, "fail_here;\n"), (3, "")] {
        write(
            &migrations,
            &format!("0{}.txoff.sql", n),
            &format!("CREATE TABLE table{n} (id INTEGER PRIMARY KEY);\n{extra}"),
        );
        write(&migrations, &format!("0{}.undo.sql", n), &format!("DROP TABLE IF EXISTS table{n};\n"));
    }
    let db = open(dir.path(), "u.db").await;
    let mut s = db.session().await.unwrap();

    let err = migrate(s.as_mut(), &migrations).await.unwrap_err();
    match err {
        MigrateError::Migration { filename, undo, .. } => {
            assert_eq!(filename, "02.txoff.sql");
            assert!(undo.is_some());
        }
        other => panic!("unexpected error: {other}"),
    }

    let rows = history_rows(s.as_mut()).await;
    assert!(rows["01.txoff.sql"].success);
    assert!(!rows["02.txoff.sql"].success);
    assert!(!rows.contains_key("03.txoff.sql"));
    assert_eq!(table_names(s.as_mut()).await, vec!["ddl_history", "table1"]);
}

#[tokio::test]
async fn test_automigrate_dry_run_on_unchanged_destination() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("sqlite_migrations");
    sakila_dir(&migrations);
    let db = open(dir.path(), "sakila.db").await;
    let mut s = db.session().await.unwrap();
    migrate(s.as_mut(), &migrations).await.unwrap();

    let catalog = drivers::introspect(s.as_mut()).await.unwrap();
    let dest = dir.path().join("sakila.json");
    std::fs::write(&dest, serde_json::to_vec_pretty(&catalog).unwrap()).unwrap();

    let out = SharedBuffer::new();
    let reporter = Reporter::new(Box::new(out.clone()), Box::new(out.clone()), false);
    let opts = AutomigrateOptions {
        dest: vec![dest.to_string_lossy().into_owned()],
        dry_run: true,
        ..Default::default()
    };
    let summary = ddl_migrate::automigrate(s.as_mut(), &opts, reporter, &CancellationToken::new())
        .await
        .unwrap();
    assert!(summary.diff.is_empty());
    assert!(summary.run.is_none());
    assert_eq!(out.contents(), "");
}

#[tokio::test]
async fn test_touch_then_rename_history_entry() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("sqlite_migrations");
    sakila_dir(&migrations);
    let db = open(dir.path(), "h.db").await;
    let mut s = db.session().await.unwrap();
    let store = HistoryStore::new(Dialect::Sqlite, "ddl_history");
    let fs = DirFs::new(&migrations);

    let touched = history::touch(
        s.as_mut(),
        &store,
        &fs,
        &["repeatable/views/customer_list.sql".to_string()],
    )
    .await
    .unwrap();
    assert_eq!(touched, vec!["repeatable/views/customer_list.sql"]);

    history::rename(
        s.as_mut(),
        &store,
        "repeatable/views/customer_list.sql",
        "repeatable/views/customer_list2.sql",
    )
    .await
    .unwrap();

    let rows = history_rows(s.as_mut()).await;
    let applied: Vec<String> = history::list(&fs, &rows, ListFilter::Applied)
        .unwrap()
        .into_iter()
        .map(|e| e.filename)
        .collect();
    assert_eq!(applied, vec!["repeatable/views/customer_list2.sql"]);

    // Renaming a missing entry touches no row and fails.
    let err = history::rename(s.as_mut(), &store, "nope.sql", "still_nope.sql")
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::History(_)));
}

async fn seed_data(s: &mut dyn Session) {
    s.exec(
        "INSERT INTO language VALUES (1, 'English'), (2, 'Italian');\n\
         INSERT INTO film VALUES (1, 'ACADEMY DINOSAUR', 1), (2, 'ACE, GOLDFINGER', 2);\n\
         INSERT INTO customer VALUES (1, 'MARY', 'SMITH'), (2, 'PATRICIA', 'JOHNSON');\n\
         INSERT INTO employee VALUES (10001, '1953-09-02', 'Georgi');\n\
         CREATE TABLE blob_store (id INTEGER PRIMARY KEY, data BLOB, note TEXT);\n\
         INSERT INTO blob_store VALUES (1, x'00ff10', NULL), (2, NULL, 'line one\nline two');\n",
    )
    .await
    .unwrap();
}

async fn snapshot(s: &mut dyn Session) -> Vec<String> {
    let mut out = Vec::new();
    for (table, order) in [
        ("language", "language_id"),
        ("film", "film_id"),
        ("customer", "customer_id"),
        ("employee", "emp_no"),
        ("blob_store", "id"),
    ] {
        let sql = format!("SELECT * FROM {} ORDER BY {}", table, order);
        for row in s.query(&sql, &[]).await.unwrap() {
            let cells: Vec<String> = row
                .values()
                .iter()
                .map(|v| v.to_text().unwrap_or_else(|| "NULL".into()))
                .collect();
            out.push(format!("{}: {}", table, cells.join("|")));
        }
    }
    out
}

#[tokio::test]
async fn test_dump_then_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("sqlite_migrations");
    sakila_dir(&migrations);

    let src = open(dir.path(), "src.db").await;
    let expected = {
        let mut s = src.session().await.unwrap();
        migrate(s.as_mut(), &migrations).await.unwrap();
        seed_data(s.as_mut()).await;
        let out = dir.path().join("dump");
        let summary = ddl_migrate::dump(
            s.as_mut(),
            &DumpOptions {
                output_dir: out,
                ..Default::default()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(summary.files.contains(&"film.csv".to_string()));
        assert_eq!(summary.files.first().map(String::as_str), Some("schema.sql"));
        snapshot(s.as_mut()).await
    };

    let dest = open(dir.path(), "dest.db").await;
    let loaded = Loader::new(dest.clone(), LoadOptions::default())
        .with_reporter(Reporter::silent())
        .load(&[dir.path().join("dump")], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(loaded.scripts.first().map(String::as_str), Some("schema.sql"));

    let mut s = dest.session().await.unwrap();
    assert_eq!(snapshot(s.as_mut()).await, expected);
    let idx = s
        .query("SELECT name FROM sqlite_master WHERE type = 'index' AND name = 'film_title_idx'", &[])
        .await
        .unwrap();
    assert_eq!(idx.len(), 1);
}

#[tokio::test]
async fn test_subset_dump_to_zip_loads_consistently() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("sqlite_migrations");
    sakila_dir(&migrations);

    let src = open(dir.path(), "src.db").await;
    {
        let mut s = src.session().await.unwrap();
        migrate(s.as_mut(), &migrations).await.unwrap();
        seed_data(s.as_mut()).await;
        ddl_migrate::dump(
            s.as_mut(),
            &DumpOptions {
                output_dir: dir.path().join("out"),
                archive: Some(ddl_migrate::ArchiveFormat::Zip("subset".into())),
                subsets: vec![ddl_migrate::SubsetQuery {
                    query: "SELECT {*} FROM {film} WHERE film_id = 2".into(),
                    extended: false,
                }],
                ..Default::default()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    }

    let dest = open(dir.path(), "dest.db").await;
    Loader::new(dest.clone(), LoadOptions::default())
        .with_reporter(Reporter::silent())
        .load(&[dir.path().join("out").join("subset.zip")], &CancellationToken::new())
        .await
        .unwrap();

    let mut s = dest.session().await.unwrap();
    let films = s.query("SELECT film_id, title FROM film", &[]).await.unwrap();
    assert_eq!(films.len(), 1);
    assert_eq!(films[0].get_string(1), "ACE, GOLDFINGER");
    let languages = s.query("SELECT name FROM language", &[]).await.unwrap();
    assert_eq!(languages.len(), 1);
    assert_eq!(languages[0].get_string(0), "Italian");
    let customers = s.query("SELECT count(*) FROM customer", &[]).await.unwrap();
    assert_eq!(customers[0].get_i64(0), Some(0));
}
