//! CLI integration tests for ddl-migrate.
//!
//! These tests verify command-line argument parsing, help output,
//! exit codes for configuration errors and a small SQLite workflow.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::Path;

/// Get a command for the ddl-migrate binary.
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("ddl-migrate").unwrap();
    cmd.env_remove("DDL_MIGRATE_DB");
    cmd
}

fn sqlite_dsn(dir: &Path) -> String {
    format!("sqlite:{}", dir.join("test.db").display())
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    let output = cmd().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["migrate", "automigrate", "load", "dump", "wipe", "ls", "touch", "mv", "rm"] {
        assert!(stdout.contains(command), "help lacks {}", command);
    }
}

#[test]
fn test_migrate_subcommand_help() {
    cmd()
        .args(["migrate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dir"))
        .stdout(predicate::str::contains("--history-table"))
        .stdout(predicate::str::contains("--lock-timeout"))
        .stdout(predicate::str::contains("--max-attempts"))
        .stdout(predicate::str::contains("--base-delay"))
        .stdout(predicate::str::contains("--max-delay"))
        .stdout(predicate::str::contains("--skip-history-table"));
}

#[test]
fn test_automigrate_subcommand_help() {
    cmd()
        .args(["automigrate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dest"))
        .stdout(predicate::str::contains("--drop-objects"))
        .stdout(predicate::str::contains("--accept-warnings"))
        .stdout(predicate::str::contains("--dry-run"));
}

#[test]
fn test_load_subcommand_help() {
    cmd()
        .args(["load", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--batchsize"))
        .stdout(predicate::str::contains("--nullstring"))
        .stdout(predicate::str::contains("--no-binaryprefix"))
        .stdout(predicate::str::contains("--timestamp-as-integer"));
}

#[test]
fn test_dump_subcommand_help() {
    cmd()
        .args(["dump", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-dir"))
        .stdout(predicate::str::contains("--zip"))
        .stdout(predicate::str::contains("--tgz"))
        .stdout(predicate::str::contains("--subset"))
        .stdout(predicate::str::contains("--extended-subset"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ddl-migrate"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_log_format_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"));
}

#[test]
fn test_verbosity_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: warn]"));
}

#[test]
fn test_db_flag_mentions_env() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--db"))
        .stdout(predicate::str::contains("DDL_MIGRATE_DB"));
}

// =============================================================================
// Exit Code Tests - Config Errors (Exit Code 1)
// =============================================================================

#[test]
fn test_missing_db_exits_with_code_1() {
    let dir = tempfile::tempdir().unwrap();
    cmd()
        .args(["migrate", "--dir", dir.path().to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("DDL_MIGRATE_DB"));
}

#[test]
fn test_bad_duration_exits_with_code_1() {
    cmd()
        .args(["--db", "sqlite::memory:", "migrate", "--lock-timeout", "soon"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid duration"));
}

#[test]
fn test_base_delay_above_max_delay_exits_with_code_1() {
    cmd()
        .args(["--db", "sqlite::memory:", "migrate", "--base-delay", "10s", "--max-delay", "1s"])
        .assert()
        .code(1);
}

#[test]
fn test_zero_batchsize_exits_with_code_1() {
    cmd()
        .args(["--db", "sqlite::memory:", "load", "--batchsize", "0", "x.csv"])
        .assert()
        .code(1);
}

#[test]
fn test_unknown_dsn_exits_with_code_1() {
    cmd()
        .args(["--db", "oracle://nope", "wipe", "--dry-run"])
        .assert()
        .code(1);
}

#[test]
fn test_missing_config_exits_with_code_7() {
    // Missing file is an IO error (code 7), not config error (code 1)
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "wipe"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "wipe"])
        .assert()
        .code(1);
}

#[test]
fn test_unknown_config_key_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "source:").unwrap();
    writeln!(file, "  type: mssql").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "wipe"])
        .assert()
        .code(1);
}

#[test]
fn test_dump_zip_and_tgz_conflict() {
    cmd()
        .args(["dump", "--output-dir", "out", "--zip", "a", "--tgz", "b"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

// =============================================================================
// SQLite workflow
// =============================================================================

#[test]
fn test_sqlite_migrate_ls_mv_flow() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("migrations");
    std::fs::create_dir_all(migrations.join("repeatable")).unwrap();
    std::fs::write(migrations.join("01_film.sql"), "CREATE TABLE film (film_id INTEGER PRIMARY KEY);\n").unwrap();
    std::fs::write(
        migrations.join("repeatable/film_list.sql"),
        "DROP VIEW IF EXISTS film_list;\nCREATE VIEW film_list AS SELECT film_id FROM film;\n",
    )
    .unwrap();
    let db = sqlite_dsn(dir.path());
    let mig = migrations.to_str().unwrap();

    cmd()
        .args(["--db", &db, "ls", "--dir", mig])
        .assert()
        .success()
        .stdout(predicate::str::contains("01_film.sql"))
        .stdout(predicate::str::contains("repeatable/film_list.sql"));

    cmd()
        .args(["--db", &db, "migrate", "--dir", mig])
        .assert()
        .success()
        .stdout(predicate::str::contains("[OK] 01_film.sql"))
        .stdout(predicate::str::contains("[OK] repeatable/film_list.sql"));

    // Nothing pending on a second run.
    cmd()
        .args(["--db", &db, "migrate", "--dir", mig])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    cmd()
        .args(["--db", &db, "mv", "repeatable/film_list.sql", "repeatable/film_list2.sql"])
        .assert()
        .success();

    cmd()
        .args(["--db", &db, "ls", "--applied", "--dir", mig])
        .assert()
        .success()
        .stdout(predicate::str::contains("repeatable/film_list2.sql"))
        .stdout(predicate::str::contains("repeatable/film_list.sql\n").not());

    cmd()
        .args(["--db", &db, "ls", "--missing", "--dir", mig])
        .assert()
        .success()
        .stdout("repeatable/film_list2.sql\n");
}

#[test]
fn test_failed_migration_exits_with_code_2() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("01_bad.sql"), "CREATE TABLE t (;\n").unwrap();
    let db = sqlite_dsn(dir.path());

    cmd()
        .args(["--db", &db, "migrate", "--dir", dir.path().to_str().unwrap()])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("[FAIL] 01_bad.sql"));
}

#[test]
fn test_wipe_dry_run_prints_script() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("m");
    std::fs::create_dir_all(&migrations).unwrap();
    std::fs::write(migrations.join("01_t.sql"), "CREATE TABLE t (id INTEGER PRIMARY KEY);\n").unwrap();
    let db = sqlite_dsn(dir.path());

    cmd()
        .args(["--db", &db, "migrate", "--dir", migrations.to_str().unwrap()])
        .assert()
        .success();

    cmd()
        .args(["--db", &db, "wipe", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("DROP TABLE t;"))
        .stdout(predicate::str::contains("DROP TABLE ddl_history;"));
}
