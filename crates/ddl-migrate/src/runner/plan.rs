//! Filename taxonomy, ordering and skip rules.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::core::dialect::Dialect;
use crate::error::Result;
use crate::fsview::FileView;
use crate::history::MigrationRecord;

/// Directory prefix of repeatable migrations.
pub const REPEATABLE_PREFIX: &str = "repeatable/";

/// Load-phase files that `migrate` never runs.
pub const RESERVED_FILES: &[&str] = &["schema.sql", "indexes.sql", "constraints.sql"];

/// SHA-256 of the content with CRLF line endings folded to LF, as lowercase hex.
pub fn checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    let mut start = 0;
    for i in 0..content.len() {
        if content[i] == b'\r' && content.get(i + 1) == Some(&b'\n') {
            hasher.update(&content[start..i]);
            start = i + 1;
        }
    }
    hasher.update(&content[start..]);
    hex::encode(hasher.finalize())
}

pub fn is_repeatable(filename: &str) -> bool {
    filename.starts_with(REPEATABLE_PREFIX)
}

pub fn is_undo(filename: &str) -> bool {
    filename.ends_with(".undo.sql")
}

pub fn is_txoff(filename: &str) -> bool {
    filename.ends_with(".txoff.sql")
}

pub fn is_tx(filename: &str) -> bool {
    filename.ends_with(".tx.sql")
}

fn basename(filename: &str) -> &str {
    filename.rsplit('/').next().unwrap_or(filename)
}

/// Whether `filename` is a migration script (not an undo, not a load-phase file).
pub fn is_migration(filename: &str) -> bool {
    filename.ends_with(".sql") && !is_undo(filename) && !RESERVED_FILES.contains(&basename(filename))
}

/// Compensation script paired with `filename`.
pub fn undo_filename(filename: &str) -> String {
    let stem = filename
        .strip_suffix(".txoff.sql")
        .or_else(|| filename.strip_suffix(".tx.sql"))
        .or_else(|| filename.strip_suffix(".sql"))
        .unwrap_or(filename);
    format!("{}.undo.sql", stem)
}

/// Drop non-migrations, then put regular files before repeatable ones.
/// Caller order is kept within each group.
pub fn order_migrations(filenames: &[String]) -> Vec<String> {
    let (repeatable, regular): (Vec<&String>, Vec<&String>) = filenames
        .iter()
        .filter(|f| is_migration(f))
        .partition(|f| is_repeatable(f));
    regular.into_iter().chain(repeatable).cloned().collect()
}

/// Whether a file with `checksum` can be skipped given its history row.
pub fn should_skip(filename: &str, checksum: &str, record: Option<&MigrationRecord>) -> bool {
    match record {
        Some(r) if r.success => !is_repeatable(filename) || r.checksum == checksum,
        _ => false,
    }
}

/// A file ready for the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    pub filename: String,
    pub content: String,
    pub checksum: String,
}

/// Read and checksum `filenames` from `fs`, keeping only migrations in run order.
pub fn read_planned(fs: &dyn FileView, filenames: &[String]) -> Result<Vec<PlannedFile>> {
    order_migrations(filenames)
        .into_iter()
        .map(|filename| {
            let bytes = fs.read(&filename)?;
            let checksum = checksum(&bytes);
            let content = String::from_utf8_lossy(&bytes).into_owned();
            Ok(PlannedFile {
                filename,
                content,
                checksum,
            })
        })
        .collect()
}

/// Files that need to run, in execution order.
pub fn pending<'a>(
    ordered: impl IntoIterator<Item = &'a PlannedFile>,
    history: &BTreeMap<String, MigrationRecord>,
) -> Vec<PlannedFile> {
    ordered
        .into_iter()
        .filter(|f| !should_skip(&f.filename, &f.checksum, history.get(&f.filename)))
        .cloned()
        .collect()
}

/// A flush unit: files sharing one transaction, or one file on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub files: Vec<PlannedFile>,
    pub transactional: bool,
}

/// Split pending files into flush groups.
///
/// `.txoff.sql` runs alone outside a transaction, `.tx.sql` runs alone in one.
/// MySQL DDL is not transactional, so its plain files also run one by one
/// without a transaction. Everything else shares a transaction until a
/// boundary file or the end of the queue.
pub fn group_files(dialect: Dialect, files: Vec<PlannedFile>) -> Vec<Group> {
    let mut groups = Vec::new();
    let mut current: Vec<PlannedFile> = Vec::new();

    for file in files {
        let solo = if is_txoff(&file.filename) {
            Some(false)
        } else if is_tx(&file.filename) {
            Some(true)
        } else if !dialect.transactional_ddl() {
            Some(false)
        } else {
            None
        };
        match solo {
            Some(transactional) => {
                if !current.is_empty() {
                    groups.push(Group {
                        files: std::mem::take(&mut current),
                        transactional: true,
                    });
                }
                groups.push(Group {
                    files: vec![file],
                    transactional,
                });
            }
            None => current.push(file),
        }
    }
    if !current.is_empty() {
        groups.push(Group {
            files: current,
            transactional: true,
        });
    }
    groups
}

/// A script made of exactly one statement: the trimmed text contains a
/// single `;` and it is the final character.
pub fn is_single_statement(content: &str) -> bool {
    let trimmed = content.trim();
    trimmed.matches(';').count() == 1 && trimmed.ends_with(';')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planned(name: &str) -> PlannedFile {
        PlannedFile {
            filename: name.to_string(),
            content: String::new(),
            checksum: String::new(),
        }
    }

    fn record(success: bool, checksum: &str) -> MigrationRecord {
        MigrationRecord {
            filename: "x".into(),
            checksum: checksum.into(),
            success,
            ..Default::default()
        }
    }

    #[test]
    fn test_checksum_ignores_crlf() {
        assert_eq!(checksum(b"a\r\nb\r\n"), checksum(b"a\nb\n"));
        assert_ne!(checksum(b"a\nb\n"), checksum(b"a\nc\n"));
        assert_eq!(
            checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        // a lone CR is kept
        assert_ne!(checksum(b"a\rb"), checksum(b"a\nb"));
    }

    #[test]
    fn test_order_filters_and_partitions() {
        let files: Vec<String> = [
            "repeatable/views/a.sql",
            "02_b.sql",
            "02_b.undo.sql",
            "schema.sql",
            "sub/indexes.sql",
            "01_a.sql",
            "notes.txt",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(
            order_migrations(&files),
            vec!["02_b.sql", "01_a.sql", "repeatable/views/a.sql"]
        );
    }

    #[test]
    fn test_should_skip_rules() {
        assert!(should_skip("01.sql", "new", Some(&record(true, "old"))));
        assert!(!should_skip("01.sql", "x", Some(&record(false, "x"))));
        assert!(!should_skip("01.sql", "x", None));
        assert!(should_skip("repeatable/v.sql", "abc", Some(&record(true, "abc"))));
        assert!(!should_skip("repeatable/v.sql", "abd", Some(&record(true, "abc"))));
        assert!(!should_skip("repeatable/v.sql", "abc", Some(&record(false, "abc"))));
    }

    #[test]
    fn test_undo_filename() {
        assert_eq!(undo_filename("02_t.txoff.sql"), "02_t.undo.sql");
        assert_eq!(undo_filename("dir/03.sql"), "dir/03.undo.sql");
        assert_eq!(undo_filename("04.tx.sql"), "04.undo.sql");
    }

    #[test]
    fn test_grouping_postgres() {
        let files = ["01.sql", "02.sql", "03.txoff.sql", "04.sql", "05.tx.sql", "06.sql"]
            .iter()
            .map(|f| planned(f))
            .collect();
        let groups = group_files(Dialect::Postgres, files);
        let shape: Vec<(Vec<&str>, bool)> = groups
            .iter()
            .map(|g| {
                (
                    g.files.iter().map(|f| f.filename.as_str()).collect(),
                    g.transactional,
                )
            })
            .collect();
        assert_eq!(
            shape,
            vec![
                (vec!["01.sql", "02.sql"], true),
                (vec!["03.txoff.sql"], false),
                (vec!["04.sql"], true),
                (vec!["05.tx.sql"], true),
                (vec!["06.sql"], true),
            ]
        );
    }

    #[test]
    fn test_grouping_mysql_is_per_file() {
        let files = ["01.sql", "02.sql", "03.tx.sql"].iter().map(|f| planned(f)).collect();
        let groups = group_files(Dialect::Mysql, files);
        assert_eq!(groups.len(), 3);
        assert!(!groups[0].transactional);
        assert!(!groups[1].transactional);
        assert!(groups[2].transactional);
    }

    #[test]
    fn test_single_statement_detection() {
        assert!(is_single_statement("  ALTER TABLE t ADD c INT;\n"));
        assert!(!is_single_statement("CREATE TABLE a (x INT); CREATE TABLE b (y INT);"));
        assert!(!is_single_statement("SELECT 1"));
        assert!(!is_single_statement("SELECT ';';"));
    }
}
