//! `ls`, `touch`, `mv` and `rm` over the history table.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use super::{HistoryStore, MigrationRecord};
use crate::core::traits::Session;
use crate::error::{MigrateError, Result};
use crate::fsview::FileView;
use crate::runner::plan::{read_planned, should_skip};

/// Which entries `ls` shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListFilter {
    /// Files that the next `migrate` would run.
    #[default]
    Pending,
    Applied,
    Failed,
    /// History rows whose file is gone.
    Missing,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Applied,
    Failed,
    Missing,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FileStatus::Pending => "pending",
            FileStatus::Applied => "applied",
            FileStatus::Failed => "failed",
            FileStatus::Missing => "missing",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListEntry {
    pub filename: String,
    pub status: FileStatus,
    pub record: Option<MigrationRecord>,
}

/// Classify directory files and history rows.
pub fn list(
    fs: &dyn FileView,
    history: &BTreeMap<String, MigrationRecord>,
    filter: ListFilter,
) -> Result<Vec<ListEntry>> {
    let files = read_planned(fs, &fs.list()?)?;
    let on_disk: BTreeSet<&str> = files.iter().map(|f| f.filename.as_str()).collect();

    let by_row = |wanted: fn(&MigrationRecord) -> Option<FileStatus>| -> Vec<ListEntry> {
        history
            .values()
            .filter_map(|r| {
                wanted(r).map(|status| ListEntry {
                    filename: r.filename.clone(),
                    status,
                    record: Some(r.clone()),
                })
            })
            .collect()
    };

    let entries = match filter {
        ListFilter::Applied => by_row(|r| r.success.then_some(FileStatus::Applied)),
        ListFilter::Failed => by_row(|r| (!r.success).then_some(FileStatus::Failed)),
        ListFilter::Missing => history
            .values()
            .filter(|r| !on_disk.contains(r.filename.as_str()))
            .map(|r| ListEntry {
                filename: r.filename.clone(),
                status: FileStatus::Missing,
                record: Some(r.clone()),
            })
            .collect(),
        ListFilter::Pending | ListFilter::All => {
            let mut out = Vec::new();
            for file in &files {
                let record = history.get(&file.filename);
                let status = if should_skip(&file.filename, &file.checksum, record) {
                    FileStatus::Applied
                } else if record.is_some_and(|r| !r.success) {
                    FileStatus::Failed
                } else {
                    FileStatus::Pending
                };
                if filter == ListFilter::All || status != FileStatus::Applied {
                    out.push(ListEntry {
                        filename: file.filename.clone(),
                        status,
                        record: record.cloned(),
                    });
                }
            }
            if filter == ListFilter::All {
                out.extend(
                    history
                        .values()
                        .filter(|r| !on_disk.contains(r.filename.as_str()))
                        .map(|r| ListEntry {
                            filename: r.filename.clone(),
                            status: FileStatus::Missing,
                            record: Some(r.clone()),
                        }),
                );
            }
            out
        }
    };
    Ok(entries)
}

/// Mark files as applied without running them. With no files, every pending
/// file is touched. Returns the touched filenames.
pub async fn touch(
    session: &mut dyn Session,
    store: &HistoryStore,
    fs: &dyn FileView,
    files: &[String],
) -> Result<Vec<String>> {
    store.ensure_table(session).await?;
    let history = store.read_all(session).await?;

    let planned = if files.is_empty() {
        read_planned(fs, &fs.list()?)?
            .into_iter()
            .filter(|f| !should_skip(&f.filename, &f.checksum, history.get(&f.filename)))
            .collect()
    } else {
        for f in files {
            if !fs.exists(f) {
                return Err(MigrateError::History(format!("{}: no such migration file", f)));
            }
        }
        read_planned(fs, files)?
    };

    let now = Utc::now();
    let records: Vec<MigrationRecord> = planned
        .iter()
        .map(|f| MigrationRecord {
            filename: f.filename.clone(),
            checksum: f.checksum.clone(),
            started_at: now,
            time_taken_ns: 0,
            success: true,
        })
        .collect();
    store.upsert(session, &records).await?;
    info!("touched {} file(s)", records.len());
    Ok(records.into_iter().map(|r| r.filename).collect())
}

/// Rename one history entry.
pub async fn rename(session: &mut dyn Session, store: &HistoryStore, old: &str, new: &str) -> Result<()> {
    store.ensure_table(session).await?;
    store.rename(session, old, new).await?;
    info!("renamed {} to {}", old, new);
    Ok(())
}

/// Delete history entries; returns the number removed.
pub async fn remove(session: &mut dyn Session, store: &HistoryStore, files: &[String]) -> Result<u64> {
    store.ensure_table(session).await?;
    let n = store.remove(session, files).await?;
    info!("removed {} history row(s)", n);
    Ok(n)
}
