//! # ddl-migrate
//!
//! Schema migrations, schema diffs and bulk data movement for SQLite,
//! PostgreSQL, MySQL and SQL Server.
//!
//! - **Migration runner** with a history table, transactional grouping,
//!   lock-timeout retries, undo scripts and repeatable migrations
//! - **Schema diff** per dialect, emitting ordered migration files
//! - **CSV loader and dumper** over directories, zip and tgz archives,
//!   with foreign-key-closed subset dumps
//! - **Wipe** and **automigrate** built on the above
//!
//! ## Example
//!
//! ```rust,no_run
//! use ddl_migrate::{drivers, DirFs, MigrateOptions, Runner};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> ddl_migrate::Result<()> {
//!     let db = drivers::connect("sqlite:app.db").await?;
//!     let mut session = db.session().await?;
//!     let mut runner = Runner::new(db.dialect(), MigrateOptions::default());
//!     let fs = DirFs::new("migrations");
//!     let summary = runner
//!         .run(session.as_mut(), &fs, &[], &CancellationToken::new())
//!         .await?;
//!     println!("applied {} file(s)", summary.applied.len());
//!     Ok(())
//! }
//! ```

pub mod automigrate;
pub mod batch;
pub mod config;
pub mod core;
pub mod diff;
pub mod drivers;
pub mod dump;
pub mod error;
pub mod fsview;
pub mod history;
pub mod load;
pub mod runner;
pub mod wipe;

// Re-exports for convenient access
pub use automigrate::{automigrate, AutomigrateOptions, AutomigrateSummary};
pub use config::{
    ArchiveFormat, DiffOptions, DumpOptions, FileConfig, LoadOptions, MigrateOptions, RetryPolicy,
    SubsetQuery,
};
pub use core::{Catalog, Database, Dialect, Row, Session, SqlValue};
pub use diff::{diff, DiffOutput, Migration};
pub use dump::{dump, DumpSummary};
pub use error::{MigrateError, Result};
pub use fsview::{DirFs, FileView, MemFs};
pub use history::{HistoryStore, ListFilter};
pub use load::{LoadSummary, Loader};
pub use runner::{Reporter, RunSummary, Runner};
pub use wipe::wipe;
