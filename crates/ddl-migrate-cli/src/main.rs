//! ddl-migrate CLI - schema migrations, diffs and bulk loads.

use clap::{ArgGroup, Args, Parser, Subcommand};
use ddl_migrate::config::{parse_duration, validation};
use ddl_migrate::history::{self, HistoryStore, ListFilter};
use ddl_migrate::{
    drivers, ArchiveFormat, AutomigrateOptions, Database, DiffOptions, DirFs, DumpOptions, FileConfig,
    LoadOptions, Loader, MigrateError, MigrateOptions, Reporter, Runner, SubsetQuery,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "ddl-migrate")]
#[command(about = "Schema migrations, schema diffs and CSV loads for SQLite, PostgreSQL, MySQL and SQL Server")]
#[command(version)]
struct Cli {
    /// Database DSN
    #[arg(long, global = true, env = "DDL_MIGRATE_DB")]
    db: Option<String>,

    /// Path to YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, global = true, default_value = "warn")]
    verbosity: String,

    /// Log format: text or json
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by `migrate` and `automigrate`.
#[derive(Args, Debug, Default)]
struct MigrateFlags {
    /// History table name [default: ddl_history]
    #[arg(long)]
    history_table: Option<String>,

    /// Session lock timeout, e.g. 5s or 500ms
    #[arg(long)]
    lock_timeout: Option<String>,

    /// Attempts per script on lock timeout [default: 10]
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Upper bound for the retry back-off [default: 5m]
    #[arg(long)]
    max_delay: Option<String>,

    /// Starting retry back-off [default: 1s]
    #[arg(long)]
    base_delay: Option<String>,

    /// Print timestamps and transaction boundaries
    #[arg(long)]
    verbose: bool,

    /// Neither read nor write the history table
    #[arg(long)]
    skip_history_table: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run pending migration files
    Migrate {
        /// Migration directory [default: .]
        #[arg(long)]
        dir: Option<PathBuf>,

        #[command(flatten)]
        flags: MigrateFlags,

        /// Files to run, relative to --dir (default: every file)
        files: Vec<String>,
    },

    /// Diff the database against destination catalogs and apply the result
    Automigrate {
        /// Comma-separated JSON catalog files or DSNs
        #[arg(long, required = true, value_delimiter = ',')]
        dest: Vec<String>,

        /// Drop objects missing from the destination
        #[arg(long)]
        drop_objects: bool,

        /// Apply even when the diff reports warnings
        #[arg(long)]
        accept_warnings: bool,

        /// Print the generated files instead of running them
        #[arg(long)]
        dry_run: bool,

        /// Filename prefix for generated files [default: UTC timestamp]
        #[arg(long)]
        prefix: Option<String>,

        #[command(flatten)]
        flags: MigrateFlags,
    },

    /// Load .sql, CSV, directories, zip or tgz archives
    Load {
        /// Rows per INSERT [default: 500]
        #[arg(long)]
        batchsize: Option<usize>,

        /// Cell value read as NULL [default: \N]
        #[arg(long, conflicts_with = "no_nullstring")]
        nullstring: Option<String>,

        /// Prefix of hex-encoded binary cells [default: 0x]
        #[arg(long, conflicts_with = "no_binaryprefix")]
        binaryprefix: Option<String>,

        /// Read every cell literally
        #[arg(long)]
        no_nullstring: bool,

        /// Never hex-decode binary cells
        #[arg(long)]
        no_binaryprefix: bool,

        /// Store SQLite timestamps as Unix seconds
        #[arg(long)]
        timestamp_as_integer: bool,

        /// Print one line per loaded file
        #[arg(long)]
        verbose: bool,

        /// Items to load
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Dump schema and data as SQL and CSV
    Dump {
        /// Output directory
        #[arg(long)]
        output_dir: PathBuf,

        /// Only write CSV files
        #[arg(long, conflicts_with = "schema_only")]
        data_only: bool,

        /// Only write SQL files
        #[arg(long)]
        schema_only: bool,

        /// Write a zip archive NAME inside the output directory
        #[arg(long, value_name = "NAME", conflicts_with = "tgz")]
        zip: Option<String>,

        /// Write a tgz archive NAME inside the output directory
        #[arg(long, value_name = "NAME")]
        tgz: Option<String>,

        /// Dump rows selected by QUERY plus their parents
        #[arg(long, value_name = "QUERY")]
        subset: Vec<String>,

        /// Like --subset, also pulling rows that reference the selection
        #[arg(long, value_name = "QUERY")]
        extended_subset: Vec<String>,
    },

    /// Drop every object in the database
    Wipe {
        /// Print the drop script instead of running it
        #[arg(long)]
        dry_run: bool,
    },

    /// List migration files and history entries
    #[command(group(ArgGroup::new("filter").args(["pending", "applied", "failed", "missing", "all"])))]
    Ls {
        /// Migration directory [default: .]
        #[arg(long)]
        dir: Option<PathBuf>,

        /// History table name [default: ddl_history]
        #[arg(long)]
        history_table: Option<String>,

        /// Files the next migrate would run (default)
        #[arg(long)]
        pending: bool,

        /// Successfully applied entries
        #[arg(long)]
        applied: bool,

        /// Failed entries
        #[arg(long)]
        failed: bool,

        /// History entries without a file
        #[arg(long)]
        missing: bool,

        /// Everything
        #[arg(long)]
        all: bool,
    },

    /// Mark files as applied without running them
    Touch {
        /// Migration directory [default: .]
        #[arg(long)]
        dir: Option<PathBuf>,

        /// History table name [default: ddl_history]
        #[arg(long)]
        history_table: Option<String>,

        /// Files to mark (default: every pending file)
        files: Vec<String>,
    },

    /// Rename a history entry
    Mv {
        /// History table name [default: ddl_history]
        #[arg(long)]
        history_table: Option<String>,

        old: String,
        new: String,
    },

    /// Delete history entries
    Rm {
        /// History table name [default: ddl_history]
        #[arg(long)]
        history_table: Option<String>,

        #[arg(required = true)]
        files: Vec<String>,
    },
}

/// A command with its options resolved and validated.
enum Plan {
    Migrate {
        opts: MigrateOptions,
        dir: PathBuf,
        files: Vec<String>,
    },
    Automigrate(AutomigrateOptions),
    Load {
        opts: LoadOptions,
        files: Vec<PathBuf>,
    },
    Dump(DumpOptions),
    Wipe {
        dry_run: bool,
    },
    Ls {
        dir: PathBuf,
        history_table: String,
        filter: ListFilter,
    },
    Touch {
        dir: PathBuf,
        history_table: String,
        files: Vec<String>,
    },
    Mv {
        history_table: String,
        old: String,
        new: String,
    },
    Rm {
        history_table: String,
        files: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)?;

    let file = match &cli.config {
        Some(path) => {
            let file = FileConfig::load(path)?;
            info!("Loaded configuration from {:?}", path);
            file
        }
        None => FileConfig::default(),
    };

    // Everything that can be rejected without a database is rejected here.
    let plan = resolve(cli.command, &file)?;
    let dsn = cli
        .db
        .or_else(|| file.db.clone())
        .ok_or_else(|| MigrateError::Config("no database given; use --db or DDL_MIGRATE_DB".into()))?;

    let cancel_token = setup_signal_handler();

    let db = drivers::connect(&dsn).await?;
    let result = execute(plan, db.clone(), &cancel_token).await;
    db.close().await;
    result
}

fn migrate_options(flags: MigrateFlags, file: &FileConfig) -> Result<MigrateOptions, MigrateError> {
    let mut opts = MigrateOptions::default();
    file.apply_migrate(&mut opts)?;
    if let Some(table) = flags.history_table {
        opts.history_table = table;
    }
    if let Some(timeout) = flags.lock_timeout {
        opts.lock_timeout = parse_duration(&timeout)?;
    }
    if let Some(n) = flags.max_attempts {
        opts.retry.max_attempts = n;
    }
    if let Some(d) = flags.base_delay {
        opts.retry.base_delay = parse_duration(&d)?;
    }
    if let Some(d) = flags.max_delay {
        opts.retry.max_delay = parse_duration(&d)?;
    }
    opts.verbose = flags.verbose;
    opts.skip_history = flags.skip_history_table;
    validation::validate_migrate(&opts)?;
    Ok(opts)
}

fn history_table(flag: Option<String>, file: &FileConfig) -> Result<String, MigrateError> {
    let table = migrate_options(
        MigrateFlags {
            history_table: flag,
            ..Default::default()
        },
        file,
    )?
    .history_table;
    Ok(table)
}

fn migration_dir(flag: Option<PathBuf>, file: &FileConfig) -> PathBuf {
    flag.or_else(|| file.dir.clone()).unwrap_or_else(|| PathBuf::from("."))
}

fn resolve(command: Commands, file: &FileConfig) -> Result<Plan, MigrateError> {
    let plan = match command {
        Commands::Migrate { dir, flags, files } => Plan::Migrate {
            opts: migrate_options(flags, file)?,
            dir: migration_dir(dir, file),
            files,
        },

        Commands::Automigrate {
            dest,
            drop_objects,
            accept_warnings,
            dry_run,
            prefix,
            flags,
        } => Plan::Automigrate(AutomigrateOptions {
            dest,
            diff: DiffOptions {
                drop_objects,
                prefix: prefix.unwrap_or_default(),
            },
            migrate: migrate_options(flags, file)?,
            accept_warnings,
            dry_run,
        }),

        Commands::Load {
            batchsize,
            nullstring,
            binaryprefix,
            no_nullstring,
            no_binaryprefix,
            timestamp_as_integer,
            verbose,
            files,
        } => {
            let mut opts = LoadOptions::default();
            file.apply_load(&mut opts)?;
            if let Some(n) = batchsize {
                opts.batch_size = n;
            }
            if nullstring.is_some() {
                opts.null_string = nullstring;
            }
            if binaryprefix.is_some() {
                opts.binary_prefix = binaryprefix;
            }
            if no_nullstring {
                opts.null_string = None;
            }
            if no_binaryprefix {
                opts.binary_prefix = None;
            }
            opts.timestamp_as_integer |= timestamp_as_integer;
            opts.verbose = verbose;
            validation::validate_load(&opts)?;
            Plan::Load { opts, files }
        }

        Commands::Dump {
            output_dir,
            data_only,
            schema_only,
            zip,
            tgz,
            subset,
            extended_subset,
        } => {
            let archive = match (zip, tgz) {
                (Some(name), _) => Some(ArchiveFormat::Zip(name)),
                (None, Some(name)) => Some(ArchiveFormat::Tgz(name)),
                (None, None) => None,
            };
            let subsets = subset
                .into_iter()
                .map(|query| SubsetQuery { query, extended: false })
                .chain(
                    extended_subset
                        .into_iter()
                        .map(|query| SubsetQuery { query, extended: true }),
                )
                .collect();
            let opts = DumpOptions {
                output_dir,
                data_only,
                schema_only,
                archive,
                subsets,
            };
            validation::validate_dump(&opts)?;
            Plan::Dump(opts)
        }

        Commands::Wipe { dry_run } => Plan::Wipe { dry_run },

        Commands::Ls {
            dir,
            history_table: table,
            pending: _,
            applied,
            failed,
            missing,
            all,
        } => {
            let filter = if applied {
                ListFilter::Applied
            } else if failed {
                ListFilter::Failed
            } else if missing {
                ListFilter::Missing
            } else if all {
                ListFilter::All
            } else {
                ListFilter::Pending
            };
            Plan::Ls {
                dir: migration_dir(dir, file),
                history_table: history_table(table, file)?,
                filter,
            }
        }

        Commands::Touch {
            dir,
            history_table: table,
            files,
        } => Plan::Touch {
            dir: migration_dir(dir, file),
            history_table: history_table(table, file)?,
            files,
        },

        Commands::Mv {
            history_table: table,
            old,
            new,
        } => Plan::Mv {
            history_table: history_table(table, file)?,
            old,
            new,
        },

        Commands::Rm {
            history_table: table,
            files,
        } => Plan::Rm {
            history_table: history_table(table, file)?,
            files,
        },
    };
    Ok(plan)
}

async fn execute(plan: Plan, db: Arc<dyn Database>, cancel: &CancellationToken) -> Result<(), MigrateError> {
    let dialect = db.dialect();
    match plan {
        Plan::Migrate { opts, dir, files } => {
            let mut session = db.session().await?;
            let fs = DirFs::new(&dir);
            let mut runner = Runner::new(dialect, opts);
            let summary = runner.run(session.as_mut(), &fs, &files, cancel).await?;
            info!(
                "Applied {} file(s), skipped {}, in {:.2}s",
                summary.applied.len(),
                summary.skipped,
                summary.duration_seconds
            );
        }

        Plan::Automigrate(opts) => {
            let mut session = db.session().await?;
            let reporter = Reporter::stdio(opts.migrate.verbose);
            ddl_migrate::automigrate(session.as_mut(), &opts, reporter, cancel).await?;
        }

        // The loader checks out its own sessions.
        Plan::Load { opts, files } => {
            let summary = Loader::new(db.clone(), opts).load(&files, cancel).await?;
            info!("Loaded {} rows into {} tables", summary.rows(), summary.tables.len());
        }

        Plan::Dump(opts) => {
            let mut session = db.session().await?;
            let summary = ddl_migrate::dump(session.as_mut(), &opts, cancel).await?;
            info!(
                "Wrote {} file(s), {} rows to {}",
                summary.files.len(),
                summary.rows,
                summary.location.display()
            );
        }

        Plan::Wipe { dry_run } => {
            let mut session = db.session().await?;
            let mut reporter = Reporter::stdio(false);
            ddl_migrate::wipe(session.as_mut(), dry_run, &mut reporter, cancel).await?;
        }

        Plan::Ls {
            dir,
            history_table,
            filter,
        } => {
            let mut session = db.session().await?;
            let store = HistoryStore::new(dialect, &history_table);
            store.ensure_table(session.as_mut()).await?;
            let records = store.read_all(session.as_mut()).await?;
            let entries = history::list(&DirFs::new(&dir), &records, filter)?;
            let mut reporter = Reporter::stdio(false);
            for entry in entries {
                if filter == ListFilter::All {
                    reporter.line(&format!("{:<8} {}", entry.status, entry.filename));
                } else {
                    reporter.line(&entry.filename);
                }
            }
            reporter.flush();
        }

        Plan::Touch {
            dir,
            history_table,
            files,
        } => {
            let mut session = db.session().await?;
            let store = HistoryStore::new(dialect, &history_table);
            let touched = history::touch(session.as_mut(), &store, &DirFs::new(&dir), &files).await?;
            let mut reporter = Reporter::stdio(false);
            for filename in touched {
                reporter.line(&filename);
            }
            reporter.flush();
        }

        Plan::Mv {
            history_table,
            old,
            new,
        } => {
            let mut session = db.session().await?;
            let store = HistoryStore::new(dialect, &history_table);
            history::rename(session.as_mut(), &store, &old, &new).await?;
        }

        Plan::Rm { history_table, files } => {
            let mut session = db.session().await?;
            let store = HistoryStore::new(dialect, &history_table);
            let removed = history::remove(session.as_mut(), &store, &files).await?;
            info!("Removed {} history row(s)", removed);
        }
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), MigrateError> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => {
            return Err(MigrateError::Config(format!(
                "unknown verbosity '{}' (expected debug, info, warn or error)",
                other
            )))
        }
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => {
            return Err(MigrateError::Config(format!(
                "unknown log format '{}' (expected text or json)",
                other
            )))
        }
    }

    Ok(())
}

/// Cancel the returned token on SIGINT (Ctrl-C) or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let Ok(mut stream) = signal(kind) else {
                tracing::warn!("cannot install {} handler", name);
                return;
            };
            stream.recv().await;
            eprintln!("\nReceived {}. Stopping after the current statement...", name);
            token.cancel();
        });
    }

    cancel_token
}

/// Windows only has Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current statement...");
            token.cancel();
        }
    });

    cancel_token
}
