//! Command line runner for ledger-migrate.
//!
//! Applies a JSON migration file to a SQLite database and reports on its ledger:
//!
//! ```text
//! ledger-migrate --database app.db run --migrations migrations.json
//! ledger-migrate --database app.db pending --migrations migrations.json
//! ledger-migrate --database app.db status --format json
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ledger_migrate::{
    Error, MigrationResult, MigrationRunner, MigrationSet, PendingPolicy, RunnerBuilder,
};
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Parser)]
#[command(name = "ledger-migrate", version, about = "Apply ledger-tracked SQL migrations")]
struct Cli {
    /// Path to the SQLite database file (created if missing)
    #[arg(long, env = "LEDGER_MIGRATE_DATABASE", global = true)]
    database: Option<PathBuf>,

    /// Ledger table name
    #[arg(long, default_value = ledger_migrate::DEFAULT_LEDGER_TABLE_NAME, global = true)]
    ledger_table: String,

    /// Increase log verbosity (-v, -vv, -vvv). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply every pending migration
    Run(MigrationArgs),
    /// List the versions a run would apply, without applying them
    Pending(MigrationArgs),
    /// Show the current version and the ledger history
    Status {
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
}

#[derive(Debug, clap::Args)]
struct MigrationArgs {
    /// JSON file mapping version keys to lists of SQL statements
    #[arg(long, short)]
    migrations: PathBuf,

    /// How pending versions are decided
    #[arg(long, value_enum, default_value_t = Policy::Ledger)]
    policy: Policy,

    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Policy {
    /// Every configured version without a successful ledger row
    Ledger,
    /// Only versions above the current version
    AboveCursor,
}

impl From<Policy> for PendingPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Ledger => PendingPolicy::Ledger,
            Policy::AboveCursor => PendingPolicy::AboveCursor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let stdout = std::io::stdout();
    execute(&cli, &mut stdout.lock())
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(verbose > 1))
        .init();
}

fn execute(cli: &Cli, out: &mut impl Write) -> Result<()> {
    let Some(ref database) = cli.database else {
        bail!("no database given: pass --database or set LEDGER_MIGRATE_DATABASE");
    };
    let mut conn = Connection::open(database)
        .with_context(|| format!("could not open database {}", database.display()))?;
    tracing::debug!(database = %database.display(), "Opened database");

    match &cli.command {
        Commands::Run(args) => {
            let set = load_migrations(&args.migrations)?;
            let mut runner = runner_builder(cli, set)
                .with_pending_policy(args.policy.into())
                .build(&mut conn)?;
            match runner.migrate() {
                Ok(results) => {
                    print_results(out, args.format, &results)?;
                    if args.format == Format::Text {
                        writeln!(out, "current version: {}", runner.current_version())?;
                    }
                    Ok(())
                }
                Err(error) => {
                    if let Error::Statement { ref results, .. } = error {
                        print_results(out, args.format, results)?;
                    }
                    Err(error.into())
                }
            }
        }
        Commands::Pending(args) => {
            let set = load_migrations(&args.migrations)?;
            let runner = runner_builder(cli, set)
                .with_pending_policy(args.policy.into())
                .build(&mut conn)?;
            print_pending(out, args.format, &runner)
        }
        Commands::Status { format } => {
            let mut runner = runner_builder(cli, MigrationSet::new())
                .fail_on_bootstrap_error(true)
                .build(&mut conn)?;
            print_status(out, *format, &mut runner)
        }
    }
}

fn runner_builder(cli: &Cli, set: MigrationSet) -> RunnerBuilder {
    RunnerBuilder::new(set).with_ledger_table_name(cli.ledger_table.as_str())
}

fn load_migrations(path: &Path) -> Result<MigrationSet> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("could not read migration file {}", path.display()))?;
    let set = MigrationSet::from_json(&json)
        .with_context(|| format!("invalid migration file {}", path.display()))?;
    tracing::debug!(path = %path.display(), versions = set.len(), "Loaded migrations");
    Ok(set)
}

fn print_results(out: &mut impl Write, format: Format, results: &[MigrationResult]) -> Result<()> {
    match format {
        Format::Json => writeln!(out, "{}", serde_json::to_string_pretty(results)?)?,
        Format::Text => {
            if results.is_empty() {
                writeln!(out, "No pending migrations.")?;
            }
            for result in results {
                if result.success {
                    writeln!(
                        out,
                        "v{} ok    {} (read {}, written {})",
                        result.version,
                        result.query,
                        result.rows_read.unwrap_or(0),
                        result.rows_written.unwrap_or(0)
                    )?;
                } else {
                    writeln!(
                        out,
                        "v{} FAIL  {}: {}",
                        result.version,
                        result.query,
                        result.error.as_deref().unwrap_or("unknown error")
                    )?;
                }
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct PendingReport {
    current_version: u64,
    pending: Vec<u64>,
}

fn print_pending<E>(
    out: &mut impl Write,
    format: Format,
    runner: &MigrationRunner<E>,
) -> Result<()> {
    let report = PendingReport {
        current_version: runner.current_version(),
        pending: runner.pending_versions(),
    };
    match format {
        Format::Json => writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?,
        Format::Text => {
            writeln!(out, "current version: {}", report.current_version)?;
            if report.pending.is_empty() {
                writeln!(out, "No pending migrations.")?;
            } else {
                let versions: Vec<String> = report.pending.iter().map(u64::to_string).collect();
                writeln!(out, "pending: {}", versions.join(", "))?;
            }
        }
    }
    Ok(())
}

fn print_status<E: ledger_migrate::Executor>(
    out: &mut impl Write,
    format: Format,
    runner: &mut MigrationRunner<E>,
) -> Result<()> {
    let history = runner.history()?;
    match format {
        Format::Json => {
            let status = serde_json::json!({
                "current_version": runner.current_version(),
                "history": history,
            });
            writeln!(out, "{}", serde_json::to_string_pretty(&status)?)?;
        }
        Format::Text => {
            writeln!(out, "current version: {}", runner.current_version())?;
            for entry in &history {
                let written = entry
                    .applied_at
                    .map(|at| at.to_string())
                    .unwrap_or_else(|| "-".to_string());
                if entry.is_applied() {
                    writeln!(out, "v{:<6} applied {}", entry.version, written)?;
                    continue;
                }
                match entry.failure() {
                    Some(failure) => writeln!(
                        out,
                        "v{:<6} failed  {} statement {}: {}",
                        entry.version,
                        written,
                        failure.index + 1,
                        failure.error
                    )?,
                    None => writeln!(
                        out,
                        "v{:<6} failed  {} {}",
                        entry.version,
                        written,
                        entry.errors.as_deref().unwrap_or_default()
                    )?,
                }
            }
        }
    }
    Ok(())
}
