//! stratum CLI
//!
//! Exit codes:
//! - 0: The operation succeeded (or there was nothing to do)
//! - 1: The operation ran and reported a failure, or `lint` found violations
//! - 2: Tool error (bad configuration, unreadable changesets, unreachable database)

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use sqlx::{Database, Executor};
use tracing_subscriber::EnvFilter;

use stratum::config::Config;
use stratum::{Backend, Guidelines, Migrator, Registry, loader, render};

/// Idempotent, batch-aware schema migrations
#[derive(Parser, Debug)]
#[command(name = "stratum", author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file [default: stratum.toml, if present]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database connection string, `sqlite://...` or `mysql://...`
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    database_url: Option<String>,

    /// Directory holding the changeset files
    #[arg(long, env = "STRATUM_MIGRATIONS_DIR", global = true)]
    dir: Option<PathBuf>,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    /// More log output; repeat for more detail
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Command to execute
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Create a new, empty changeset file
    Create {
        /// What the changeset does; prompted for when omitted
        description: Option<String>,
    },
    /// Show applied and pending changesets
    Status,
    /// Apply all pending changesets as a new batch
    Up,
    /// Roll back the most recent batch
    Down,
    /// Roll back every applied changeset
    Reset,
    /// Reset, then apply everything again
    Fresh,
    /// Check changeset SQL against the schema guidelines
    Lint,
}

/// The commands that need a database connection.
#[derive(Debug, Clone, Copy)]
enum Operation {
    Status,
    Up,
    Down,
    Reset,
    Fresh,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(2);
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Returns `Ok(false)` when the operation itself reported failure.
async fn run(cli: Cli) -> Result<bool> {
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let dir = cli.dir.unwrap_or_else(|| config.migrations_dir.clone());

    let operation = match cli.command {
        Command::Create { description } => return create(&dir, description),
        Command::Lint => return lint(&dir, &config.guidelines),
        Command::Status => Operation::Status,
        Command::Up => Operation::Up,
        Command::Down => Operation::Down,
        Command::Reset => Operation::Reset,
        Command::Fresh => Operation::Fresh,
    };

    let url = cli
        .database_url
        .or_else(|| config.database_url.clone())
        .context(
            "No database URL. Pass --database-url, set DATABASE_URL \
             or add database_url to the config file",
        )?;

    let output = Output { json: cli.json };
    let guidelines = config.guidelines.clone();

    if url.starts_with("sqlite:") {
        #[cfg(feature = "sqlite")]
        {
            let backend = stratum::sqlite::SqliteBackend::from_url(&url)
                .context("Invalid SQLite URL")?
                .with_ledger_table(config.ledger_table)?;
            return run_migrator(backend, &dir, guidelines, operation, output).await;
        }
        #[cfg(not(feature = "sqlite"))]
        anyhow::bail!("SQLite support is not compiled in, rebuild with --features sqlite");
    }

    if url.starts_with("mysql:") {
        #[cfg(feature = "mysql")]
        {
            let backend = stratum::mysql::MySqlBackend::from_url(&url)
                .context("Invalid MySQL URL")?
                .with_ledger_table(config.ledger_table)?;
            return run_migrator(backend, &dir, guidelines, operation, output).await;
        }
        #[cfg(not(feature = "mysql"))]
        anyhow::bail!("MySQL support is not compiled in, rebuild with --features mysql");
    }

    anyhow::bail!("Unsupported database URL scheme in '{url}', expected sqlite: or mysql:")
}

async fn run_migrator<B>(
    backend: B,
    dir: &Path,
    guidelines: Guidelines,
    operation: Operation,
    output: Output,
) -> Result<bool>
where
    B: Backend,
    for<'c> &'c mut <B::Database as Database>::Connection: Executor<'c, Database = B::Database>,
{
    let registry = Registry::from_directory(dir)
        .with_context(|| format!("Failed to load changesets from {}", dir.display()))?;
    tracing::info!(backend = backend.name(), count = registry.len(), "Loaded changesets");

    let migrator = Migrator::new(backend, registry).with_guidelines(guidelines);

    match operation {
        Operation::Status => {
            let report = migrator.status().await.context("Failed to read status")?;
            output.emit(&report, render::status)?;
            Ok(true)
        }
        Operation::Up => {
            let report = migrator.run_pending().await.context("Failed to migrate")?;
            output.emit(&report, render::batch)?;
            Ok(report.success)
        }
        Operation::Down => {
            let report = migrator
                .rollback_last_batch()
                .await
                .context("Failed to roll back")?;
            output.emit(&report, render::batch)?;
            Ok(report.success)
        }
        Operation::Reset => {
            let report = migrator.reset_all().await.context("Failed to reset")?;
            output.emit(&report, render::batch)?;
            Ok(report.success)
        }
        Operation::Fresh => {
            let report = migrator.fresh().await.context("Failed to refresh")?;
            output.emit(&report, render::fresh)?;
            Ok(report.success)
        }
    }
}

fn create(dir: &Path, description: Option<String>) -> Result<bool> {
    let description = match description {
        Some(description) => description,
        None => prompt("Changeset description: ")?,
    };
    if description.trim().is_empty() {
        anyhow::bail!("A changeset description is required");
    }

    let now = chrono::Local::now().naive_local();
    let path = loader::create_changeset_file(dir, &description, now)
        .context("Failed to create changeset")?;
    println!("Created {}", path.display());
    Ok(true)
}

fn lint(dir: &Path, guidelines: &Guidelines) -> Result<bool> {
    let changesets = loader::load_directory(dir)
        .with_context(|| format!("Failed to load changesets from {}", dir.display()))?;

    let mut clean = true;
    for changeset in &changesets {
        let violations = guidelines.validate(changeset.up_sql());
        if !violations.is_empty() {
            clean = false;
            print!("{}", render::violations(changeset.id().name(), &violations));
        }
    }

    if clean {
        println!("{} changeset(s) follow the guidelines", changesets.len());
    }
    Ok(clean)
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}

#[derive(Debug, Clone, Copy)]
struct Output {
    json: bool,
}

impl Output {
    fn emit<T: Serialize>(self, value: &T, text: fn(&T) -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text(value));
        }
        Ok(())
    }
}
