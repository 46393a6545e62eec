//! Driftguard CLI
//!
//! Read-only operator tool for the migration audit trail and the migration
//! lock. Migrations themselves are compiled into the application and run at
//! its startup; this binary never executes them.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use driftguard::config::DriftguardConfig;
use driftguard::migration::{
    open_lock_provider, open_log_store, LockProvider, MigrationLogStore, MigrationRecord, RecordOutcome,
};
use driftguard::{connect, MayPostgresExecutor};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "driftguard")]
#[command(about = "Inspect driftguard migration history and lock state")]
#[command(version = "0.1.0")]
struct Cli {
    /// Database connection URL (overrides configuration)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Redis URL for the lock backend (overrides configuration)
    #[arg(long, global = true)]
    redis_url: Option<String>,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List audit records, oldest first
    History {
        /// Only records in this namespace
        #[arg(long)]
        namespace: Option<String>,

        /// Only failed attempts
        #[arg(long)]
        failed: bool,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// List applied composite keys
    Applied {
        /// Only keys in this namespace
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Show whether the migration lock is held
    LockStatus,
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<DriftguardConfig> {
    let mut config = match &cli.config {
        Some(path) => DriftguardConfig::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => DriftguardConfig::load().context("failed to load configuration")?,
    };

    if let Some(url) = cli.database_url.clone() {
        config.database.url = url;
    }
    if let Some(url) = cli.redis_url.clone() {
        config.redis.url = url;
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let client = connect(&config.database.url).context("failed to connect to database")?;
    let executor = MayPostgresExecutor::new(client);

    match cli.command {
        Commands::History {
            namespace,
            failed,
            json,
        } => {
            let store = open_log_store(&config, executor)?;
            handle_history(&store, namespace.as_deref(), failed, json)
        }
        Commands::Applied { namespace } => {
            let store = open_log_store(&config, executor)?;
            handle_applied(&store, namespace.as_deref())
        }
        Commands::LockStatus => handle_lock_status(&config, executor),
    }
}

fn handle_history(
    store: &dyn MigrationLogStore,
    namespace: Option<&str>,
    failed_only: bool,
    json: bool,
) -> Result<()> {
    let records: Vec<MigrationRecord> = store
        .history()?
        .into_iter()
        .filter(|r| namespace.map_or(true, |ns| r.namespace == ns))
        .filter(|r| !failed_only || !r.success)
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No migration records");
        return Ok(());
    }

    println!("\n{}\n", "Migration History".bold());
    for record in &records {
        let outcome = match record.outcome() {
            RecordOutcome::Applied => "applied".green(),
            RecordOutcome::Skipped => "skipped".yellow(),
            RecordOutcome::Failed => "FAILED".red().bold(),
        };
        println!(
            "  #{:<5} {}  {:<8} {}",
            record.id,
            record.applied_at.format("%Y-%m-%d %H:%M:%S"),
            outcome,
            record.key()
        );
        if record.outcome() == RecordOutcome::Failed {
            for line in record.logs.lines() {
                println!("          {}", line.dimmed());
            }
        }
    }

    let failures = records.iter().filter(|r| !r.success).count();
    println!("\nSummary: {} record(s), {} failed", records.len(), failures);
    Ok(())
}

fn handle_applied(store: &dyn MigrationLogStore, namespace: Option<&str>) -> Result<()> {
    let mut keys = store.applied_keys()?;
    keys.retain(|k| namespace.map_or(true, |ns| k.namespace == ns));
    keys.sort();
    keys.dedup();

    if keys.is_empty() {
        println!("No applied migrations");
        return Ok(());
    }
    for key in &keys {
        println!("  {} {}", "✓".green(), key);
    }
    println!("\n{} applied", keys.len());
    Ok(())
}

fn handle_lock_status(config: &DriftguardConfig, executor: MayPostgresExecutor) -> Result<()> {
    let locks = open_lock_provider(config, executor)?;
    let lock_key = &config.migration.lock_key;

    match locks.holder(lock_key)? {
        Some(token) => println!(
            "{} lock '{}' is held by token {}",
            "LOCKED".yellow().bold(),
            lock_key,
            token
        ),
        None => println!("{} lock '{}' is free", "FREE".green().bold(), lock_key),
    }
    Ok(())
}
