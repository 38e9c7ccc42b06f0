//! CLI for drift detection and schema migration against a model file.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use schemasync::{
    DatabaseConfig, EngineConfig, Error, LockWait, ModelRegistry, RiskLevel, SyncEngine,
    create_database_connection,
};

/// Entry point for the schemasync CLI
#[derive(Parser)]
#[command(name = "schemasync")]
#[command(about = "Detect schema drift against declared models and apply risk-gated migrations", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the model definition file (YAML or JSON)
    #[arg(short, long, value_name = "FILE")]
    model_file: PathBuf,

    /// Path to the database configuration file (TOML)
    #[arg(short, long, value_name = "CONFIG")]
    database_config: PathBuf,

    /// Optional engine configuration file (TOML)
    #[arg(short, long, value_name = "CONFIG")]
    engine_config: Option<PathBuf>,

    /// Wait up to this many seconds for the schema lock instead of failing
    /// fast when another instance is migrating
    #[arg(long, value_name = "SECONDS")]
    wait: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the migration plan for the current drift without executing it
    Plan,
    /// Apply the migration plan for the current drift
    Apply {
        /// Apply destructive operations without confirmation
        #[arg(long)]
        force_destructive: bool,
        /// Assume yes on the interactive confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Show applied migration history
    History {
        /// Maximum number of records to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Show pending drift and the last applied migration
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    schemasync::init_logging();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            // Refused destructive changes get their own exit code so CI can
            // tell "needs an operator" from "broke"
            if let Some(Error::RiskRefused { .. }) = e.downcast_ref::<Error>() {
                eprintln!("refused: {e}");
                return ExitCode::from(2);
            }
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let registry = load_models(&cli.model_file)?;
    let db_config = load_toml::<DatabaseConfig>(&cli.database_config)?;
    let mut engine_config = match &cli.engine_config {
        Some(path) => load_toml::<EngineConfig>(path)?,
        None => EngineConfig::default(),
    };
    if let Some(seconds) = cli.wait {
        engine_config.lock_wait = LockWait::BoundedSeconds(seconds);
    }

    let conn = create_database_connection(&db_config)
        .await
        .with_context(|| format!("connecting to {}", db_config.identity()))?;
    let engine = SyncEngine::new(Arc::from(conn), registry, engine_config);

    match cli.command {
        Commands::Plan => {
            let plan = engine.plan(true).await?;
            if plan.is_empty() {
                println!("schema is in sync; nothing to do");
                return Ok(ExitCode::SUCCESS);
            }
            println!(
                "plan {} ({} operation(s), risk: {})",
                plan.short_version(),
                plan.operations.len(),
                plan.risk
            );
            for op in &plan.operations {
                println!("  [{}] {}", op.risk, op.operation.describe());
            }
            println!("\n{}", plan.sql_script());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Apply {
            force_destructive,
            yes,
        } => {
            let plan = engine.plan(false).await?;
            if plan.is_empty() {
                println!("schema is in sync; nothing to do");
                return Ok(ExitCode::SUCCESS);
            }

            let mut force = force_destructive;
            if plan.risk == RiskLevel::Destructive && !force {
                if yes {
                    force = true;
                } else if std::io::stdin().is_terminal() {
                    force = confirm_destructive(&plan)?;
                    if !force {
                        eprintln!("refused: destructive plan not confirmed");
                        return Ok(ExitCode::from(2));
                    }
                }
                // Non-interactive and unconfirmed: let the engine refuse
            }

            let result = engine.apply(&plan, force).await?;
            println!(
                "applied plan {} ({} operation(s))",
                plan.short_version(),
                result.applied_operations
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::History { limit } => {
            let records = engine.history().list(limit).await?;
            if records.is_empty() {
                println!("no migrations recorded");
                return Ok(ExitCode::SUCCESS);
            }
            for record in records {
                println!(
                    "{}  {}  [{}] [{}]  {}",
                    record.applied_at.format("%Y-%m-%d %H:%M:%S"),
                    &record.version[..12.min(record.version.len())],
                    record.risk_level,
                    record.status.as_str(),
                    record.description
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status => {
            let status = engine.status().await?;
            match &status.last_applied {
                Some(record) => println!(
                    "last applied: {} at {} [{}]",
                    &record.version[..12.min(record.version.len())],
                    record.applied_at.format("%Y-%m-%d %H:%M:%S"),
                    record.status.as_str()
                ),
                None => println!("last applied: none"),
            }
            if status.pending_changes.is_empty() {
                println!("pending changes: none");
            } else {
                println!("pending changes:");
                for change in &status.pending_changes {
                    println!("  [{}] {}", change.risk, change.description);
                }
                let blocking = status.blocking_tables();
                if !blocking.is_empty() {
                    println!("tables blocked on destructive drift: {}", blocking.join(", "));
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_models(path: &PathBuf) -> anyhow::Result<ModelRegistry> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading model file {}", path.display()))?;
    Ok(ModelRegistry::from_str(&content)?)
}

fn load_toml<T: serde::de::DeserializeOwned>(path: &PathBuf) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

fn confirm_destructive(plan: &schemasync::MigrationPlan) -> anyhow::Result<bool> {
    eprintln!(
        "plan {} contains destructive operations:",
        plan.short_version()
    );
    for op in plan.destructive_operations() {
        eprintln!("  {}", op.operation.describe());
    }
    eprint!("type 'yes' to apply anyway: ");
    std::io::stderr().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(answer.trim() == "yes")
}
