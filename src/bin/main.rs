//! Heron CLI - compile expressions to native queries
//!
//! Usage:
//!   heron compile --expression <query.json> [--config heron.toml] [--dataset <name>]
//!   heron plan --expression <query.json> [--config heron.toml] [--dataset <name>]
//!   heron map-types --engine <engine> --columns <columns.json>
//!
//! Examples:
//!   heron compile --config heron.toml --dataset diamonds --expression query.json
//!   heron map-types --engine bigquery --columns cols.json

use clap::{Parser, Subcommand};
use heron::compile::{compile, plan_level};
use heron::config::{Settings, SettingsError};
use heron::external::{Engine, ExternalValue};
use heron::metadata::{map_types, ColumnInfo};
use heron::model::Expression;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "heron")]
#[command(about = "Heron - compiles one expression algebra to Druid JSON and dialect SQL")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Target {
    /// Path to the config file (defaults to $HERON_CONFIG or ./heron.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dataset to compile against (defaults to the only or `default` dataset)
    #[arg(short, long)]
    dataset: Option<String>,

    /// Path to a JSON-serialized expression
    #[arg(short, long)]
    expression: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile an expression to every native query it would issue
    Compile {
        #[command(flatten)]
        target: Target,
    },

    /// Show the nested query plan of an expression
    Plan {
        #[command(flatten)]
        target: Target,
    },

    /// Map native column types to attribute types
    MapTypes {
        /// Engine the columns come from
        #[arg(short, long)]
        engine: Engine,

        /// Path to a JSON array of {"name", "type"} objects
        #[arg(short, long)]
        columns: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile { target } => cmd_compile(target).await,
        Commands::Plan { target } => cmd_plan(target).await,
        Commands::MapTypes { engine, columns } => cmd_map_types(engine, columns).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("{}", message);
            eprintln!("Error: {}", message);
            ExitCode::FAILURE
        }
    }
}

async fn read_file(path: &Path) -> Result<String, String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("reading '{}': {}", path.display(), e))
}

/// Resolve the dataset binding and parse the expression.
async fn load_target(target: &Target) -> Result<(ExternalValue, Expression), String> {
    let settings = match &target.config {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    }
    .map_err(|e| e.to_string())?;

    let dataset = match &target.dataset {
        Some(name) => settings.get_dataset(name).map_err(|e| e.to_string())?,
        None => {
            let (name, dataset) = settings.default_dataset().ok_or_else(|| {
                SettingsError::DatasetNotFound("no --dataset given and no default".into())
                    .to_string()
            })?;
            debug!(dataset = name, "using default dataset");
            dataset
        }
    };
    let external = dataset.to_external().map_err(|e| e.to_string())?;

    let source = read_file(&target.expression).await?;
    let expression: Expression = serde_json::from_str(&source)
        .map_err(|e| format!("parsing '{}': {}", target.expression.display(), e))?;

    Ok((external, expression))
}

async fn cmd_compile(target: Target) -> Result<(), String> {
    let (external, expression) = load_target(&target).await?;
    let queries = compile(&external, &expression).map_err(|e| e.to_string())?;

    for (i, query) in queries.iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("{}", query);
    }
    Ok(())
}

async fn cmd_plan(target: Target) -> Result<(), String> {
    let (external, expression) = load_target(&target).await?;
    let plan = plan_level(&external, &expression).map_err(|e| e.to_string())?;
    let pretty = serde_json::to_string_pretty(&plan.describe()).map_err(|e| e.to_string())?;
    println!("{}", pretty);
    Ok(())
}

async fn cmd_map_types(engine: Engine, columns: PathBuf) -> Result<(), String> {
    let source = read_file(&columns).await?;
    let columns: Vec<ColumnInfo> = serde_json::from_str(&source)
        .map_err(|e| format!("parsing '{}': {}", columns.display(), e))?;

    let attributes = map_types(engine, &columns);
    let pretty = serde_json::to_string_pretty(&attributes).map_err(|e| e.to_string())?;
    println!("{}", pretty);
    Ok(())
}
