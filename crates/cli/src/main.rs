//! Tickwork CLI - drives the demo behavior tree.

mod demo;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tickwork_core::TypeKey;
use tickwork_logic::{EngineConfig, RootBranch, TreeEngine, MIN_TICK_INTERVAL};
use tickwork_scope::Scope;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tickwork")]
#[command(about = "Tick-driven behavior tree host", long_about = None)]
struct Cli {
    /// Engine configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the demo tree
    Run {
        /// Number of ticks to run (runs until Ctrl-C when omitted)
        #[arg(long)]
        ticks: Option<u64>,
        /// Milliseconds between ticks
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval_ms: Option<u64>,
    },
    /// Show the registered components
    Inspect,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };

    let scope = demo::manifest().build()?;

    match cli.command {
        Commands::Run { ticks, interval_ms } => {
            let mut config = config;
            if ticks.is_some() {
                config = config.with_max_ticks(ticks);
            }
            if let Some(ms) = interval_ms {
                config = config.with_tick_interval(Duration::from_millis(ms));
            }

            let mut engine = TreeEngine::new(scope)?.with_config(config);

            let shutdown = CancellationToken::new();
            let on_signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_signal.cancel();
                }
            });

            let ran = engine.run(shutdown).await;
            info!("Completed {} ticks", ran);
        }
        Commands::Inspect => inspect(&scope)?,
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<EngineConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: EngineConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    if config.tick_interval < MIN_TICK_INTERVAL {
        bail!("Invalid config {}: tick_interval_ms must be at least 1", path.display());
    }
    Ok(config)
}

fn inspect(scope: &Scope) -> Result<()> {
    let root = scope.singleton_type_of(TypeKey::of::<dyn RootBranch>())?;

    println!("Tickwork Scope");
    println!("  Root: {}", root);

    println!("Singletons ({})", scope.singleton_types().len());
    for key in scope.singleton_types() {
        print_entry(scope, key);
    }

    println!("Prototypes ({})", scope.prototype_types().len());
    for key in scope.prototype_types() {
        print_entry(scope, key);
    }

    let factories = scope.factories();
    if !factories.is_empty() {
        println!("Factories ({})", factories.len());
        for key in factories {
            println!("  {}", key);
        }
    }

    Ok(())
}

fn print_entry(scope: &Scope, key: TypeKey) {
    let name = scope.display_name(key).unwrap_or_else(|| key.to_string());
    match scope.factory_of(key) {
        Some(factory) => println!("  {} (via {})", name, factory),
        None => println!("  {}", name),
    }
}
