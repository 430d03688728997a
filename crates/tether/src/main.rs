//! Tether CLI
//!
//! Runs code through a correlated call on a fresh engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use tether::tether_engine::{EngineHandle, EngineServices};
use tether::{Stage, TetherConfig, try_evaluate_sync};

/// Tether script bridge
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Evaluate scripts on a dedicated engine thread", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate a function body and print its result
    Eval {
        /// Code to evaluate
        #[arg(short, long, conflicts_with = "file", required_unless_present = "file")]
        code: Option<String>,

        /// Read the code from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Content script loaded before the call runs
        #[arg(long)]
        content: Option<PathBuf>,

        /// Call timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Print staged notifications to stderr
        #[arg(long)]
        stages: bool,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = TetherConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    tether::logging::init(&config.logging);

    match args.command {
        Command::Eval {
            code,
            file,
            content,
            timeout_ms,
            stages,
        } => {
            let code = match (code, file) {
                (Some(code), _) => code,
                (None, Some(path)) => {
                    std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?
                }
                (None, None) => bail!("Either --code or --file is required"),
            };

            let mut engine_config = config.engine.clone();
            if let Some(path) = content {
                let script = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                engine_config = engine_config.with_content_script(script);
            }

            let timeout = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.bridge.default_timeout());

            let engine = EngineHandle::spawn(engine_config, EngineServices::default())?;
            info!("Engine {} ready: {}", engine.name(), engine.is_ready());

            let observer = stages.then(|| {
                Arc::new(|stage: Stage| eprintln!("stage: {stage}")) as tether::StageObserver
            });
            let result = try_evaluate_sync(&engine, &code, timeout, observer);
            engine.shutdown()?;

            println!("{}", result?);
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
