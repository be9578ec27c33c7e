mod run;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use insight_core::{Insight, LegacyFilters};
use insight_filters::filters_to_query;
use insight_flags::InsightConfig;
use run::{run_steps, Step};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "insight")]
#[command(about = "Derive insight queries from saved insights and mutations", long_about = None)]
struct Cli {
    /// Log at debug level regardless of RUST_LOG / INSIGHT_LOG_LEVEL
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay mutations against an insight and print the reactor's events
    Run {
        #[arg(long, env = "INSIGHT_CONFIG_PATH", default_value = "insight.toml")]
        config: PathBuf,
        /// Saved insight JSON; an empty insight when omitted
        #[arg(long)]
        insight: Option<PathBuf>,
        /// JSON array of steps
        #[arg(long)]
        mutations: PathBuf,
    },
    /// Convert legacy filters JSON into a structured query
    Convert {
        #[arg(long)]
        filters: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match cli.command {
        Commands::Run {
            config,
            insight,
            mutations,
        } => {
            let config = InsightConfig::load(&config)?;
            debug!(
                event = "config_loaded",
                flag = %config.alternate_backend_flag,
                persisted = config.persisted_flags.len()
            );
            let insight: Insight = match insight {
                Some(path) => read_json(&path)?,
                None => Insight::default(),
            };
            let steps: Vec<Step> = read_json(&mutations)?;

            let summary = run_steps(&config, insight, steps);
            for line in &summary.lines {
                println!("{}", serde_json::to_string(line)?);
            }
            println!("{}", serde_json::to_string_pretty(&summary.query)?);
            println!("alternate_backend: {}", summary.alternate_backend);
        }
        Commands::Convert { filters } => {
            let filters: LegacyFilters = read_json(&filters)?;
            let query = filters_to_query(&filters)?;
            println!("{}", serde_json::to_string_pretty(&query)?);
        }
    }

    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn init_logging(debug: bool) {
    let level = if debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("INSIGHT_LOG_LEVEL") {
        level
    } else {
        "warn".to_string()
    };
    let filter = if debug {
        EnvFilter::new(level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("log_init_error: subscriber already set");
    }
}
