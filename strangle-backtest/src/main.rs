//! Intraday short strangle backtester CLI.
//!
//! # Usage
//!
//! ```bash
//! # Run a backtest with the reference configuration
//! strangle-backtest run --config config/default.toml
//!
//! # Override the data file from the config
//! strangle-backtest run --config config/default.toml --data data/nifty_2023.parquet
//! ```

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::info;

use strangle_backtest::backtest::{BacktestConfig, BacktestEngine};
use strangle_backtest::data::{calendar, DataLoader};
use strangle_backtest::metrics::MetricsCalculator;

const SEPARATOR: &str = "============================================================";

#[derive(Parser)]
#[command(name = "strangle-backtest")]
#[command(about = "Minute-level short strangle backtesting engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single backtest with given configuration
    Run {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Path to a CSV or Parquet file of minute bars (overrides [data].path)
        #[arg(short, long)]
        data: Option<PathBuf>,
    },
}

/// Full run configuration as read from TOML.
#[derive(Debug, Deserialize)]
struct RunConfig {
    data: DataConfig,
    strategy: BacktestConfig,
    report: ReportConfig,
}

#[derive(Debug, Deserialize)]
struct DataConfig {
    path: PathBuf,
    week_one_only: bool,
}

#[derive(Debug, Deserialize)]
struct ReportConfig {
    base_nav: f64,
}

impl RunConfig {
    fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config
            .strategy
            .validate()
            .context("Invalid [strategy] section")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("strangle_backtest=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, data } => cmd_run(&config, data)?,
    }

    Ok(())
}

fn cmd_run(config_path: &Path, data_override: Option<PathBuf>) -> Result<()> {
    let started = Instant::now();

    let mut config = RunConfig::load(config_path)?;
    if let Some(path) = data_override {
        config.data.path = path;
    }
    info!("Loaded config from {}", config_path.display());

    let stage = Instant::now();
    let loader = DataLoader::new(&config.data.path);
    let bars = loader
        .load_bars()
        .with_context(|| format!("Failed to load bars from {}", loader.path().display()))?;
    let bars = calendar::filter_universe(bars, config.data.week_one_only);
    info!("Data ready: {} bars in {:.2?}", bars.len(), stage.elapsed());

    let stage = Instant::now();
    let engine = BacktestEngine::new(config.strategy);
    let result = engine.run(&bars).context("Backtest failed")?;
    info!("Simulation finished in {:.2?}", stage.elapsed());

    let stage = Instant::now();
    let table = result
        .ledger
        .to_dataframe()
        .context("Failed to build trade table")?;
    let metrics = MetricsCalculator::calculate(&result.ledger, config.report.base_nav);
    info!("Report built in {:.2?}", stage.elapsed());

    println!("{}", SEPARATOR);
    println!("{}", result.summary());
    println!("{}", SEPARATOR);
    println!("{}", table);
    println!("{}", SEPARATOR);
    println!("{}", metrics.summary());

    info!("Total elapsed: {:.2?}", started.elapsed());
    Ok(())
}
