//! Portfolio Engine CLI - risk reports and optimization from a JSON input file.
//!
//! The input file holds `{ "prices": [...], "positions": [...], "sectors": {...},
//! "scenarios": [...] }`. Every command prints an `ApiResponse` JSON envelope
//! on stdout; logs go to stderr and are filtered by `RUST_LOG`.

use clap::{Parser, Subcommand};
use portfolio_engine::{
    ApiResponse, EngineConfig, PortfolioEngine, PositionLedger, PriceSeries, ReturnMatrix,
    Scenario, WeightBounds,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "portfolio-engine")]
#[command(about = "Portfolio risk metrics, mean-variance optimization and stress testing")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to $PORTFOLIO_ENGINE_CONFIG or the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full risk report for the input positions
    Analyze {
        /// Input JSON file
        input: PathBuf,
    },
    /// Minimum-variance weights for the input price history
    Optimize {
        /// Input JSON file
        input: PathBuf,
        /// Annualized target return
        #[arg(short, long)]
        target: Option<f64>,
        /// Lower bound for every weight
        #[arg(long, default_value = "0.0")]
        lower: f64,
        /// Upper bound for every weight
        #[arg(long, default_value = "1.0")]
        upper: f64,
    },
    /// Efficient frontier for the input price history
    Frontier {
        /// Input JSON file
        input: PathBuf,
        /// Number of target returns (defaults to the configured count)
        #[arg(short, long)]
        points: Option<usize>,
    },
}

#[derive(Deserialize)]
struct Input {
    prices: Vec<PriceSeries>,
    #[serde(default)]
    positions: PositionLedger,
    #[serde(default)]
    sectors: BTreeMap<String, String>,
    #[serde(default)]
    scenarios: Vec<Scenario>,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}", render(&ApiResponse::<()>::err(e.to_string())));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> portfolio_engine::Result<String> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load_from_path(path)?,
        None => EngineConfig::load()?,
    };
    let engine = PortfolioEngine::new(config);

    match cli.command {
        Commands::Analyze { input } => {
            let input = read_input(&input)?;
            let returns = ReturnMatrix::from_prices(&input.prices)?;
            let report = engine.analyze(&input.positions, &returns, &input.sectors, &input.scenarios)?;
            Ok(render(&ApiResponse::ok(report)))
        }
        Commands::Optimize {
            input,
            target,
            lower,
            upper,
        } => {
            let input = read_input(&input)?;
            let returns = ReturnMatrix::from_prices(&input.prices)?;
            let bounds = WeightBounds::new(lower, upper)?;
            let portfolio = engine.minimize_variance(&returns, target, bounds)?;
            Ok(render(&ApiResponse::ok(portfolio)))
        }
        Commands::Frontier { input, points } => {
            let input = read_input(&input)?;
            let returns = ReturnMatrix::from_prices(&input.prices)?;
            let frontier = engine.efficient_frontier(&returns, points, WeightBounds::default())?;
            Ok(render(&ApiResponse::ok(FrontierOutput {
                symbols: returns.symbols().to_vec(),
                points: frontier,
            })))
        }
    }
}

#[derive(Serialize)]
struct FrontierOutput {
    symbols: Vec<String>,
    points: Vec<portfolio_engine::FrontierPoint>,
}

fn read_input(path: &Path) -> portfolio_engine::Result<Input> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn render<T: Serialize>(response: &ApiResponse<T>) -> String {
    serde_json::to_string_pretty(response).unwrap_or_else(|e| {
        serde_json::json!({ "ok": false, "error": e.to_string() }).to_string()
    })
}
