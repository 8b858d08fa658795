//! Portfolio Engine - risk metrics and mean-variance optimization.
//!
//! This crate turns held positions and historical prices into:
//!
//! - **Position ledger**: holdings, portfolio value and weights
//! - **Return matrix**: aligned simple returns across symbols
//! - **Risk metrics**: expected return, volatility, Sharpe ratio, VaR, CVaR
//! - **Optimization**: minimum-variance allocations and the efficient frontier
//! - **Sector exposure** and **stress testing**
//!
//! Every computation is a pure function of its inputs; the only state is the
//! caller-owned [`PositionLedger`].
//!
//! # Example
//!
//! ```rust,no_run
//! use portfolio_engine::{EngineConfig, PortfolioEngine, PositionLedger, ReturnMatrix};
//!
//! let mut ledger = PositionLedger::new();
//! ledger.add_or_update_position("AAPL", 100.0, 150.0).unwrap();
//! ledger.add_or_update_position("MSFT", 50.0, 300.0).unwrap();
//!
//! let returns = ReturnMatrix::new(
//!     vec!["AAPL".into(), "MSFT".into()],
//!     &[vec![0.01, -0.02], vec![0.015, 0.01], vec![-0.005, 0.02]],
//! )
//! .unwrap();
//!
//! let engine = PortfolioEngine::new(EngineConfig::default());
//! let weights = ledger.aligned_weights(returns.symbols());
//! let metrics = engine.portfolio_metrics(&weights, &returns).unwrap();
//! println!("Sharpe: {:.2}", metrics.sharpe_ratio);
//! ```

pub mod config;
pub mod engine;
pub mod optimizer;
pub mod portfolio;
pub mod returns;
pub mod types;

use std::time::Duration;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::{PortfolioEngine, PortfolioReport};
pub use optimizer::{
    efficient_frontier, minimize_variance, minimize_variance_with, AugmentedLagrangianSqp,
    ConstrainedMinimizer, FrontierPoint, LinearConstraints, Objective, OptimizedPortfolio,
    PortfolioVariance, Solution, SolverOptions, SolverStatus, WeightBounds,
};
pub use portfolio::{
    conditional_value_at_risk, expected_return, max_drawdown, parametric_value_at_risk,
    portfolio_metrics, portfolio_volatility, sector_exposure, stress_test, value_at_risk,
    PerformanceSummary, PositionLedger, UNKNOWN_SECTOR,
};
pub use returns::{compute_returns, Observation, PriceSeries, ReturnMatrix};
pub use types::{ApiResponse, PortfolioMetrics, Position, Scenario};

/// Error types for portfolio-engine operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid position {symbol}: {reason}")]
    InvalidPosition { symbol: String, reason: String },

    #[error("Invalid price series: {0}")]
    InvalidPriceSeries(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Optimization diverged ({status}): constraint violation {violation:.3e}")]
    OptimizationDiverged {
        status: SolverStatus,
        weights: Vec<f64>,
        violation: f64,
    },

    #[error("Optimization timed out after {iterations} iteration(s) in {elapsed:?}")]
    OptimizationTimeout { iterations: usize, elapsed: Duration },
}

/// Result type for portfolio-engine operations.
pub type Result<T> = std::result::Result<T, Error>;
