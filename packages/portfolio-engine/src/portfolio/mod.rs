//! Portfolio analytics module.
//!
//! Provides the position ledger, risk metrics, realized performance, sector
//! exposure and scenario stress testing.

mod ledger;
mod performance;
mod risk;
mod sector;
mod stress;

pub use ledger::PositionLedger;
pub use performance::{annualize_return, cumulative_returns, PerformanceSummary};
pub use risk::{
    conditional_value_at_risk, expected_return, max_drawdown, norm_ppf,
    parametric_value_at_risk, portfolio_metrics, portfolio_volatility, value_at_risk,
    MIN_VOLATILITY, RELATIVE_MIN_VOLATILITY,
};
pub use sector::{sector_exposure, UNKNOWN_SECTOR};
pub use stress::stress_test;
