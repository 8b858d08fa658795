//! Core data types for the portfolio engine.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Normalize a ticker symbol (trimmed, uppercase).
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// A held position: quantity of an asset marked at a price.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    /// Stock ticker symbol (uppercase)
    pub symbol: String,
    /// Number of units held
    pub quantity: f64,
    /// Current price per unit
    pub price: f64,
}

impl Position {
    /// Create a validated position.
    ///
    /// Fails with [`Error::InvalidPosition`] when the symbol is empty or when
    /// quantity or price is negative or not finite.
    pub fn new(symbol: &str, quantity: f64, price: f64) -> Result<Self> {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return Err(Error::InvalidPosition {
                symbol,
                reason: "symbol must not be empty".to_string(),
            });
        }
        if !quantity.is_finite() || quantity < 0.0 {
            return Err(Error::InvalidPosition {
                symbol,
                reason: format!("quantity must be finite and non-negative, got {quantity}"),
            });
        }
        if !price.is_finite() || price < 0.0 {
            return Err(Error::InvalidPosition {
                symbol,
                reason: format!("price must be finite and non-negative, got {price}"),
            });
        }

        Ok(Self {
            symbol,
            quantity,
            price,
        })
    }

    /// Market value of this position.
    pub fn value(&self) -> f64 {
        self.quantity * self.price
    }
}

/// Annualized risk/return summary of a weighted portfolio.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PortfolioMetrics {
    /// Annualized expected return
    pub expected_return: f64,
    /// Annualized volatility (standard deviation of returns)
    pub volatility: f64,
    /// `(expected_return - risk_free_rate) / volatility`, zero when volatility is zero
    pub sharpe_ratio: f64,
}

/// A named set of per-symbol return shocks.
///
/// Deserialized shock keys are normalized; two keys naming the same symbol
/// are rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawScenario")]
pub struct Scenario {
    /// Unique, human-readable identifier
    pub name: String,
    /// Fractional shock per symbol (e.g. -0.2 for a 20% drawdown)
    pub shocks: std::collections::BTreeMap<String, f64>,
}

impl Scenario {
    /// Create an empty scenario.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shocks: Default::default(),
        }
    }

    /// Add a shock for a symbol.
    pub fn with_shock(mut self, symbol: &str, shock: f64) -> Self {
        self.shocks.insert(normalize_symbol(symbol), shock);
        self
    }
}

#[derive(Deserialize)]
struct RawScenario {
    name: String,
    shocks: std::collections::BTreeMap<String, f64>,
}

impl TryFrom<RawScenario> for Scenario {
    type Error = Error;

    fn try_from(raw: RawScenario) -> Result<Self> {
        let mut shocks = std::collections::BTreeMap::new();
        for (symbol, shock) in raw.shocks {
            let symbol = normalize_symbol(&symbol);
            if shocks.insert(symbol.clone(), shock).is_some() {
                return Err(Error::InvalidParameter(format!(
                    "scenario {:?} shocks {symbol} more than once",
                    raw.name
                )));
            }
        }
        Ok(Self {
            name: raw.name,
            shocks,
        })
    }
}

/// API response wrapper used by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response.
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }
}
