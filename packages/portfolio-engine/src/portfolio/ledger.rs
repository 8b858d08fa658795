//! Position ledger: current holdings, portfolio value and weights.

use crate::types::{normalize_symbol, Position};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// In-memory ledger of held positions, keyed by uppercase symbol.
///
/// The ledger is the only stateful part of the engine. It lives for the
/// duration of a portfolio session and is never persisted by this crate;
/// snapshots can be (de)serialized by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "Vec<Position>", into = "Vec<Position>")]
pub struct PositionLedger {
    positions: BTreeMap<String, Position>,
}

impl TryFrom<Vec<Position>> for PositionLedger {
    type Error = crate::Error;

    fn try_from(positions: Vec<Position>) -> Result<Self> {
        Self::from_positions(positions)
    }
}

impl From<PositionLedger> for Vec<Position> {
    fn from(ledger: PositionLedger) -> Self {
        ledger.positions.into_values().collect()
    }
}

impl PositionLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ledger from a list of positions, validating each one.
    ///
    /// Later entries for the same symbol overwrite earlier ones.
    pub fn from_positions<I>(positions: I) -> Result<Self>
    where
        I: IntoIterator<Item = Position>,
    {
        let mut ledger = Self::new();
        for p in positions {
            ledger.add_or_update_position(&p.symbol, p.quantity, p.price)?;
        }
        Ok(ledger)
    }

    /// Add a position or overwrite an existing one.
    ///
    /// Returns the position that was replaced, if any. Fails with
    /// `InvalidPosition` when quantity or price is negative or not finite.
    pub fn add_or_update_position(
        &mut self,
        symbol: &str,
        quantity: f64,
        price: f64,
    ) -> Result<Option<Position>> {
        let position = Position::new(symbol, quantity, price)?;
        Ok(self.positions.insert(position.symbol.clone(), position))
    }

    /// Remove a position. Removing an absent symbol is a no-op.
    pub fn remove_position(&mut self, symbol: &str) -> Option<Position> {
        self.positions.remove(&normalize_symbol(symbol))
    }

    /// Find a position by symbol (case-insensitive).
    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(&normalize_symbol(symbol))
    }

    /// All positions, ordered by symbol.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Total market value; `0.0` for an empty ledger.
    pub fn total_value(&self) -> f64 {
        self.positions.values().map(Position::value).sum()
    }

    /// Weight of each position in total value.
    ///
    /// When the total value is zero every weight is `0.0`.
    pub fn weights(&self) -> BTreeMap<String, f64> {
        let total = self.total_value();
        self.positions
            .iter()
            .map(|(symbol, p)| {
                let w = if total > 0.0 { p.value() / total } else { 0.0 };
                (symbol.clone(), w)
            })
            .collect()
    }

    /// Weights ordered to the given symbols (e.g. return matrix columns).
    ///
    /// Symbols that are not held get weight `0.0`.
    pub fn aligned_weights(&self, symbols: &[String]) -> Vec<f64> {
        let weights = self.weights();
        symbols
            .iter()
            .map(|s| weights.get(&normalize_symbol(s)).copied().unwrap_or(0.0))
            .collect()
    }
}
