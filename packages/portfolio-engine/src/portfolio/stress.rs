//! Scenario stress testing.

use super::risk::expected_return;
use crate::returns::ReturnMatrix;
use crate::types::Scenario;
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Annualized expected portfolio return under each scenario.
///
/// Each shocked symbol's return column is scaled by `(1 + shock)` before the
/// expected return is recomputed with the unchanged weights. Symbols that are
/// not in the return matrix are ignored. Scenario names must be unique and a
/// scenario may shock each symbol once.
pub fn stress_test(
    returns: &ReturnMatrix,
    weights: &[f64],
    scenarios: &[Scenario],
    periods_per_year: f64,
) -> Result<BTreeMap<String, f64>> {
    returns.check_weights(weights)?;

    let mut results = BTreeMap::new();
    for scenario in scenarios {
        if results.contains_key(&scenario.name) {
            return Err(Error::InvalidParameter(format!(
                "duplicate scenario name {:?}",
                scenario.name
            )));
        }

        let mut shocked = returns.clone();
        let mut shocked_columns = vec![false; returns.n_assets()];
        for (symbol, shock) in &scenario.shocks {
            if !shock.is_finite() {
                return Err(Error::InvalidParameter(format!(
                    "scenario {:?}: shock for {symbol} is not finite",
                    scenario.name
                )));
            }
            match returns.index_of(symbol) {
                Some(index) if shocked_columns[index] => {
                    return Err(Error::InvalidParameter(format!(
                        "scenario {:?} shocks {symbol} more than once",
                        scenario.name
                    )));
                }
                Some(index) => {
                    shocked_columns[index] = true;
                    shocked.scale_column(index, 1.0 + shock);
                }
                None => tracing::debug!(
                    scenario = %scenario.name,
                    %symbol,
                    "ignoring shock for symbol outside the return matrix"
                ),
            }
        }

        let value = expected_return(weights, &shocked, periods_per_year)?;
        results.insert(scenario.name.clone(), value);
    }

    Ok(results)
}
