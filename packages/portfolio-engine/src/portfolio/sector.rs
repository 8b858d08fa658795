//! Sector exposure aggregation.

use crate::types::normalize_symbol;
use std::collections::{BTreeMap, HashMap};

/// Sector assigned to symbols missing from the classification.
pub const UNKNOWN_SECTOR: &str = "Unknown";

/// Sum per-symbol weights by sector.
///
/// Symbols without a sector are grouped under [`UNKNOWN_SECTOR`] so that the
/// exposures always sum to the input weight total.
pub fn sector_exposure(
    weights_by_symbol: &BTreeMap<String, f64>,
    sector_by_symbol: &BTreeMap<String, String>,
) -> BTreeMap<String, f64> {
    let sectors: HashMap<String, &str> = sector_by_symbol
        .iter()
        .map(|(symbol, sector)| (normalize_symbol(symbol), sector.as_str()))
        .collect();

    let mut exposure = BTreeMap::new();
    for (symbol, weight) in weights_by_symbol {
        let sector = sectors
            .get(&normalize_symbol(symbol))
            .copied()
            .unwrap_or(UNKNOWN_SECTOR);
        *exposure.entry(sector.to_string()).or_insert(0.0) += weight;
    }
    exposure
}
