//! Price series, period returns and the aligned return matrix.
//!
//! A [`ReturnMatrix`] is always rectangular: multi-symbol price tables are
//! inner-joined on their common timestamps before differencing, so no cell is
//! ever missing.

use crate::types::normalize_symbol;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// A single close observation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
}

/// Validated, time-ordered close prices for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawPriceSeries", into = "RawPriceSeries")]
pub struct PriceSeries {
    symbol: String,
    observations: Vec<Observation>,
}

#[derive(Serialize, Deserialize)]
struct RawPriceSeries {
    symbol: String,
    observations: Vec<Observation>,
}

impl TryFrom<RawPriceSeries> for PriceSeries {
    type Error = Error;

    fn try_from(raw: RawPriceSeries) -> Result<Self> {
        PriceSeries::new(&raw.symbol, raw.observations)
    }
}

impl From<PriceSeries> for RawPriceSeries {
    fn from(series: PriceSeries) -> Self {
        Self {
            symbol: series.symbol,
            observations: series.observations,
        }
    }
}

impl PriceSeries {
    /// Create a price series.
    ///
    /// Timestamps must be strictly ascending and closes finite and positive.
    pub fn new(symbol: &str, observations: Vec<Observation>) -> Result<Self> {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return Err(Error::InvalidPriceSeries(
                "symbol must not be empty".to_string(),
            ));
        }

        for obs in &observations {
            if !obs.close.is_finite() || obs.close <= 0.0 {
                return Err(Error::InvalidPriceSeries(format!(
                    "{symbol}: close at {} must be finite and positive, got {}",
                    obs.timestamp, obs.close
                )));
            }
        }

        for pair in observations.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(Error::InvalidPriceSeries(format!(
                    "{symbol}: timestamps must be strictly ascending ({} follows {})",
                    pair[1].timestamp, pair[0].timestamp
                )));
            }
        }

        Ok(Self {
            symbol,
            observations,
        })
    }

    /// Build a daily series starting at `start` from a slice of closes.
    pub fn daily(symbol: &str, start: DateTime<Utc>, closes: &[f64]) -> Result<Self> {
        let observations = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Observation {
                timestamp: start + Duration::days(i as i64),
                close,
            })
            .collect();
        Self::new(symbol, observations)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Close prices in time order.
    pub fn closes(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.close).collect()
    }

    /// Simple returns of this series.
    pub fn returns(&self) -> Result<Vec<f64>> {
        compute_returns(&self.closes())
    }
}

/// Compute simple period returns `(p[t] - p[t-1]) / p[t-1]`.
///
/// Fails with [`Error::InsufficientData`] for fewer than two prices and with
/// [`Error::InvalidPriceSeries`] when a price is not finite and positive.
pub fn compute_returns(prices: &[f64]) -> Result<Vec<f64>> {
    if prices.len() < 2 {
        return Err(Error::InsufficientData(format!(
            "need at least 2 prices to compute returns, got {}",
            prices.len()
        )));
    }

    if let Some(bad) = prices.iter().find(|p| !p.is_finite() || **p <= 0.0) {
        return Err(Error::InvalidPriceSeries(format!(
            "prices must be finite and positive, got {bad}"
        )));
    }

    Ok(prices.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect())
}

/// Period returns indexed by time (rows) and symbol (columns).
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnMatrix {
    symbols: Vec<String>,
    timestamps: Option<Vec<DateTime<Utc>>>,
    data: DMatrix<f64>,
}

impl ReturnMatrix {
    /// Build a return matrix from row-major return observations.
    pub fn new(symbols: Vec<String>, rows: &[Vec<f64>]) -> Result<Self> {
        let symbols = validate_symbols(symbols)?;
        if rows.is_empty() {
            return Err(Error::InsufficientData(
                "return matrix needs at least one row".to_string(),
            ));
        }

        let n = symbols.len();
        for (t, row) in rows.iter().enumerate() {
            if row.len() != n {
                return Err(Error::DimensionMismatch {
                    expected: n,
                    actual: row.len(),
                });
            }
            if let Some(bad) = row.iter().find(|r| !r.is_finite()) {
                return Err(Error::InvalidParameter(format!(
                    "return at row {t} is not finite: {bad}"
                )));
            }
        }

        let data = DMatrix::from_fn(rows.len(), n, |t, j| rows[t][j]);
        Ok(Self {
            symbols,
            timestamps: None,
            data,
        })
    }

    /// Build a return matrix from per-symbol price series.
    ///
    /// Series are inner-joined on the timestamps common to all symbols; the
    /// resulting matrix has one fewer row than the joined price table.
    pub fn from_prices(series: &[PriceSeries]) -> Result<Self> {
        if series.is_empty() {
            return Err(Error::InsufficientData(
                "no price series supplied".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for s in series {
            if !seen.insert(s.symbol()) {
                return Err(Error::InvalidPriceSeries(format!(
                    "duplicate symbol {}",
                    s.symbol()
                )));
            }
            if s.len() < 2 {
                return Err(Error::InsufficientData(format!(
                    "{} has {} observation(s), need at least 2",
                    s.symbol(),
                    s.len()
                )));
            }
        }

        let mut common: BTreeSet<DateTime<Utc>> =
            series[0].observations().iter().map(|o| o.timestamp).collect();
        for s in &series[1..] {
            let stamps: HashSet<DateTime<Utc>> =
                s.observations().iter().map(|o| o.timestamp).collect();
            common.retain(|t| stamps.contains(t));
        }

        if common.len() < 2 {
            return Err(Error::InsufficientData(format!(
                "only {} common timestamp(s) across {} symbols, need at least 2",
                common.len(),
                series.len()
            )));
        }

        let timestamps: Vec<DateTime<Utc>> = common.into_iter().collect();
        let mut columns = Vec::with_capacity(series.len());
        for s in series {
            let by_time: HashMap<DateTime<Utc>, f64> = s
                .observations()
                .iter()
                .map(|o| (o.timestamp, o.close))
                .collect();
            let closes: Vec<f64> = timestamps
                .iter()
                .filter_map(|t| by_time.get(t).copied())
                .collect();
            columns.push(compute_returns(&closes)?);
        }

        let rows = timestamps.len() - 1;
        let longest = series.iter().map(PriceSeries::len).max().unwrap_or(0);
        if longest > timestamps.len() {
            tracing::debug!(
                kept = timestamps.len(),
                dropped = longest - timestamps.len(),
                "aligned price table on common timestamps"
            );
        }

        let data = DMatrix::from_fn(rows, series.len(), |t, j| columns[j][t]);
        Ok(Self {
            symbols: series.iter().map(|s| s.symbol().to_string()).collect(),
            timestamps: Some(timestamps[1..].to_vec()),
            data,
        })
    }

    /// Column symbols in order.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Timestamp of each row, when built from prices.
    pub fn timestamps(&self) -> Option<&[DateTime<Utc>]> {
        self.timestamps.as_deref()
    }

    pub fn n_assets(&self) -> usize {
        self.data.ncols()
    }

    pub fn n_periods(&self) -> usize {
        self.data.nrows()
    }

    /// Underlying `periods x assets` matrix.
    pub fn data(&self) -> &DMatrix<f64> {
        &self.data
    }

    /// Column index of a symbol.
    pub fn index_of(&self, symbol: &str) -> Option<usize> {
        let symbol = normalize_symbol(symbol);
        self.symbols.iter().position(|s| *s == symbol)
    }

    /// Returns of one asset, or `None` past the last column.
    pub fn column(&self, index: usize) -> Option<Vec<f64>> {
        if index >= self.n_assets() {
            return None;
        }
        Some(self.data.column(index).iter().copied().collect())
    }

    /// Per-asset mean period return.
    pub fn mean_returns(&self) -> DVector<f64> {
        let t = self.n_periods() as f64;
        DVector::from_iterator(
            self.n_assets(),
            self.data.column_iter().map(|col| col.sum() / t),
        )
    }

    /// Sample covariance matrix (ddof = 1) of period returns.
    pub fn covariance(&self) -> Result<DMatrix<f64>> {
        let t = self.n_periods();
        if t < 2 {
            return Err(Error::InsufficientData(format!(
                "covariance needs at least 2 return rows, got {t}"
            )));
        }

        let means = self.mean_returns();
        let mut centered = self.data.clone();
        for j in 0..centered.ncols() {
            for i in 0..t {
                centered[(i, j)] -= means[j];
            }
        }

        Ok(centered.transpose() * &centered / (t - 1) as f64)
    }

    /// Pearson correlation matrix; zero-variance assets correlate 0 with others.
    pub fn correlation(&self) -> Result<DMatrix<f64>> {
        let cov = self.covariance()?;
        let n = cov.nrows();
        let sd: Vec<f64> = (0..n).map(|i| cov[(i, i)].max(0.0).sqrt()).collect();

        Ok(DMatrix::from_fn(n, n, |i, j| {
            if i == j {
                1.0
            } else {
                let denom = sd[i] * sd[j];
                if denom > 1e-15 {
                    (cov[(i, j)] / denom).clamp(-1.0, 1.0)
                } else {
                    0.0
                }
            }
        }))
    }

    /// Portfolio return series `R · w`.
    pub fn portfolio_returns(&self, weights: &[f64]) -> Result<Vec<f64>> {
        self.check_weights(weights)?;
        let w = DVector::from_column_slice(weights);
        Ok((&self.data * w).iter().copied().collect())
    }

    /// Reorder (or subset) columns to the given symbols.
    pub fn select(&self, symbols: &[String]) -> Result<Self> {
        let indices = symbols
            .iter()
            .map(|s| {
                self.index_of(s)
                    .ok_or_else(|| Error::InvalidParameter(format!("unknown symbol {s}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let selected = validate_symbols(indices.iter().map(|&j| self.symbols[j].clone()).collect())?;

        Ok(Self {
            symbols: selected,
            timestamps: self.timestamps.clone(),
            data: self.data.select_columns(&indices),
        })
    }

    /// Multiply one asset's returns by `factor`.
    pub(crate) fn scale_column(&mut self, index: usize, factor: f64) {
        self.data.column_mut(index).scale_mut(factor);
    }

    pub(crate) fn check_weights(&self, weights: &[f64]) -> Result<()> {
        if weights.len() != self.n_assets() {
            return Err(Error::DimensionMismatch {
                expected: self.n_assets(),
                actual: weights.len(),
            });
        }
        if let Some(bad) = weights.iter().find(|w| !w.is_finite()) {
            return Err(Error::InvalidParameter(format!(
                "weights must be finite, got {bad}"
            )));
        }
        Ok(())
    }
}

fn validate_symbols(symbols: Vec<String>) -> Result<Vec<String>> {
    if symbols.is_empty() {
        return Err(Error::InsufficientData(
            "return matrix needs at least one symbol".to_string(),
        ));
    }

    let symbols: Vec<String> = symbols.iter().map(|s| normalize_symbol(s)).collect();
    let mut seen = HashSet::new();
    for s in &symbols {
        if s.is_empty() {
            return Err(Error::InvalidParameter("empty symbol".to_string()));
        }
        if !seen.insert(s.as_str()) {
            return Err(Error::InvalidParameter(format!("duplicate symbol {s}")));
        }
    }
    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_compute_returns() {
        let returns = compute_returns(&[100.0, 110.0, 99.0]).unwrap();
        assert_eq!(returns.len(), 2);
        assert_abs_diff_eq!(returns[0], 0.10, epsilon = 1e-12);
        assert_abs_diff_eq!(returns[1], -0.10, epsilon = 1e-12);
    }

    #[test]
    fn test_compute_returns_insufficient_data() {
        assert!(matches!(
            compute_returns(&[100.0]),
            Err(Error::InsufficientData(_))
        ));
        assert!(matches!(compute_returns(&[]), Err(Error::InsufficientData(_))));
    }

    #[test]
    fn test_compute_returns_rejects_zero_price() {
        assert!(matches!(
            compute_returns(&[100.0, 0.0, 50.0]),
            Err(Error::InvalidPriceSeries(_))
        ));
    }

    #[test]
    fn test_price_series_validation() {
        let t0 = start();
        let unordered = vec![
            Observation {
                timestamp: t0 + Duration::days(1),
                close: 10.0,
            },
            Observation {
                timestamp: t0,
                close: 11.0,
            },
        ];
        assert!(matches!(
            PriceSeries::new("AAPL", unordered),
            Err(Error::InvalidPriceSeries(_))
        ));

        let duplicate = vec![
            Observation {
                timestamp: t0,
                close: 10.0,
            },
            Observation {
                timestamp: t0,
                close: 11.0,
            },
        ];
        assert!(PriceSeries::new("AAPL", duplicate).is_err());
        assert!(PriceSeries::daily("AAPL", t0, &[10.0, -1.0]).is_err());
    }

    #[test]
    fn test_price_series_deserialize_validates() {
        let json = r#"{"symbol":"aapl","observations":[
            {"timestamp":"2024-01-02T00:00:00Z","close":10.0},
            {"timestamp":"2024-01-03T00:00:00Z","close":11.0}]}"#;
        let series: PriceSeries = serde_json::from_str(json).unwrap();
        assert_eq!(series.symbol(), "AAPL");
        assert_eq!(series.closes(), vec![10.0, 11.0]);

        let bad = r#"{"symbol":"aapl","observations":[
            {"timestamp":"2024-01-02T00:00:00Z","close":0.0}]}"#;
        assert!(serde_json::from_str::<PriceSeries>(bad).is_err());
    }

    #[test]
    fn test_from_prices_inner_joins_timestamps() {
        let t0 = start();
        let a = PriceSeries::daily("A", t0, &[100.0, 101.0, 102.0, 103.0]).unwrap();
        // B is missing day 1 and has an extra day 4
        let b = PriceSeries::new(
            "B",
            vec![
                Observation {
                    timestamp: t0,
                    close: 50.0,
                },
                Observation {
                    timestamp: t0 + Duration::days(2),
                    close: 55.0,
                },
                Observation {
                    timestamp: t0 + Duration::days(3),
                    close: 44.0,
                },
                Observation {
                    timestamp: t0 + Duration::days(4),
                    close: 45.0,
                },
            ],
        )
        .unwrap();

        let matrix = ReturnMatrix::from_prices(&[a, b]).unwrap();

        // Common days: 0, 2, 3 -> two return rows
        assert_eq!(matrix.n_periods(), 2);
        assert_eq!(matrix.n_assets(), 2);
        assert_eq!(matrix.symbols(), &["A".to_string(), "B".to_string()]);
        assert_abs_diff_eq!(matrix.data()[(0, 0)], 0.02, epsilon = 1e-12);
        assert_abs_diff_eq!(matrix.data()[(0, 1)], 0.10, epsilon = 1e-12);
        assert_abs_diff_eq!(matrix.data()[(1, 1)], -0.20, epsilon = 1e-12);

        let stamps = matrix.timestamps().unwrap();
        assert_eq!(stamps.len(), 2);
        assert_eq!(stamps[0], t0 + Duration::days(2));
    }

    #[test]
    fn test_from_prices_errors() {
        let t0 = start();
        let short = PriceSeries::daily("A", t0, &[100.0]).unwrap();
        let ok = PriceSeries::daily("B", t0, &[100.0, 101.0]).unwrap();
        assert!(matches!(
            ReturnMatrix::from_prices(&[short, ok.clone()]),
            Err(Error::InsufficientData(_))
        ));

        assert!(matches!(
            ReturnMatrix::from_prices(&[ok.clone(), ok.clone()]),
            Err(Error::InvalidPriceSeries(_))
        ));

        let disjoint = PriceSeries::daily("C", t0 + Duration::days(10), &[1.0, 2.0]).unwrap();
        assert!(matches!(
            ReturnMatrix::from_prices(&[ok, disjoint]),
            Err(Error::InsufficientData(_))
        ));
    }

    #[test]
    fn test_new_validates_shape() {
        let result = ReturnMatrix::new(
            vec!["A".into(), "B".into()],
            &[vec![0.01, 0.02], vec![0.01]],
        );
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));

        let result = ReturnMatrix::new(vec!["A".into()], &[]);
        assert!(matches!(result, Err(Error::InsufficientData(_))));

        let result = ReturnMatrix::new(vec!["A".into(), "a".into()], &[vec![0.0, 0.0]]);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_covariance_sample() {
        let matrix = ReturnMatrix::new(
            vec!["A".into(), "B".into()],
            &[vec![0.01, 0.02], vec![0.03, 0.00], vec![0.02, 0.01]],
        )
        .unwrap();

        let cov = matrix.covariance().unwrap();
        // A: mean 0.02, deviations -0.01, 0.01, 0 -> var = 0.0002 / 2
        assert_abs_diff_eq!(cov[(0, 0)], 0.0001, epsilon = 1e-15);
        assert_abs_diff_eq!(cov[(1, 1)], 0.0001, epsilon = 1e-15);
        assert_abs_diff_eq!(cov[(0, 1)], -0.0001, epsilon = 1e-15);
        assert_abs_diff_eq!(cov[(1, 0)], cov[(0, 1)], epsilon = 1e-18);

        let corr = matrix.correlation().unwrap();
        assert_abs_diff_eq!(corr[(0, 1)], -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_covariance_needs_two_rows() {
        let matrix = ReturnMatrix::new(vec!["A".into()], &[vec![0.01]]).unwrap();
        assert!(matches!(
            matrix.covariance(),
            Err(Error::InsufficientData(_))
        ));
    }

    #[test]
    fn test_portfolio_returns_and_select() {
        let matrix = ReturnMatrix::new(
            vec!["A".into(), "B".into()],
            &[vec![0.01, 0.03], vec![-0.02, 0.04]],
        )
        .unwrap();

        let port = matrix.portfolio_returns(&[0.5, 0.5]).unwrap();
        assert_abs_diff_eq!(port[0], 0.02, epsilon = 1e-15);
        assert_abs_diff_eq!(port[1], 0.01, epsilon = 1e-15);

        assert!(matches!(
            matrix.portfolio_returns(&[1.0]),
            Err(Error::DimensionMismatch { .. })
        ));

        let swapped = matrix.select(&["b".to_string(), "A".to_string()]).unwrap();
        assert_eq!(swapped.symbols(), &["B".to_string(), "A".to_string()]);
        assert_eq!(swapped.column(0), matrix.column(1));
        assert!(swapped.column(0).is_some());
        assert_eq!(matrix.column(matrix.n_assets()), None);
        assert!(matrix.select(&["Z".to_string()]).is_err());
    }
}
