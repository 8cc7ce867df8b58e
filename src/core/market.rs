use serde::{Deserialize, Serialize};

use super::error::SimulationError;
use super::types::ReturnSeries;

/// Where the series came from. Descriptive only, nothing is fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DataSource {
    pub equity_index: String,
    pub bond_index: String,
    pub start_date: String,
    pub provider: String,
}

impl Default for DataSource {
    fn default() -> Self {
        Self {
            equity_index: "^GSPC".to_string(),
            bond_index: "TLT".to_string(),
            start_date: "1923-01-01".to_string(),
            provider: "yfinance".to_string(),
        }
    }
}

/// Market data document: per asset either annual returns or daily closes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MarketData {
    pub equity_returns: Option<Vec<f64>>,
    pub bond_returns: Option<Vec<f64>>,
    pub equity_closes: Option<Vec<f64>>,
    pub bond_closes: Option<Vec<f64>>,
    #[serde(flatten)]
    pub source: DataSource,
}

impl MarketData {
    pub fn from_json(json: &str) -> Result<Self, SimulationError> {
        serde_json::from_str(json)
            .map_err(|e| SimulationError::data(format!("malformed market data document: {e}")))
    }

    /// Resolves `(equity, bonds)`; explicit returns win over closes.
    pub fn into_series(
        self,
        trading_days_in_year: u32,
    ) -> Result<(ReturnSeries, ReturnSeries), SimulationError> {
        let equity = resolve_series(
            "equity",
            self.equity_returns,
            self.equity_closes,
            trading_days_in_year,
        )?;
        let bonds = resolve_series(
            "bond",
            self.bond_returns,
            self.bond_closes,
            trading_days_in_year,
        )?;
        Ok((equity, bonds))
    }
}

fn resolve_series(
    asset: &str,
    returns: Option<Vec<f64>>,
    closes: Option<Vec<f64>>,
    trading_days_in_year: u32,
) -> Result<ReturnSeries, SimulationError> {
    match (returns, closes) {
        (Some(returns), _) => ReturnSeries::new(returns)
            .map_err(|e| SimulationError::data(format!("{asset} returns: {e}"))),
        (None, Some(closes)) => annual_returns_from_closes(&closes, trading_days_in_year)
            .map_err(|e| match e {
                SimulationError::Data(msg) => SimulationError::data(format!("{asset} closes: {msg}")),
                other => other,
            }),
        (None, None) => Err(SimulationError::data(format!(
            "no {asset} returns or closes provided"
        ))),
    }
}

/// Keeps every `trading_days_in_year`-th close from the first one and turns
/// consecutive samples into fractional returns.
pub fn annual_returns_from_closes(
    closes: &[f64],
    trading_days_in_year: u32,
) -> Result<ReturnSeries, SimulationError> {
    if trading_days_in_year < 1 {
        return Err(SimulationError::config(
            "trading_days_in_year",
            "must be >= 1",
        ));
    }
    if closes.is_empty() {
        return Err(SimulationError::data("price series is empty"));
    }
    if let Some(idx) = closes.iter().position(|c| !c.is_finite() || *c <= 0.0) {
        return Err(SimulationError::data(format!(
            "price at index {idx} must be finite and > 0"
        )));
    }

    let sampled: Vec<f64> = closes
        .iter()
        .step_by(trading_days_in_year as usize)
        .copied()
        .collect();
    if sampled.len() < 2 {
        return Err(SimulationError::data(format!(
            "{} closes cover less than one {trading_days_in_year}-day period",
            closes.len()
        )));
    }

    let returns = sampled.windows(2).map(|w| w[1] / w[0] - 1.0).collect();
    ReturnSeries::new(returns)
}
