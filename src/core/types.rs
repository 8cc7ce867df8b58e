use serde::Serialize;

use super::error::SimulationError;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub enum SimulationType {
    #[serde(rename = "hist")]
    Historical,
    #[serde(rename = "norm")]
    Normal,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultsType {
    Ratio,
    Value,
    Returns,
}

/// The single asset class a run is fully invested in.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Allocation {
    Equity,
    Bonds,
}

/// Cleaned, chronological per-period fractional returns.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnSeries {
    values: Vec<f64>,
}

impl ReturnSeries {
    pub fn new(values: Vec<f64>) -> Result<Self, SimulationError> {
        if values.is_empty() {
            return Err(SimulationError::data("return series is empty"));
        }
        if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
            return Err(SimulationError::data(format!(
                "return series has a non-finite value at index {idx}"
            )));
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> f64 {
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Sample standard deviation (n - 1 denominator).
    pub fn std_dev(&self) -> f64 {
        let n = self.values.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq = self
            .values
            .iter()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>();
        (sum_sq / (n as f64 - 1.0)).sqrt()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub trading_days_in_year: u32,
    pub number_simulations: u32,
    pub max_number_years: u32,
    pub buckets: u32,
    pub bucket_size: f64,
    pub simulation_type: SimulationType,
    pub results_type: ResultsType,
    pub equity_share: f64,
    pub bond_share: f64,
    pub annual_expenditures: f64,
    pub inflation: f64,
    pub dividend_yield: f64,
    pub annual_pension: f64,
    pub pension_start_year: u32,
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            trading_days_in_year: 252,
            number_simulations: 1_000,
            max_number_years: 41,
            buckets: 11,
            bucket_size: 100_000.0,
            simulation_type: SimulationType::Normal,
            results_type: ResultsType::Ratio,
            equity_share: 1.0,
            bond_share: 0.0,
            annual_expenditures: 30_000.0,
            inflation: 0.03,
            dividend_yield: 0.02,
            annual_pension: 24_000.0,
            pension_start_year: 15,
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Checks every scalar parameter and resolves the active allocation.
    pub fn validate(&self) -> Result<Allocation, SimulationError> {
        if self.number_simulations < 1 {
            return Err(SimulationError::config("number_simulations", "must be >= 1"));
        }
        if self.max_number_years < 1 {
            return Err(SimulationError::config("max_number_years", "must be >= 1"));
        }
        if self.buckets < 2 {
            return Err(SimulationError::config("buckets", "must be >= 2"));
        }
        if !self.bucket_size.is_finite() || self.bucket_size <= 0.0 {
            return Err(SimulationError::config("bucket_size", "must be > 0"));
        }
        if self.trading_days_in_year < 1 {
            return Err(SimulationError::config(
                "trading_days_in_year",
                "must be >= 1",
            ));
        }
        for (field, value) in [
            ("annual_expenditures", self.annual_expenditures),
            ("inflation", self.inflation),
            ("dividend_yield", self.dividend_yield),
            ("annual_pension", self.annual_pension),
        ] {
            if !value.is_finite() {
                return Err(SimulationError::config(field, "must be finite"));
            }
        }
        if self.inflation <= -1.0 {
            return Err(SimulationError::config("inflation", "must be > -100%"));
        }
        self.allocation()
    }

    /// Only whole allocations are modelled: one share is 1 and the other 0.
    pub fn allocation(&self) -> Result<Allocation, SimulationError> {
        let equity = self.equity_share;
        let bonds = self.bond_share;
        if !equity.is_finite() || !bonds.is_finite() {
            return Err(SimulationError::config(
                "equity_share/bond_share",
                "must be finite",
            ));
        }
        match (equity == 0.0, bonds == 0.0) {
            (true, true) => Err(SimulationError::config(
                "equity_share/bond_share",
                "both are zero, no allocation defined",
            )),
            (false, false) => Err(SimulationError::config(
                "equity_share/bond_share",
                format!("mixed allocation ({equity}/{bonds}) is not supported"),
            )),
            (false, true) if equity == 1.0 => Ok(Allocation::Equity),
            (true, false) if bonds == 1.0 => Ok(Allocation::Bonds),
            _ => Err(SimulationError::config(
                "equity_share/bond_share",
                format!("active share must be 1, got {equity}/{bonds}"),
            )),
        }
    }
}

/// Dense `[paths x periods]` matrix, stored path-major so every path is one
/// contiguous slice that a worker can fill on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleMatrix {
    periods: usize,
    paths: usize,
    data: Vec<f64>,
}

impl SampleMatrix {
    pub fn filled(periods: usize, paths: usize, value: f64) -> Self {
        Self {
            periods,
            paths,
            data: vec![value; periods * paths],
        }
    }

    pub fn periods(&self) -> usize {
        self.periods
    }

    pub fn paths(&self) -> usize {
        self.paths
    }

    pub fn get(&self, period: usize, path: usize) -> f64 {
        self.data[path * self.periods + period]
    }

    pub fn set(&mut self, period: usize, path: usize, value: f64) {
        self.data[path * self.periods + period] = value;
    }

    pub fn path(&self, path: usize) -> &[f64] {
        let start = path * self.periods;
        &self.data[start..start + self.periods]
    }

    /// Raw path-major storage; chunks of `periods()` are individual paths.
    pub(crate) fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Values of every path at `period`.
    pub fn row(&self, period: usize) -> Vec<f64> {
        (0..self.paths).map(|path| self.get(period, path)).collect()
    }

    pub fn terminal_row(&self) -> Vec<f64> {
        self.row(self.periods.saturating_sub(1))
    }
}

/// Sampled returns and resulting capital for every path of one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedPaths {
    pub returns: SampleMatrix,
    pub capital: SampleMatrix,
}

/// Sweep output: rows are horizons `1..=max_number_years`, columns are
/// capital buckets `bucket_size, 2 * bucket_size, ...`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    rows: usize,
    columns: usize,
    bucket_size: f64,
    cells: Vec<f64>,
}

impl ResultTable {
    pub(crate) fn from_cells(
        rows: usize,
        columns: usize,
        bucket_size: f64,
        cells: Vec<f64>,
    ) -> Result<Self, SimulationError> {
        if cells.len() != rows * columns {
            return Err(SimulationError::config(
                "cells",
                format!(
                    "expected {} cells for {rows}x{columns}, got {}",
                    rows * columns,
                    cells.len()
                ),
            ));
        }
        Ok(Self {
            rows,
            columns,
            bucket_size,
            cells,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.columns)
    }

    pub fn get(&self, row: usize, column: usize) -> f64 {
        self.cells[row * self.columns + column]
    }

    pub fn row(&self, row: usize) -> &[f64] {
        let start = row * self.columns;
        &self.cells[start..start + self.columns]
    }

    pub fn cells(&self) -> &[f64] {
        &self.cells
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        (0..self.rows).map(|r| self.row(r).to_vec()).collect()
    }

    pub fn clip_lower(&mut self, bound: f64) {
        for cell in &mut self.cells {
            *cell = cell.max(bound);
        }
    }

    pub fn capital_for_column(&self, column: usize) -> f64 {
        (column as f64 + 1.0) * self.bucket_size
    }

    pub fn row_labels(&self) -> Vec<u32> {
        (0..self.rows as u32).collect()
    }

    pub fn column_labels(&self) -> Vec<String> {
        (0..self.columns)
            .map(|c| thousands_label(self.capital_for_column(c)))
            .collect()
    }
}

fn thousands_label(amount: f64) -> String {
    let thousands = amount / 1_000.0;
    if (thousands - thousands.round()).abs() < 1e-9 {
        format!("{}k", thousands.round() as i64)
    } else {
        format!("{thousands:.1}k")
    }
}
