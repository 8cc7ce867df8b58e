use super::types::{ResultTable, ResultsType, SimulatedPaths};

/// Collapses the paths of one cell into the scalar stored in the table.
pub trait ResultReducer: Send + Sync {
    fn reduce(&self, paths: &SimulatedPaths) -> f64;

    /// Table-wide post-processing applied once after the sweep.
    fn finalize(&self, _table: &mut ResultTable) {}
}

/// Percentage of paths whose terminal capital is non-negative.
#[derive(Debug, Clone, Copy, Default)]
pub struct SurvivalRatio;

impl ResultReducer for SurvivalRatio {
    fn reduce(&self, paths: &SimulatedPaths) -> f64 {
        let total = paths.capital.paths();
        if total == 0 {
            return 0.0;
        }
        let survivors = paths
            .capital
            .terminal_row()
            .iter()
            .filter(|c| **c >= 0.0)
            .count();
        survivors as f64 / total as f64 * 100.0
    }
}

/// Mean terminal capital; the finished table is clipped at zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanTerminalValue;

impl ResultReducer for MeanTerminalValue {
    fn reduce(&self, paths: &SimulatedPaths) -> f64 {
        mean(&paths.capital.terminal_row())
    }

    fn finalize(&self, table: &mut ResultTable) {
        table.clip_lower(0.0);
    }
}

/// Mean terminal sampled return in percent. Control output only.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanTerminalReturn;

impl ResultReducer for MeanTerminalReturn {
    fn reduce(&self, paths: &SimulatedPaths) -> f64 {
        mean(&paths.returns.terminal_row()) * 100.0
    }
}

pub fn build_reducer(results_type: ResultsType) -> Box<dyn ResultReducer> {
    match results_type {
        ResultsType::Ratio => Box::new(SurvivalRatio),
        ResultsType::Value => Box::new(MeanTerminalValue),
        ResultsType::Returns => Box::new(MeanTerminalReturn),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
