mod cashflow;
mod engine;
mod error;
mod market;
mod reducer;
mod sampler;
mod types;

pub use cashflow::CashflowEngine;
pub use engine::{SimulationRunner, SweepEngine, SweepResult, run_sweep};
pub use error::SimulationError;
pub use market::{DataSource, MarketData, annual_returns_from_closes};
pub use reducer::{
    MeanTerminalReturn, MeanTerminalValue, ResultReducer, SurvivalRatio, build_reducer,
};
pub use sampler::{
    HistoricalResamplingSampler, NormalDistributionSampler, PathSampler, build_sampler,
};
pub use types::{
    Allocation, ResultTable, ResultsType, ReturnSeries, SampleMatrix, SimulatedPaths,
    SimulationConfig, SimulationType,
};
