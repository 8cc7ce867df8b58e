use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};
#[cfg(feature = "parallel")]
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
#[cfg(feature = "parallel")]
use rayon::slice::ParallelSliceMut;
use tracing::{debug, info};

use super::cashflow::CashflowEngine;
use super::error::SimulationError;
use super::reducer::{ResultReducer, build_reducer};
use super::sampler::{PathSampler, build_sampler};
use super::types::{
    Allocation, ResultTable, ReturnSeries, SampleMatrix, SimulatedPaths, SimulationConfig,
};

#[derive(Debug, Clone)]
pub struct SweepResult {
    pub table: ResultTable,
    pub seed: u64,
    pub allocation: Allocation,
}

/// Runs every path of one (horizon, capital) cell.
pub struct SimulationRunner<'a> {
    sampler: &'a dyn PathSampler,
    cashflow: &'a CashflowEngine,
    number_simulations: usize,
}

impl<'a> SimulationRunner<'a> {
    pub fn new(
        sampler: &'a dyn PathSampler,
        cashflow: &'a CashflowEngine,
        number_simulations: usize,
    ) -> Self {
        Self {
            sampler,
            cashflow,
            number_simulations,
        }
    }

    /// Applies the recurrence in place. Index 0 of both slices holds the seed
    /// values (return placeholder, initial capital) and is left untouched, so
    /// a one-period path draws nothing.
    pub fn simulate_path(&self, returns: &mut [f64], capital: &mut [f64], rng: &mut dyn RngCore) {
        for j in 1..capital.len() {
            let sampled = self.sampler.sample(j, rng);
            returns[j] = sampled;
            capital[j] = self.cashflow.step(capital[j - 1], j as u32, sampled);
        }
    }

    /// Every path gets its own generator derived from `cell_seed` and writes
    /// straight into its own slice of the output matrices, so the result does
    /// not depend on how paths are scheduled.
    pub fn run(&self, horizon_years: usize, initial_capital: f64, cell_seed: u64) -> SimulatedPaths {
        let periods = horizon_years.max(1);
        let mut returns = SampleMatrix::filled(periods, self.number_simulations, 1.0);
        let mut capital = SampleMatrix::filled(periods, self.number_simulations, initial_capital);

        let fill = |(path, (path_returns, path_capital)): (usize, (&mut [f64], &mut [f64]))| {
            let mut rng = SmallRng::seed_from_u64(derive_path_seed(cell_seed, path));
            self.simulate_path(path_returns, path_capital, &mut rng);
        };

        #[cfg(feature = "parallel")]
        returns
            .as_mut_slice()
            .par_chunks_exact_mut(periods)
            .zip(capital.as_mut_slice().par_chunks_exact_mut(periods))
            .enumerate()
            .for_each(fill);

        #[cfg(not(feature = "parallel"))]
        returns
            .as_mut_slice()
            .chunks_exact_mut(periods)
            .zip(capital.as_mut_slice().chunks_exact_mut(periods))
            .enumerate()
            .for_each(fill);

        SimulatedPaths { returns, capital }
    }
}

/// Iterates the horizon x capital-bucket grid. Cells are independent units of
/// work written to disjoint positions of the table.
pub struct SweepEngine<'a> {
    config: &'a SimulationConfig,
    runner: SimulationRunner<'a>,
    reducer: &'a dyn ResultReducer,
}

impl<'a> SweepEngine<'a> {
    pub fn new(
        config: &'a SimulationConfig,
        sampler: &'a dyn PathSampler,
        cashflow: &'a CashflowEngine,
        reducer: &'a dyn ResultReducer,
    ) -> Self {
        Self {
            config,
            runner: SimulationRunner::new(sampler, cashflow, config.number_simulations as usize),
            reducer,
        }
    }

    pub fn rows(&self) -> usize {
        self.config.max_number_years as usize
    }

    pub fn columns(&self) -> usize {
        self.config.buckets.saturating_sub(1) as usize
    }

    /// Value of table cell `[horizon - 1][bucket - 1]`.
    pub fn cell(&self, horizon: u32, bucket: u32, base_seed: u64) -> f64 {
        let capital = bucket as f64 * self.config.bucket_size;
        let cell_seed = derive_seed(base_seed, horizon, bucket);
        let paths = self.runner.run(horizon as usize, capital, cell_seed);
        let value = self.reducer.reduce(&paths);
        debug!(horizon, bucket, capital, value, "cell computed");
        value
    }

    pub fn run(&self, base_seed: u64) -> Result<ResultTable, SimulationError> {
        let rows = self.rows();
        let columns = self.columns();
        let compute = |index: usize| {
            let horizon = (index / columns) as u32 + 1;
            let bucket = (index % columns) as u32 + 1;
            self.cell(horizon, bucket, base_seed)
        };

        #[cfg(feature = "parallel")]
        let cells: Vec<f64> = (0..rows * columns).into_par_iter().map(compute).collect();

        #[cfg(not(feature = "parallel"))]
        let cells: Vec<f64> = (0..rows * columns).map(compute).collect();

        let mut table = ResultTable::from_cells(rows, columns, self.config.bucket_size, cells)?;
        self.reducer.finalize(&mut table);
        Ok(table)
    }
}

/// Validates inputs, picks the sampler and reducer from the config selectors,
/// and runs the full sweep. Nothing is simulated when validation fails.
pub fn run_sweep(
    equity: &ReturnSeries,
    bonds: &ReturnSeries,
    config: &SimulationConfig,
) -> Result<SweepResult, SimulationError> {
    let allocation = config.validate()?;
    for (field, series) in [("equity returns", equity), ("bond returns", bonds)] {
        if series.len() < 2 {
            return Err(SimulationError::config(
                field,
                format!("need at least 2 entries, got {}", series.len()),
            ));
        }
    }

    let active = match allocation {
        Allocation::Equity => equity,
        Allocation::Bonds => bonds,
    };
    let sampler = build_sampler(config.simulation_type, active)?;
    let reducer = build_reducer(config.results_type);
    let cashflow = CashflowEngine::new(config, allocation);
    let seed = config.seed.unwrap_or_else(|| rand::rng().random());

    info!(
        seed,
        ?allocation,
        simulation_type = ?config.simulation_type,
        results_type = ?config.results_type,
        rows = config.max_number_years,
        columns = config.buckets - 1,
        simulations = config.number_simulations,
        "starting sweep"
    );

    let engine = SweepEngine::new(config, sampler.as_ref(), &cashflow, reducer.as_ref());
    let table = engine.run(seed)?;

    info!(cells = table.cells().len(), "sweep finished");
    Ok(SweepResult {
        table,
        seed,
        allocation,
    })
}

fn derive_seed(base_seed: u64, horizon: u32, bucket: u32) -> u64 {
    let mixed = base_seed ^ ((horizon as u64) << 32) ^ bucket as u64;
    splitmix64(mixed)
}

fn derive_path_seed(cell_seed: u64, path: usize) -> u64 {
    splitmix64(cell_seed ^ path as u64)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ResultsType, SimulationType};
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    struct FixedReturn(f64);

    impl PathSampler for FixedReturn {
        fn sample(&self, _period: usize, _rng: &mut dyn RngCore) -> f64 {
            self.0
        }
    }

    fn equity_history() -> ReturnSeries {
        ReturnSeries::new(vec![
            0.0, 0.12, -0.08, 0.21, 0.05, -0.15, 0.09, 0.18, -0.03, 0.11, 0.26, -0.22,
        ])
        .expect("valid series")
    }

    fn bond_history() -> ReturnSeries {
        ReturnSeries::new(vec![0.0, 0.04, 0.02, -0.01, 0.06, 0.03, 0.01, 0.05])
            .expect("valid series")
    }

    fn small_config() -> SimulationConfig {
        SimulationConfig {
            number_simulations: 40,
            max_number_years: 8,
            buckets: 4,
            bucket_size: 100_000.0,
            seed: Some(17),
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn horizon_one_draws_nothing() {
        let config = small_config();
        let cashflow = CashflowEngine::new(&config, Allocation::Equity);
        let sampler = FixedReturn(0.5);
        let runner = SimulationRunner::new(&sampler, &cashflow, 3);
        let paths = runner.run(1, 250_000.0, 1);

        assert_eq!(paths.capital.periods(), 1);
        assert_eq!(paths.capital.terminal_row(), vec![250_000.0; 3]);
        assert_eq!(paths.returns.terminal_row(), vec![1.0; 3]);
    }

    #[test]
    fn fixed_return_path_matches_hand_calculation() {
        let config = SimulationConfig {
            annual_expenditures: 10.0,
            inflation: 0.0,
            annual_pension: 5.0,
            pension_start_year: 3,
            dividend_yield: 0.0,
            ..small_config()
        };
        let cashflow = CashflowEngine::new(&config, Allocation::Equity);
        let sampler = FixedReturn(0.0);
        let runner = SimulationRunner::new(&sampler, &cashflow, 2);
        let paths = runner.run(5, 100.0, 9);

        // 100 -> 90 -> 80 -> 75 -> 70
        for period in 0..5 {
            let expected = [100.0, 90.0, 80.0, 75.0, 70.0][period];
            for path in 0..2 {
                assert_approx(paths.capital.get(period, path), expected);
            }
        }
        assert_eq!(paths.returns.row(0), vec![1.0, 1.0]);
        assert_eq!(paths.returns.terminal_row(), vec![0.0, 0.0]);
    }

    #[test]
    fn runner_output_is_independent_of_path_scheduling() {
        let config = small_config();
        let history = equity_history();
        let sampler = build_sampler(SimulationType::Historical, &history).expect("sampler");
        let cashflow = CashflowEngine::new(&config, Allocation::Equity);
        let runner = SimulationRunner::new(sampler.as_ref(), &cashflow, 25);
        let paths = runner.run(6, 300_000.0, 1234);

        for path in [0_usize, 7, 24] {
            let mut rng = SmallRng::seed_from_u64(derive_path_seed(1234, path));
            let mut returns = vec![1.0; 6];
            let mut capital = vec![300_000.0; 6];
            runner.simulate_path(&mut returns, &mut capital, &mut rng);
            assert_eq!(paths.capital.path(path), capital.as_slice());
            assert_eq!(paths.returns.path(path), returns.as_slice());
        }
    }

    #[test]
    fn sweep_table_cell_matches_single_cell_evaluation() {
        let config = small_config();
        let history = equity_history();
        let sampler = build_sampler(SimulationType::Normal, &history).expect("sampler");
        let reducer = build_reducer(ResultsType::Ratio);
        let cashflow = CashflowEngine::new(&config, Allocation::Equity);
        let engine = SweepEngine::new(&config, sampler.as_ref(), &cashflow, reducer.as_ref());
        let table = engine.run(55).expect("table");

        assert_eq!(table.get(4, 1), engine.cell(5, 2, 55));
        assert_eq!(table.get(0, 2), engine.cell(1, 3, 55));
    }

    #[test]
    fn horizon_one_row_reports_full_survival_and_seed_capital() {
        let history = equity_history();
        let bonds = bond_history();

        let ratio = run_sweep(&history, &bonds, &small_config()).expect("sweep");
        assert!(ratio.table.row(0).iter().all(|v| *v == 100.0));

        let config = SimulationConfig {
            results_type: ResultsType::Value,
            ..small_config()
        };
        let value = run_sweep(&history, &bonds, &config).expect("sweep");
        assert_eq!(value.table.row(0), &[100_000.0, 200_000.0, 300_000.0]);

        let config = SimulationConfig {
            results_type: ResultsType::Returns,
            ..small_config()
        };
        let returns = run_sweep(&history, &bonds, &config).expect("sweep");
        assert!(returns.table.row(0).iter().all(|v| *v == 100.0));
    }

    #[test]
    fn heavy_spending_depletes_small_buckets() {
        let config = SimulationConfig {
            annual_expenditures: 60_000.0,
            annual_pension: 0.0,
            max_number_years: 12,
            buckets: 3,
            simulation_type: SimulationType::Historical,
            ..small_config()
        };
        let result = run_sweep(&equity_history(), &bond_history(), &config).expect("sweep");
        assert_eq!(result.table.get(11, 0), 0.0);
    }

    #[test]
    fn bond_allocation_resamples_bond_history() {
        let config = SimulationConfig {
            equity_share: 0.0,
            bond_share: 1.0,
            simulation_type: SimulationType::Historical,
            results_type: ResultsType::Returns,
            max_number_years: 5,
            ..small_config()
        };
        let bonds = bond_history();
        let result = run_sweep(&equity_history(), &bonds, &config).expect("sweep");
        assert_eq!(result.allocation, Allocation::Bonds);

        let lo = bonds.values()[1..].iter().copied().fold(f64::INFINITY, f64::min) * 100.0;
        let hi = bonds.values()[1..].iter().copied().fold(f64::NEG_INFINITY, f64::max) * 100.0;
        for row in 1..5 {
            for value in result.table.row(row) {
                assert!(
                    (lo - 1e-9..=hi + 1e-9).contains(value),
                    "mean bond return {value} outside [{lo}, {hi}]"
                );
            }
        }
    }

    #[test]
    fn value_mode_clips_negative_means_to_zero() {
        let config = SimulationConfig {
            results_type: ResultsType::Value,
            annual_expenditures: 500_000.0,
            annual_pension: 0.0,
            max_number_years: 4,
            ..small_config()
        };
        let result = run_sweep(&equity_history(), &bond_history(), &config).expect("sweep");
        assert_eq!(result.table.row(3), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn run_sweep_rejects_invalid_inputs_before_simulating() {
        let short = ReturnSeries::new(vec![0.1]).expect("valid series");
        let err = run_sweep(&short, &bond_history(), &small_config()).expect_err("short series");
        assert!(matches!(err, SimulationError::Configuration { .. }));

        let err = run_sweep(&equity_history(), &short, &small_config()).expect_err("short bonds");
        assert!(err.to_string().contains("bond returns"));

        let config = SimulationConfig {
            equity_share: 0.0,
            bond_share: 0.0,
            ..small_config()
        };
        assert!(run_sweep(&equity_history(), &bond_history(), &config).is_err());

        let config = SimulationConfig {
            number_simulations: 0,
            ..small_config()
        };
        assert!(run_sweep(&equity_history(), &bond_history(), &config).is_err());
    }

    #[test]
    fn unseeded_sweep_reports_replayable_seed() {
        let config = SimulationConfig {
            seed: None,
            ..small_config()
        };
        let first = run_sweep(&equity_history(), &bond_history(), &config).expect("sweep");
        let replay = SimulationConfig {
            seed: Some(first.seed),
            ..config
        };
        let second = run_sweep(&equity_history(), &bond_history(), &replay).expect("sweep");
        assert_eq!(first.table, second.table);
    }

    #[test]
    fn derive_seed_changes_per_cell_and_path() {
        let a = derive_seed(42, 10, 1);
        let b = derive_seed(42, 11, 1);
        let c = derive_seed(42, 10, 2);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(derive_path_seed(a, 0), derive_path_seed(a, 1));
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(16))]

        #[test]
        fn prop_table_shape_and_ratio_bounds(
            sims in 1_u32..12,
            years in 1_u32..7,
            buckets in 2_u32..5,
            seed in 0_u64..1_000,
            historical in proptest::bool::ANY,
        ) {
            let config = SimulationConfig {
                number_simulations: sims,
                max_number_years: years,
                buckets,
                seed: Some(seed),
                simulation_type: if historical { SimulationType::Historical } else { SimulationType::Normal },
                ..small_config()
            };
            let result = run_sweep(&equity_history(), &bond_history(), &config).expect("sweep");
            prop_assert_eq!(result.table.shape(), (years as usize, buckets as usize - 1));
            for value in result.table.cells() {
                prop_assert!((0.0..=100.0).contains(value));
            }
        }

        #[test]
        fn prop_value_mode_is_never_negative(
            spend in 0.0_f64..400_000.0,
            seed in 0_u64..1_000,
        ) {
            let config = SimulationConfig {
                results_type: ResultsType::Value,
                annual_expenditures: spend,
                number_simulations: 8,
                max_number_years: 6,
                seed: Some(seed),
                ..small_config()
            };
            let result = run_sweep(&equity_history(), &bond_history(), &config).expect("sweep");
            for value in result.table.cells() {
                prop_assert!(*value >= 0.0);
            }
        }

        #[test]
        fn prop_seeded_sweeps_are_bit_identical(seed in 0_u64..u64::MAX) {
            let config = SimulationConfig {
                seed: Some(seed),
                number_simulations: 6,
                max_number_years: 5,
                ..small_config()
            };
            let a = run_sweep(&equity_history(), &bond_history(), &config).expect("sweep");
            let b = run_sweep(&equity_history(), &bond_history(), &config).expect("sweep");
            prop_assert_eq!(a.seed, seed);
            prop_assert_eq!(a.table.cells(), b.table.cells());
        }
    }
}
