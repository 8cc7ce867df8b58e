use rand::{Rng, RngCore};
use rand_distr::{Distribution, Normal};

use super::error::SimulationError;
use super::types::{ReturnSeries, SimulationType};

/// Draws one per-period return for a simulated path.
pub trait PathSampler: Send + Sync {
    fn sample(&self, period: usize, rng: &mut dyn RngCore) -> f64;
}

/// Bootstrap with replacement from the historical series. Index 0 is never
/// drawn: the range is `[1, len - 1]`.
#[derive(Debug, Clone, Copy)]
pub struct HistoricalResamplingSampler<'a> {
    returns: &'a [f64],
}

impl<'a> HistoricalResamplingSampler<'a> {
    pub fn new(series: &'a ReturnSeries) -> Result<Self, SimulationError> {
        if series.len() < 2 {
            return Err(SimulationError::config(
                "returns",
                "historical resampling needs at least 2 entries",
            ));
        }
        Ok(Self {
            returns: series.values(),
        })
    }
}

impl PathSampler for HistoricalResamplingSampler<'_> {
    fn sample(&self, _period: usize, rng: &mut dyn RngCore) -> f64 {
        self.returns[rng.random_range(1..self.returns.len())]
    }
}

/// I.i.d. normal draws with the mean and sample standard deviation of the
/// historical series, fitted once up front.
#[derive(Debug, Clone)]
pub struct NormalDistributionSampler {
    mean: f64,
    std_dev: f64,
    distribution: Normal<f64>,
}

impl NormalDistributionSampler {
    pub fn fit(series: &ReturnSeries) -> Result<Self, SimulationError> {
        if series.len() < 2 {
            return Err(SimulationError::config(
                "returns",
                "normal fit needs at least 2 entries",
            ));
        }
        Self::with_parameters(series.mean(), series.std_dev())
    }

    pub fn with_parameters(mean: f64, std_dev: f64) -> Result<Self, SimulationError> {
        let distribution = Normal::new(mean, std_dev).map_err(|_| {
            SimulationError::config(
                "returns",
                format!("cannot fit normal distribution (mean={mean}, std_dev={std_dev})"),
            )
        })?;
        Ok(Self {
            mean,
            std_dev,
            distribution,
        })
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn std_dev(&self) -> f64 {
        self.std_dev
    }
}

impl PathSampler for NormalDistributionSampler {
    fn sample(&self, _period: usize, rng: &mut dyn RngCore) -> f64 {
        self.distribution.sample(rng)
    }
}

pub fn build_sampler<'a>(
    simulation_type: SimulationType,
    series: &'a ReturnSeries,
) -> Result<Box<dyn PathSampler + 'a>, SimulationError> {
    Ok(match simulation_type {
        SimulationType::Historical => Box::new(HistoricalResamplingSampler::new(series)?),
        SimulationType::Normal => Box::new(NormalDistributionSampler::fit(series)?),
    })
}
