use super::types::{Allocation, SimulationConfig};

/// Per-period capital recurrence: inflated withdrawal, delayed pension
/// inflow, then compounding at the sampled return.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CashflowEngine {
    annual_expenditures: f64,
    inflation: f64,
    annual_pension: f64,
    pension_start_year: u32,
    yield_add_on: f64,
}

impl CashflowEngine {
    pub fn new(config: &SimulationConfig, allocation: Allocation) -> Self {
        let yield_add_on = match allocation {
            Allocation::Equity => config.dividend_yield,
            Allocation::Bonds => 0.0,
        };
        Self {
            annual_expenditures: config.annual_expenditures,
            inflation: config.inflation,
            annual_pension: config.annual_pension,
            pension_start_year: config.pension_start_year,
            yield_add_on,
        }
    }

    pub fn withdrawal(&self, period: u32) -> f64 {
        self.annual_expenditures * (1.0 + self.inflation).powi(period as i32)
    }

    pub fn pension(&self, period: u32) -> f64 {
        if period >= self.pension_start_year {
            self.annual_pension
        } else {
            0.0
        }
    }

    /// `C[j]` from `C[j-1]`. Capital may go negative and keeps compounding.
    pub fn step(&self, previous_capital: f64, period: u32, sampled_return: f64) -> f64 {
        let base = previous_capital - self.withdrawal(period) + self.pension(period);
        base * (1.0 + sampled_return + self.yield_add_on)
    }
}
