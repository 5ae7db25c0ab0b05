//! Risk statistics over a backtest's day-value history
//!
//! Recomputed from the full history at each day boundary rather than updated
//! incrementally, so a drifted intermediate can never poison the summary.
//! With fewer than two day samples the return series is undefined and the
//! computation is skipped, not zero-filled.

use serde::{Deserialize, Serialize};

use crate::indicator::fraction_change;
use crate::types::round3;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Summary statistics comparing the strategy's day-level return series to a
/// benchmark's, aligned by date index. Values are rounded to three decimals
/// for display.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct RiskMetrics {
    /// Annualized excess return over the beta-scaled benchmark.
    pub alpha: f64,
    /// Regression slope of strategy returns on benchmark returns.
    pub beta: f64,
    /// Annualized mean return over volatility.
    pub sharpe: f64,
    /// Annualized standard deviation of day returns.
    pub volatility: f64,
    /// Largest peak-to-trough decline of the cumulative return curve, as a
    /// negative fraction.
    pub max_drawdown: f64,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

//Population variance, matching how the volatility of a complete return
//history is conventionally quoted
fn variance(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64
}

/// Largest peak-to-trough decline of the compounded return curve, negative
/// or zero.
pub fn max_drawdown(returns: &[f64]) -> f64 {
    let mut cumulative = 1.0;
    let mut peak = 1.0;
    let mut maxdd = 0.0;
    for r in returns {
        cumulative *= 1.0 + r;
        if cumulative > peak {
            peak = cumulative;
        }
        let dd = cumulative / peak - 1.0;
        if dd < maxdd {
            maxdd = dd;
        }
    }
    maxdd
}

impl RiskMetrics {
    /// Compute the five statistics from aligned return series. `None` when
    /// the series are too short or of unequal length: regression on such
    /// input is undefined, not zero.
    pub fn compute(strategy_returns: &[f64], benchmark_returns: &[f64]) -> Option<Self> {
        if strategy_returns.is_empty() || strategy_returns.len() != benchmark_returns.len() {
            return None;
        }
        let mean_s = mean(strategy_returns);
        let mean_b = mean(benchmark_returns);
        let var_b = variance(benchmark_returns);
        let cov = strategy_returns
            .iter()
            .zip(benchmark_returns.iter())
            .map(|(s, b)| (s - mean_s) * (b - mean_b))
            .sum::<f64>()
            / strategy_returns.len() as f64;

        let beta = if var_b == 0.0 { 0.0 } else { cov / var_b };
        let alpha_daily = mean_s - beta * mean_b;
        let alpha = (1.0 + alpha_daily).powf(TRADING_DAYS_PER_YEAR) - 1.0;

        let std_s = variance(strategy_returns).sqrt();
        let sharpe = if std_s == 0.0 {
            0.0
        } else {
            mean_s / std_s * TRADING_DAYS_PER_YEAR.sqrt()
        };
        let volatility = std_s * TRADING_DAYS_PER_YEAR.sqrt();

        Some(Self {
            alpha: round3(alpha),
            beta: round3(beta),
            sharpe: round3(sharpe),
            volatility: round3(volatility),
            max_drawdown: round3(max_drawdown(strategy_returns)),
        })
    }

    /// Compute from raw day-value histories. The benchmark close series is
    /// trimmed from the front to the strategy's date range when the provider
    /// returned more history than needed.
    pub fn from_day_values(day_values: &[f64], benchmark_closes: &[f64]) -> Option<Self> {
        if day_values.len() < 2 || benchmark_closes.len() < 2 {
            return None;
        }
        let strategy_returns = fraction_change(day_values);
        let mut benchmark_returns = fraction_change(benchmark_closes);
        if benchmark_returns.len() > strategy_returns.len() {
            benchmark_returns.drain(..benchmark_returns.len() - strategy_returns.len());
        }
        Self::compute(&strategy_returns, &benchmark_returns)
    }
}

#[cfg(test)]
mod tests {
    use super::{max_drawdown, RiskMetrics};
    use crate::indicator::fraction_change;

    fn setup() -> Vec<f64> {
        vec![100.0, 105.0, 120.0, 80.0, 90.0]
    }

    #[test]
    fn test_that_mdd_calculates_correctly() {
        let returns = fraction_change(&setup());
        let mdd = max_drawdown(&returns);
        //Peak 120, trough 80
        assert!((mdd - (80.0 / 120.0 - 1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_that_mdd_is_zero_for_monotonic_rise() {
        let returns = fraction_change(&[100.0, 101.0, 102.0, 105.0]);
        assert_eq!(max_drawdown(&returns), 0.0);
    }

    #[test]
    fn test_that_beta_of_a_scaled_benchmark_is_the_scale() {
        let benchmark = vec![0.01, -0.02, 0.03, 0.01, -0.01];
        let strategy: Vec<f64> = benchmark.iter().map(|r| 2.0 * r).collect();
        let metrics = RiskMetrics::compute(&strategy, &benchmark).unwrap();
        assert_eq!(metrics.beta, 2.0);
        //Perfectly explained by the benchmark, no excess return
        assert_eq!(metrics.alpha, 0.0);
    }

    #[test]
    fn test_that_sharpe_and_volatility_annualize_by_sqrt_252() {
        let strategy = vec![0.01, 0.03];
        let benchmark = vec![0.0, 0.0];
        let metrics = RiskMetrics::compute(&strategy, &benchmark).unwrap();
        //mean 0.02, population std 0.01
        assert_eq!(metrics.sharpe, (2.0 * 252.0_f64.sqrt() * 1_000.0).round() / 1_000.0);
        assert_eq!(
            metrics.volatility,
            (0.01 * 252.0_f64.sqrt() * 1_000.0).round() / 1_000.0
        );
    }

    #[test]
    fn test_that_metrics_are_skipped_below_two_samples() {
        assert!(RiskMetrics::from_day_values(&[100.0], &[100.0, 101.0]).is_none());
        assert!(RiskMetrics::compute(&[], &[]).is_none());
    }

    #[test]
    fn test_that_longer_benchmark_history_is_trimmed_from_the_front() {
        let day_values = vec![100.0, 101.0, 102.0];
        let benchmark = vec![50.0, 90.0, 100.0, 101.0, 102.0];
        //Alignment keeps the most recent benchmark returns, so a strategy
        //tracking the benchmark exactly has beta 1
        let metrics = RiskMetrics::from_day_values(&day_values, &benchmark).unwrap();
        assert_eq!(metrics.beta, 1.0);
    }
}
