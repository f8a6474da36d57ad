//! Performance metrics over one wallet's value and return series.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// How to annualize and what to measure against.
#[derive(Debug, Clone, Copy)]
pub struct MetricsConfig {
    /// Bar period; one day by default.
    pub freq: Duration,
    /// Annual risk-free rate used by Sharpe/Sortino.
    pub risk_free_rate: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            freq: Duration::days(1),
            risk_free_rate: 0.0,
        }
    }
}

impl MetricsConfig {
    /// Number of bars in a (365-day) year under this frequency.
    pub fn periods_per_year(&self) -> f64 {
        let seconds = self.freq.num_seconds();
        if seconds <= 0 {
            return f64::NAN;
        }
        365.0 * 24.0 * 3600.0 / seconds as f64
    }
}

/// Summary statistics for one wallet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub max_drawdown: f64,
    /// Fraction of bars with a nonzero position, if provided.
    pub exposure: f64,
}

/// Compute summary metrics from per-bar simple returns.
///
/// `exposure` is passed through from the caller (it needs the position
/// mask, which lives with the portfolio, not the returns).
pub fn compute_metrics(returns: &[f64], exposure: f64, config: &MetricsConfig) -> Metrics {
    let clean: Vec<f64> = returns.iter().copied().filter(|r| !r.is_nan()).collect();
    let n = clean.len();
    if n == 0 {
        return Metrics {
            total_return: f64::NAN,
            annualized_return: f64::NAN,
            annualized_volatility: f64::NAN,
            sharpe: f64::NAN,
            sortino: f64::NAN,
            max_drawdown: f64::NAN,
            exposure,
        };
    }

    let periods = config.periods_per_year();
    let total_growth: f64 = clean.iter().map(|r| 1.0 + r).product();
    let total_return = total_growth - 1.0;
    let annualized_return = total_growth.powf(periods / n as f64) - 1.0;

    let mean = clean.iter().sum::<f64>() / n as f64;
    let variance = clean.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n as f64;
    let annualized_volatility = variance.sqrt() * periods.sqrt();

    let rf_per_bar = (1.0 + config.risk_free_rate).powf(1.0 / periods) - 1.0;
    let excess_mean = mean - rf_per_bar;
    let sharpe = if variance > 0.0 {
        excess_mean / variance.sqrt() * periods.sqrt()
    } else {
        f64::NAN
    };

    let downside: Vec<f64> = clean
        .iter()
        .map(|r| (r - rf_per_bar).min(0.0))
        .collect();
    let downside_var = downside.iter().map(|d| d * d).sum::<f64>() / n as f64;
    let sortino = if downside_var > 0.0 {
        excess_mean / downside_var.sqrt() * periods.sqrt()
    } else {
        f64::NAN
    };

    let max_drawdown = max_drawdown_of_growth(&clean);

    Metrics {
        total_return,
        annualized_return,
        annualized_volatility,
        sharpe,
        sortino,
        max_drawdown,
        exposure,
    }
}

/// Running drawdown of a value series: `value / running_peak - 1`.
pub fn drawdown_series(value: &[f64]) -> Vec<f64> {
    let mut peak = f64::NAN;
    value
        .iter()
        .map(|&v| {
            if v.is_nan() {
                return f64::NAN;
            }
            if peak.is_nan() || v > peak {
                peak = v;
            }
            if peak > 0.0 {
                v / peak - 1.0
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// Deepest drawdown implied by a return series (as a negative number).
fn max_drawdown_of_growth(returns: &[f64]) -> f64 {
    let mut level = 1.0;
    let mut peak = 1.0;
    let mut worst = 0.0f64;
    for r in returns {
        level *= 1.0 + r;
        if level > peak {
            peak = level;
        }
        worst = worst.min(level / peak - 1.0);
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_returns_have_no_drawdown() {
        let metrics = compute_metrics(&[0.0, 0.0, 0.0], 0.0, &MetricsConfig::default());
        assert_eq!(metrics.total_return, 0.0);
        assert_eq!(metrics.max_drawdown, 0.0);
    }

    #[test]
    fn total_return_compounds() {
        let metrics = compute_metrics(&[0.1, 0.1], 1.0, &MetricsConfig::default());
        assert!((metrics.total_return - 0.21).abs() < 1e-12);
    }

    #[test]
    fn drawdown_tracks_running_peak() {
        let dd = drawdown_series(&[100.0, 120.0, 90.0, 130.0]);
        assert_eq!(dd[0], 0.0);
        assert_eq!(dd[1], 0.0);
        assert!((dd[2] - (90.0 / 120.0 - 1.0)).abs() < 1e-12);
        assert_eq!(dd[3], 0.0);
    }

    #[test]
    fn max_drawdown_is_negative() {
        let metrics = compute_metrics(&[0.2, -0.5, 0.1], 1.0, &MetricsConfig::default());
        assert!((metrics.max_drawdown - (-0.5)).abs() < 1e-12);
    }

    #[test]
    fn periods_per_year_for_daily_bars() {
        let config = MetricsConfig::default();
        assert!((config.periods_per_year() - 365.0).abs() < 1e-9);
    }

    #[test]
    fn nan_returns_are_skipped() {
        let metrics = compute_metrics(
            &[f64::NAN, 0.1, f64::NAN, 0.1],
            0.5,
            &MetricsConfig::default(),
        );
        assert!((metrics.total_return - 0.21).abs() < 1e-12);
    }
}
