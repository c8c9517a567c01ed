//! Backtest performance metrics
//!
//! Consumes the snapshot and fill streams the engine produces. Daily
//! returns come from the last snapshot equity of each calendar date;
//! annualization uses 252 trading days; the risk-free rate is annual and
//! converted to daily by /252.

use crate::oms::types::{Fill, PortfolioSnapshot};
use chrono::NaiveDate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::info;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Full metrics set exported to report writers
///
/// Field names are the export keys; keep them aligned with the reporting
/// contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub cagr: f64,
    pub total_pnl: f64,

    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    pub max_drawdown_duration_days: i64,
    pub calmar_ratio: f64,
    pub var_95: f64,
    pub cvar_95: f64,

    pub num_trades: usize,
    pub num_wins: usize,
    pub num_losses: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub expectancy: f64,
    pub total_commission: f64,

    pub start_date: String,
    pub end_date: String,
    pub initial_capital: f64,
    pub final_value: f64,
}

/// Calculates backtest performance metrics
pub struct MetricsCalculator {
    risk_free_rate: f64,
}

impl MetricsCalculator {
    /// `risk_free_rate` is annual (default 2%)
    pub fn new(risk_free_rate: f64) -> Self {
        Self { risk_free_rate }
    }

    pub fn calculate(
        &self,
        snapshots: &[PortfolioSnapshot],
        fills: &[Fill],
        initial_capital: f64,
    ) -> PerformanceMetrics {
        if snapshots.is_empty() {
            return PerformanceMetrics::default();
        }

        let equity_curve: Vec<f64> = snapshots.iter().map(|s| s.total_equity).collect();
        let final_value = *equity_curve.last().expect("non-empty");
        let start = snapshots.first().expect("non-empty").timestamp;
        let end = snapshots.last().expect("non-empty").timestamp;

        let daily_returns = daily_returns(snapshots);

        let total_return = if initial_capital != 0.0 {
            (final_value - initial_capital) / initial_capital
        } else {
            0.0
        };

        let cagr = {
            let days = (end - start).num_days();
            if initial_capital > 0.0 && days > 0 && final_value > 0.0 {
                let years = days as f64 / 365.25;
                (final_value / initial_capital).powf(1.0 / years) - 1.0
            } else {
                0.0
            }
        };

        let volatility = annualized_volatility(&daily_returns);
        let sharpe_ratio = self.sharpe_ratio(&daily_returns);
        let sortino_ratio = self.sortino_ratio(&daily_returns);

        let timestamps: Vec<_> = snapshots.iter().map(|s| s.timestamp).collect();
        let (max_drawdown, max_drawdown_duration_days) = max_drawdown(&equity_curve, &timestamps);

        let calmar_ratio = if max_drawdown != 0.0 {
            cagr / max_drawdown.abs()
        } else {
            0.0
        };

        let var_95 = percentile(&daily_returns, 5.0);
        let cvar_95 = cvar(&daily_returns, var_95);

        let trade = trade_metrics(fills);

        let metrics = PerformanceMetrics {
            total_return,
            cagr,
            total_pnl: final_value - initial_capital,
            volatility,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown,
            max_drawdown_duration_days,
            calmar_ratio,
            var_95,
            cvar_95,
            num_trades: trade.num_trades,
            num_wins: trade.num_wins,
            num_losses: trade.num_losses,
            win_rate: trade.win_rate,
            profit_factor: trade.profit_factor,
            avg_win: trade.avg_win,
            avg_loss: trade.avg_loss,
            expectancy: trade.expectancy,
            total_commission: trade.total_commission,
            start_date: start.format("%Y-%m-%d").to_string(),
            end_date: end.format("%Y-%m-%d").to_string(),
            initial_capital,
            final_value,
        };

        info!(
            "metrics: return={:.2}%, sharpe={:.2}, max_dd={:.2}%, trades={}",
            metrics.total_return * 100.0,
            metrics.sharpe_ratio,
            metrics.max_drawdown * 100.0,
            metrics.num_trades
        );

        metrics
    }

    fn sharpe_ratio(&self, daily_returns: &[f64]) -> f64 {
        if daily_returns.len() < 2 {
            return 0.0;
        }

        let daily_rf = self.risk_free_rate / TRADING_DAYS_PER_YEAR;
        let excess: Vec<f64> = daily_returns.iter().map(|r| r - daily_rf).collect();

        let std_dev = excess.iter().std_dev();
        if std_dev == 0.0 || std_dev.is_nan() {
            return 0.0;
        }

        excess.iter().mean() / std_dev * TRADING_DAYS_PER_YEAR.sqrt()
    }

    fn sortino_ratio(&self, daily_returns: &[f64]) -> f64 {
        if daily_returns.len() < 2 {
            return 0.0;
        }

        let daily_rf = self.risk_free_rate / TRADING_DAYS_PER_YEAR;
        let excess: Vec<f64> = daily_returns.iter().map(|r| r - daily_rf).collect();
        let downside: Vec<f64> = excess.iter().copied().filter(|r| *r < 0.0).collect();

        if downside.len() < 2 {
            return 0.0;
        }

        let downside_dev = downside.iter().std_dev();
        if downside_dev == 0.0 || downside_dev.is_nan() {
            return 0.0;
        }

        excess.iter().mean() / downside_dev * TRADING_DAYS_PER_YEAR.sqrt()
    }
}

impl Default for MetricsCalculator {
    fn default() -> Self {
        Self::new(0.02)
    }
}

/// Daily returns from the last snapshot equity of each calendar date
fn daily_returns(snapshots: &[PortfolioSnapshot]) -> Vec<f64> {
    let chunks = snapshots.iter().chunk_by(|s| s.timestamp.date_naive());
    let mut daily_close: Vec<(NaiveDate, f64)> = Vec::new();
    for (date, group) in &chunks {
        let last = group.last().expect("non-empty group");
        daily_close.push((date, last.total_equity));
    }

    daily_close
        .windows(2)
        .map(|w| {
            let (_, prev) = w[0];
            let (_, curr) = w[1];
            if prev > 0.0 {
                (curr - prev) / prev
            } else {
                0.0
            }
        })
        .collect()
}

fn annualized_volatility(daily_returns: &[f64]) -> f64 {
    if daily_returns.len() < 2 {
        return 0.0;
    }
    let std_dev = daily_returns.iter().std_dev();
    if std_dev.is_nan() {
        return 0.0;
    }
    std_dev * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Maximum drawdown relative to the running equity maximum, with the longest
/// underwater stretch in days
fn max_drawdown(equity_curve: &[f64], timestamps: &[chrono::DateTime<chrono::Utc>]) -> (f64, i64) {
    if equity_curve.is_empty() {
        return (0.0, 0);
    }

    let mut running_max = equity_curve[0];
    let mut max_dd = 0.0_f64;
    let mut max_duration = 0_i64;
    let mut current_duration = 0_i64;

    for (i, &equity) in equity_curve.iter().enumerate() {
        if equity > running_max {
            running_max = equity;
        }

        let dd = if running_max > 0.0 {
            (equity - running_max) / running_max
        } else {
            0.0
        };

        if dd < max_dd {
            max_dd = dd;
        }

        if dd < 0.0 {
            if i > 0 {
                let days = (timestamps[i] - timestamps[i - 1]).num_days();
                current_duration += days.max(1);
            } else {
                current_duration = 1;
            }
            max_duration = max_duration.max(current_duration);
        } else {
            current_duration = 0;
        }
    }

    (max_dd, max_duration)
}

/// Linear-interpolated percentile, matching the numpy default
fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("no NaN returns"));

    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        sorted[lower]
    } else {
        let weight = rank - lower as f64;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}

/// Expected shortfall: mean of returns at or below the VaR threshold
fn cvar(values: &[f64], var: f64) -> f64 {
    let tail: Vec<f64> = values.iter().copied().filter(|r| *r <= var).collect();
    if tail.is_empty() {
        return 0.0;
    }
    tail.iter().mean()
}

struct TradeMetrics {
    num_trades: usize,
    num_wins: usize,
    num_losses: usize,
    win_rate: f64,
    profit_factor: f64,
    avg_win: f64,
    avg_loss: f64,
    expectancy: f64,
    total_commission: f64,
}

/// Trade statistics from closing fills (realized P&L != 0)
fn trade_metrics(fills: &[Fill]) -> TradeMetrics {
    let wins: Vec<f64> = fills
        .iter()
        .filter(|f| f.realized_pnl > 0.0)
        .map(|f| f.realized_pnl)
        .collect();
    let losses: Vec<f64> = fills
        .iter()
        .filter(|f| f.realized_pnl < 0.0)
        .map(|f| f.realized_pnl)
        .collect();

    let num_trades = fills.iter().filter(|f| f.realized_pnl != 0.0).count();
    let num_wins = wins.len();
    let num_losses = losses.len();

    let win_rate = if num_trades > 0 {
        num_wins as f64 / num_trades as f64
    } else {
        0.0
    };

    let avg_win = if wins.is_empty() { 0.0 } else { wins.iter().mean() };
    let avg_loss = if losses.is_empty() { 0.0 } else { losses.iter().mean() };

    let total_wins: f64 = wins.iter().sum();
    let total_losses: f64 = losses.iter().sum::<f64>().abs();

    let profit_factor = if total_losses > 0.0 {
        total_wins / total_losses
    } else {
        0.0
    };

    let expectancy = win_rate * avg_win + (1.0 - win_rate) * avg_loss;

    let total_commission = fills.iter().map(|f| f.commission).sum();

    TradeMetrics {
        num_trades,
        num_wins,
        num_losses,
        win_rate,
        profit_factor,
        avg_win,
        avg_loss,
        expectancy,
        total_commission,
    }
}
