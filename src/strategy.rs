//! Strategy contract and bundled strategies
//!
//! A strategy is the one polymorphic seam in the engine: the backtester
//! holds a boxed instance and calls it cooperatively. Strategies may keep
//! private state, but must be deterministic given identical input
//! sequences.

use crate::config::BacktesterConfig;
use crate::indicators;
use crate::oms::types::{Fill, Position};
use crate::{Bar, Side, Signal, Symbol};
use anyhow::Result;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info};

/// Strategy capability set consumed by the engine
///
/// Hooks run in a fixed order per bar (positions update, on_bar, fills,
/// snapshot); day hooks fire on calendar transitions of the bar stream.
pub trait Strategy {
    fn name(&self) -> &str;

    /// Called once before the loop with all bar data, for indicator warm-up
    fn preprocess(&mut self, _data: &HashMap<Symbol, Vec<Bar>>) {}

    /// Called on each bar; returned signals enter the queue
    fn on_bar(&mut self, bar: &Bar) -> Vec<Signal>;

    /// Called after each fill is applied to the portfolio
    fn on_fill(&mut self, _fill: &Fill) {}

    fn on_day_start(&mut self, _date: NaiveDate) {}

    /// Called at end of day; returned signals are queued for the next bar
    fn on_day_end(&mut self, _date: NaiveDate) -> Vec<Signal> {
        Vec::new()
    }

    /// Read-only view of the current position set, refreshed before on_bar
    fn update_positions(&mut self, _positions: &HashMap<Symbol, Position>) {}
}

/// Create a strategy from configuration
pub fn create_strategy(config: &BacktesterConfig) -> Result<Box<dyn Strategy>> {
    match config.strategy.name.as_str() {
        "ma_cross" => {
            let params: MaCrossParams = serde_json::from_value(config.strategy.params.clone())?;
            Ok(Box::new(MovingAverageCrossStrategy::new(
                params.fast_period,
                params.slow_period,
                params.square_off_eod,
            )))
        }
        "buy_hold" => Ok(Box::new(BuyAndHoldStrategy::new())),
        other => anyhow::bail!(
            "Unknown strategy: {}. Available: ma_cross, buy_hold",
            other
        ),
    }
}

#[derive(Debug, Deserialize)]
struct MaCrossParams {
    #[serde(default = "default_fast_period")]
    fast_period: usize,
    #[serde(default = "default_slow_period")]
    slow_period: usize,
    #[serde(default)]
    square_off_eod: bool,
}

fn default_fast_period() -> usize {
    10
}

fn default_slow_period() -> usize {
    20
}

/// Simple moving average crossover strategy
///
/// Buys on a bullish fast/slow cross, exits the long on a bearish cross.
/// Needs slow_period + 1 bars of history before it can fire.
pub struct MovingAverageCrossStrategy {
    fast_period: usize,
    slow_period: usize,
    square_off_eod: bool,

    price_history: HashMap<Symbol, Vec<f64>>,
    positions: HashMap<Symbol, Position>,
}

impl MovingAverageCrossStrategy {
    pub fn new(fast_period: usize, slow_period: usize, square_off_eod: bool) -> Self {
        info!(
            "MA cross strategy: fast={}, slow={}",
            fast_period, slow_period
        );
        Self {
            fast_period,
            slow_period,
            square_off_eod,
            price_history: HashMap::new(),
            positions: HashMap::new(),
        }
    }

    fn position_quantity(&self, symbol: &Symbol) -> f64 {
        self.positions.get(symbol).map_or(0.0, |p| p.quantity)
    }
}

impl Strategy for MovingAverageCrossStrategy {
    fn name(&self) -> &str {
        "ma_cross"
    }

    fn on_bar(&mut self, bar: &Bar) -> Vec<Signal> {
        let history = self.price_history.entry(bar.symbol.clone()).or_default();
        history.push(bar.price);

        // Keep only what the slow average needs
        let max_period = self.fast_period.max(self.slow_period);
        if history.len() > max_period + 1 {
            let excess = history.len() - (max_period + 1);
            history.drain(..excess);
        }

        // Crossover detection needs the previous averages too
        if history.len() <= self.slow_period {
            return Vec::new();
        }

        let fast = indicators::sma(history, self.fast_period);
        let slow = indicators::sma(history, self.slow_period);

        let last = history.len() - 1;
        let (Some(fast_now), Some(slow_now), Some(fast_prev), Some(slow_prev)) = (
            fast[last],
            slow[last],
            fast[last - 1],
            slow[last - 1],
        ) else {
            return Vec::new();
        };

        let mut signals = Vec::new();
        let quantity = self.position_quantity(&bar.symbol);

        if fast_prev <= slow_prev && fast_now > slow_now {
            if quantity <= 0.0 {
                debug!(
                    "BUY signal: {} @ {:.4} (fast={:.4}, slow={:.4})",
                    bar.symbol, bar.price, fast_now, slow_now
                );
                signals.push(
                    Signal::new(bar.timestamp, bar.symbol.clone(), Side::Buy).with_reason(
                        format!("MA cross: {:.2} > {:.2}", fast_now, slow_now),
                    ),
                );
            }
        } else if fast_prev >= slow_prev && fast_now < slow_now && quantity > 0.0 {
            debug!(
                "SELL signal: {} @ {:.4} (fast={:.4}, slow={:.4})",
                bar.symbol, bar.price, fast_now, slow_now
            );
            signals.push(
                Signal::new(bar.timestamp, bar.symbol.clone(), Side::Sell)
                    .with_size(quantity)
                    .with_reason(format!("MA cross: {:.2} < {:.2}", fast_now, slow_now)),
            );
        }

        signals
    }

    fn on_day_end(&mut self, date: NaiveDate) -> Vec<Signal> {
        if !self.square_off_eod {
            return Vec::new();
        }

        let mut signals = Vec::new();
        for (symbol, position) in &self.positions {
            if position.quantity != 0.0 {
                let side = if position.quantity > 0.0 {
                    Side::Sell
                } else {
                    Side::Buy
                };
                let timestamp = date
                    .and_hms_opt(23, 59, 59)
                    .expect("valid time")
                    .and_utc();
                signals.push(
                    Signal::new(timestamp, symbol.clone(), side)
                        .with_size(position.quantity.abs())
                        .with_reason("EOD square-off"),
                );
                info!("EOD square-off signal: {} {} {}", symbol, side, position.quantity.abs());
            }
        }

        signals
    }

    fn update_positions(&mut self, positions: &HashMap<Symbol, Position>) {
        self.positions = positions.clone();
    }
}

/// Buys once on the first bar and holds
pub struct BuyAndHoldStrategy {
    entered: bool,
    positions: HashMap<Symbol, Position>,
}

impl BuyAndHoldStrategy {
    pub fn new() -> Self {
        Self {
            entered: false,
            positions: HashMap::new(),
        }
    }
}

impl Default for BuyAndHoldStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for BuyAndHoldStrategy {
    fn name(&self) -> &str {
        "buy_hold"
    }

    fn on_bar(&mut self, bar: &Bar) -> Vec<Signal> {
        let has_position = self
            .positions
            .get(&bar.symbol)
            .map_or(false, |p| p.quantity != 0.0);

        if !self.entered && !has_position {
            self.entered = true;
            return vec![
                Signal::new(bar.timestamp, bar.symbol.clone(), Side::Buy)
                    .with_reason("buy and hold entry"),
            ];
        }

        Vec::new()
    }

    fn update_positions(&mut self, positions: &HashMap<Symbol, Position>) {
        self.positions = positions.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars_from_prices(prices: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                Bar::from_price(start + Duration::minutes(i as i64), Symbol::new("SYM"), p)
            })
            .collect()
    }

    #[test]
    fn test_ma_cross_fires_buy_on_bullish_cross() {
        let mut strategy = MovingAverageCrossStrategy::new(2, 3, false);

        // Downtrend then a sharp reversal forces fast over slow
        let mut prices = vec![110.0, 108.0, 106.0, 104.0, 102.0, 100.0];
        prices.extend([101.0, 104.0, 108.0]);

        let mut buy_signals = 0;
        for bar in bars_from_prices(&prices) {
            for signal in strategy.on_bar(&bar) {
                if signal.side == Side::Buy {
                    buy_signals += 1;
                }
            }
        }
        assert!(buy_signals >= 1);
    }

    #[test]
    fn test_ma_cross_needs_history() {
        let mut strategy = MovingAverageCrossStrategy::new(10, 20, false);
        let bars = bars_from_prices(&[100.0]);
        // A single bar can never produce a crossover signal
        assert!(strategy.on_bar(&bars[0]).is_empty());
    }

    #[test]
    fn test_ma_cross_eod_square_off_signals() {
        let mut strategy = MovingAverageCrossStrategy::new(2, 3, true);

        let mut position = Position::new(Symbol::new("SYM"));
        position.quantity = 10.0;
        let mut positions = HashMap::new();
        positions.insert(Symbol::new("SYM"), position);
        strategy.update_positions(&positions);

        let signals = strategy.on_day_end(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side, Side::Sell);
        assert_eq!(signals[0].size, Some(10.0));
    }

    #[test]
    fn test_factory_rejects_unknown_strategy() {
        let mut config = crate::config::BacktesterConfig {
            data: crate::config::DataConfig {
                price_data: "bars.csv".to_string(),
                ..crate::config::DataConfig::default()
            },
            capital: Default::default(),
            execution: Default::default(),
            risk: Default::default(),
            eod: Default::default(),
            reporting: Default::default(),
            strategy: Default::default(),
        };

        assert!(create_strategy(&config).is_ok());

        config.strategy.name = "martingale".to_string();
        assert!(create_strategy(&config).is_err());
    }

    #[test]
    fn test_buy_and_hold_enters_once() {
        let mut strategy = BuyAndHoldStrategy::new();
        let bars = bars_from_prices(&[100.0, 101.0, 102.0]);

        let first = strategy.on_bar(&bars[0]);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].side, Side::Buy);

        assert!(strategy.on_bar(&bars[1]).is_empty());
        assert!(strategy.on_bar(&bars[2]).is_empty());
    }
}
