//! Backtest engine: the bar-by-bar event loop
//!
//! Per-bar ordering is the contract everything else relies on: day
//! boundary, strategy on_bar, signal drain, risk sizing, order matching,
//! fill application, mark-to-market, snapshot. Orders submitted during
//! on_bar(t) are eligible for matching in that same bar; signals are never
//! released before their timestamp.

use crate::config::BacktesterConfig;
use crate::metrics::{MetricsCalculator, PerformanceMetrics};
use crate::oms::execution::ExecutionModel;
use crate::oms::orderbook::OrderBook;
use crate::oms::types::{Fill, PortfolioSnapshot};
use crate::portfolio::Portfolio;
use crate::risk::{RiskSizer, SizingMethod};
use crate::signals::SignalQueue;
use crate::strategy::Strategy;
use crate::{indicators, Bar, Signal};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

/// Fatal simulation errors; anything recoverable is logged instead
#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("no bars to process")]
    NoData,

    #[error("bars out of order at {timestamp}: expected non-decreasing timestamps")]
    NonMonotonicBars { timestamp: DateTime<Utc> },

    #[error("bar stream switched symbol at {timestamp}: {expected} -> {found}")]
    MixedSymbols {
        timestamp: DateTime<Utc>,
        expected: String,
        found: String,
    },
}

/// Backtest output handed to report writers
#[derive(Debug)]
pub struct BacktestResult {
    pub snapshots: Vec<PortfolioSnapshot>,
    pub fills: Vec<Fill>,
    pub metrics: PerformanceMetrics,
}

/// Backtest engine - owns every component and drives the loop
pub struct Backtester {
    config: BacktesterConfig,
    strategy: Box<dyn Strategy>,

    risk_sizer: RiskSizer,
    order_book: OrderBook,
    portfolio: Portfolio,
    signal_queue: SignalQueue,

    current_day: Option<NaiveDate>,
    /// Rolling close history for volatility sizing
    closes: Vec<f64>,
}

impl Backtester {
    pub fn new(config: BacktesterConfig, strategy: Box<dyn Strategy>) -> Self {
        let execution = ExecutionModel::new(
            config.execution.slippage_bps,
            config.execution.commission_bps,
            config.execution.tick_size,
            config.execution.fill_model.is_first_touch(),
        );

        let risk_sizer = RiskSizer::new(
            config.risk.max_position_pct,
            config.risk.max_portfolio_leverage,
            config.risk.max_positions,
            config.risk.min_position_size,
            config.risk.sizing_method,
            config.risk.vol_lookback,
            config.risk.target_vol,
        );

        let portfolio = Portfolio::new(config.capital.initial, true, config.eod.close_all_eod);

        Backtester {
            strategy,
            risk_sizer,
            order_book: OrderBook::new(execution),
            portfolio,
            signal_queue: SignalQueue::new(60),
            current_day: None,
            closes: Vec::new(),
            config,
        }
    }

    /// Queue externally sourced signals (e.g. a signal file) before running
    pub fn queue_signals(&mut self, signals: Vec<Signal>) -> usize {
        self.signal_queue.extend(signals)
    }

    /// Run the backtest over an ordered single-symbol bar stream
    pub fn run(&mut self, bars: &[Bar]) -> Result<BacktestResult, BacktestError> {
        if bars.is_empty() {
            return Err(BacktestError::NoData);
        }

        info!("backtest start: {} bars of {}", bars.len(), bars[0].symbol);

        let mut data = HashMap::new();
        data.insert(bars[0].symbol.clone(), bars.to_vec());
        self.strategy.preprocess(&data);

        let mut previous_timestamp: Option<DateTime<Utc>> = None;

        for bar in bars {
            if let Some(prev) = previous_timestamp {
                if bar.timestamp < prev {
                    return Err(BacktestError::NonMonotonicBars {
                        timestamp: bar.timestamp,
                    });
                }
            }
            previous_timestamp = Some(bar.timestamp);

            if bar.symbol != bars[0].symbol {
                return Err(BacktestError::MixedSymbols {
                    timestamp: bar.timestamp,
                    expected: bars[0].symbol.to_string(),
                    found: bar.symbol.to_string(),
                });
            }

            self.handle_day_boundary(bar);
            self.process_bar(bar);
        }

        // Final day end
        if let Some(day) = self.current_day.take() {
            let last_ts = previous_timestamp.expect("at least one bar");
            debug!("final day end: {}", day);
            // Queued square-off signals have no bar left to execute against;
            // the portfolio-level square-off is what closes the books
            let _ = self.strategy.on_day_end(day);
            self.portfolio.finalize_day(last_ts);
            for fill in self.portfolio.drain_eod_fills() {
                self.order_book.record_fill(fill);
            }
        }

        let metrics = MetricsCalculator::default().calculate(
            self.portfolio.snapshots(),
            self.order_book.fills(),
            self.config.capital.initial,
        );

        info!("backtest end: {} snapshots, {} fills", self.portfolio.snapshots().len(), self.order_book.fills().len());

        Ok(BacktestResult {
            snapshots: self.portfolio.snapshots().to_vec(),
            fills: self.order_book.fills().to_vec(),
            metrics,
        })
    }

    fn handle_day_boundary(&mut self, bar: &Bar) {
        let bar_date = bar.date();

        match self.current_day {
            None => {
                self.current_day = Some(bar_date);
                self.portfolio.check_new_day(bar.timestamp);
                self.strategy.on_day_start(bar_date);
            }
            Some(day) if day != bar_date => {
                debug!("day boundary: {} -> {}", day, bar_date);

                let eod_signals = self.strategy.on_day_end(day);
                self.signal_queue.extend(eod_signals);

                self.portfolio.check_new_day(bar.timestamp);
                for fill in self.portfolio.drain_eod_fills() {
                    self.order_book.record_fill(fill);
                }

                self.current_day = Some(bar_date);
                self.strategy.on_day_start(bar_date);
            }
            _ => {}
        }
    }

    fn process_bar(&mut self, bar: &Bar) {
        self.closes.push(bar.close);

        // Strategy sees its current positions before deciding
        self.strategy.update_positions(self.portfolio.positions());

        let signals = self.strategy.on_bar(bar);
        for signal in signals {
            self.signal_queue.push(signal);
        }

        // Signals at or before this bar become orders, eligible this bar
        let volatility = if self.risk_sizer.sizing_method == SizingMethod::Volatility {
            indicators::annualized_volatility(&self.closes, self.risk_sizer.vol_lookback)
        } else {
            None
        };

        for signal in self.signal_queue.drain_until(bar.timestamp) {
            if let Some(request) = self
                .risk_sizer
                .build_order(&signal, bar.price, &self.portfolio, volatility)
            {
                self.order_book.submit(request);
            }
        }

        // Match, apply in deterministic order, notify the strategy
        let mut fills = self.order_book.process_bar(bar);
        for fill in &mut fills {
            self.portfolio.apply_fill(fill, Some(bar.close));
            self.strategy.on_fill(fill);
        }
        for fill in fills {
            self.order_book.record_fill(fill);
        }
        // A fill dated past the current day may have rolled it mid-bar
        for fill in self.portfolio.drain_eod_fills() {
            self.order_book.record_fill(fill);
        }

        self.portfolio.update_from_bar(bar);
        self.portfolio.create_snapshot(bar.timestamp);
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn order_book(&self) -> &OrderBook {
        &self.order_book
    }
}
