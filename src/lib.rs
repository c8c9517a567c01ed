//! Daywise event-driven backtesting engine
//!
//! Simulates single-instrument trading strategies against bar data: order
//! submission, intrabar first-touch fill determination, position and cash
//! accounting, day boundaries, and performance metrics. The simulation is
//! single-threaded and deterministic: identical inputs produce identical
//! snapshot and fill streams.

pub mod backtest;
pub mod config;
pub mod data;
pub mod indicators;
pub mod metrics;
pub mod oms;
pub mod portfolio;
pub mod reports;
pub mod risk;
pub mod signals;
pub mod strategy;
pub mod types;

pub use backtest::{BacktestError, BacktestResult, Backtester};
pub use config::BacktesterConfig;
pub use metrics::{MetricsCalculator, PerformanceMetrics};
pub use oms::{
    ExecutionModel, Fill, Order, OrderBook, OrderRequest, OrderStatus, OrderType,
    PortfolioSnapshot, Position, PositionSide, TpSlResolution,
};
pub use portfolio::Portfolio;
pub use risk::{RiskSizer, SizingMethod};
pub use signals::SignalQueue;
pub use strategy::Strategy;
pub use types::{Bar, BarValidationError, Side, Signal, Symbol};
