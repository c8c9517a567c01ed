//! CLI subcommand implementations

pub mod backtest;
pub mod validate;
