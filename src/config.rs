//! Configuration management
//!
//! Loads a sectioned JSON config file and validates it at construction time.
//! Invalid configuration fails fast before any data is touched.

use crate::risk::SizingMethod;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Configuration validation errors; surfaced at load time
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("data.price_data is required")]
    MissingPriceData,

    #[error("capital.initial must be positive (got {0})")]
    NonPositiveCapital(f64),

    #[error("execution.slippage_bps must be non-negative (got {0})")]
    NegativeSlippage(f64),

    #[error("execution.commission_bps must be non-negative (got {0})")]
    NegativeCommission(f64),

    #[error("execution.tick_size must be non-negative (got {0})")]
    NegativeTickSize(f64),

    #[error("risk.max_position_pct must be in (0, 1] (got {0})")]
    MaxPositionPctOutOfRange(f64),

    #[error("risk.max_portfolio_leverage must be non-negative (got {0})")]
    NegativeLeverage(f64),

    #[error("risk.vol_lookback must be at least 2 (got {0})")]
    VolLookbackTooShort(usize),

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),
}

/// Intrabar fill model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillModel {
    /// Earliest price inside the bar that satisfies the trigger
    #[default]
    FirstTouch,
    /// Only the bar close can satisfy the trigger
    Close,
}

impl FillModel {
    pub fn is_first_touch(self) -> bool {
        matches!(self, FillModel::FirstTouch)
    }
}

/// Complete backtester configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktesterConfig {
    pub data: DataConfig,
    #[serde(default)]
    pub capital: CapitalConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub eod: EodConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
}

impl BacktesterConfig {
    /// Load and validate configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let config: BacktesterConfig =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data.price_data.is_empty() {
            return Err(ConfigError::MissingPriceData);
        }
        if self.capital.initial <= 0.0 {
            return Err(ConfigError::NonPositiveCapital(self.capital.initial));
        }
        if self.execution.slippage_bps < 0.0 {
            return Err(ConfigError::NegativeSlippage(self.execution.slippage_bps));
        }
        if self.execution.commission_bps < 0.0 {
            return Err(ConfigError::NegativeCommission(self.execution.commission_bps));
        }
        if self.execution.tick_size < 0.0 {
            return Err(ConfigError::NegativeTickSize(self.execution.tick_size));
        }
        if self.risk.max_position_pct <= 0.0 || self.risk.max_position_pct > 1.0 {
            return Err(ConfigError::MaxPositionPctOutOfRange(self.risk.max_position_pct));
        }
        if self.risk.max_portfolio_leverage < 0.0 {
            return Err(ConfigError::NegativeLeverage(self.risk.max_portfolio_leverage));
        }
        if self.risk.vol_lookback < 2 {
            return Err(ConfigError::VolLookbackTooShort(self.risk.vol_lookback));
        }
        Ok(())
    }
}

/// Data source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub price_data: String,
    #[serde(default)]
    pub signal_file: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
}

fn default_timeframe() -> String {
    "1D".to_string()
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            price_data: String::new(),
            signal_file: None,
            symbol: None,
            start_date: None,
            end_date: None,
            timeframe: default_timeframe(),
        }
    }
}

/// Capital configuration; currency is a label only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalConfig {
    #[serde(default = "default_initial_capital")]
    pub initial: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_initial_capital() -> f64 {
    100_000.0
}

fn default_currency() -> String {
    "USD".to_string()
}

impl Default for CapitalConfig {
    fn default() -> Self {
        CapitalConfig {
            initial: default_initial_capital(),
            currency: default_currency(),
        }
    }
}

/// Execution simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: f64,
    #[serde(default = "default_commission_bps")]
    pub commission_bps: f64,
    #[serde(default = "default_tick_size")]
    pub tick_size: f64,
    #[serde(default)]
    pub fill_model: FillModel,
}

fn default_slippage_bps() -> f64 {
    5.0
}

fn default_commission_bps() -> f64 {
    2.0
}

fn default_tick_size() -> f64 {
    0.05
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            slippage_bps: default_slippage_bps(),
            commission_bps: default_commission_bps(),
            tick_size: default_tick_size(),
            fill_model: FillModel::default(),
        }
    }
}

/// Risk management configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: f64,
    #[serde(default = "default_max_leverage")]
    pub max_portfolio_leverage: f64,
    #[serde(default)]
    pub max_positions: Option<usize>,
    #[serde(default = "default_min_position_size")]
    pub min_position_size: f64,
    #[serde(default)]
    pub sizing_method: SizingMethod,
    #[serde(default = "default_vol_lookback")]
    pub vol_lookback: usize,
    #[serde(default = "default_target_vol")]
    pub target_vol: f64,
    #[serde(default)]
    pub stop_loss_pct: Option<f64>,
    #[serde(default)]
    pub take_profit_pct: Option<f64>,
}

fn default_max_position_pct() -> f64 {
    0.20
}

fn default_max_leverage() -> f64 {
    1.0
}

fn default_min_position_size() -> f64 {
    1.0
}

fn default_vol_lookback() -> usize {
    20
}

fn default_target_vol() -> f64 {
    0.15
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            max_position_pct: default_max_position_pct(),
            max_portfolio_leverage: default_max_leverage(),
            max_positions: None,
            min_position_size: default_min_position_size(),
            sizing_method: SizingMethod::default(),
            vol_lookback: default_vol_lookback(),
            target_vol: default_target_vol(),
            stop_loss_pct: None,
            take_profit_pct: None,
        }
    }
}

/// End-of-day configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EodConfig {
    #[serde(default)]
    pub close_all_eod: bool,
    /// Label only; mark-to-market happens on every bar close
    #[serde(default = "default_mtm_frequency")]
    pub mtm_frequency: String,
}

fn default_mtm_frequency() -> String {
    "daily".to_string()
}

impl Default for EodConfig {
    fn default() -> Self {
        EodConfig {
            close_all_eod: false,
            mtm_frequency: default_mtm_frequency(),
        }
    }
}

/// Reporting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_true")]
    pub export_trades: bool,
    #[serde(default = "default_true")]
    pub export_metrics: bool,
}

fn default_output_dir() -> String {
    "results".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ReportingConfig {
    fn default() -> Self {
        ReportingConfig {
            output_dir: default_output_dir(),
            export_trades: true,
            export_metrics: true,
        }
    }
}

/// Strategy selection; params are interpreted by the strategy factory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "default_strategy_name")]
    pub name: String,
    #[serde(default = "default_strategy_params")]
    pub params: serde_json::Value,
}

fn default_strategy_name() -> String {
    "ma_cross".to_string()
}

fn default_strategy_params() -> serde_json::Value {
    serde_json::json!({})
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig {
            name: default_strategy_name(),
            params: default_strategy_params(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> BacktesterConfig {
        BacktesterConfig {
            data: DataConfig {
                price_data: "data/bars.csv".to_string(),
                ..DataConfig::default()
            },
            capital: CapitalConfig::default(),
            execution: ExecutionConfig::default(),
            risk: RiskConfig::default(),
            eod: EodConfig::default(),
            reporting: ReportingConfig::default(),
            strategy: StrategyConfig::default(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_missing_price_data_fails() {
        let mut config = base_config();
        config.data.price_data = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::MissingPriceData)));
    }

    #[test]
    fn test_non_positive_capital_fails() {
        let mut config = base_config();
        config.capital.initial = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositiveCapital(_))
        ));
    }

    #[test]
    fn test_bad_position_pct_fails() {
        let mut config = base_config();
        config.risk.max_position_pct = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MaxPositionPctOutOfRange(_))
        ));
    }

    #[test]
    fn test_parse_minimal_json() {
        let json = r#"{
            "data": { "price_data": "bars.csv" },
            "execution": { "fill_model": "close" },
            "risk": { "sizing_method": "volatility", "max_positions": 3 }
        }"#;
        let config: BacktesterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.execution.fill_model, FillModel::Close);
        assert_eq!(config.risk.sizing_method, SizingMethod::Volatility);
        assert_eq!(config.risk.max_positions, Some(3));
        assert_eq!(config.capital.initial, 100_000.0);
        // Missing strategy section still yields a usable params object
        assert_eq!(config.strategy.name, "ma_cross");
        assert!(config.strategy.params.is_object());
        assert!(config.validate().is_ok());
    }
}
