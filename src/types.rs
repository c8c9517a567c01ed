//! Core data types used across the backtesting engine

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for bar data
#[derive(Debug, Error)]
pub enum BarValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// Instrument symbol using Arc<str> for cheap cloning
///
/// Symbols are cloned on every signal, order, fill, and position row.
/// Arc<str> keeps those clones O(1) instead of re-allocating a String.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

/// Custom serde for Arc<str>
mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Single-letter tag used in generated order ids
    pub fn tag(self) -> &'static str {
        match self {
            Side::Buy => "B",
            Side::Sell => "S",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" | "B" | "LONG" => Ok(Side::Buy),
            "SELL" | "S" | "SHORT" => Ok(Side::Sell),
            other => Err(format!("unknown side: {}", other)),
        }
    }
}

/// Price bar - works with price-only or full OHLCV data
///
/// Construction normalizes missing OHLCV fields from `price` and widens
/// high/low so they always contain open and close. Bars are immutable once
/// built; nothing in the engine mutates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    pub price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Build a bar, filling missing OHLCV fields from `price`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timestamp: DateTime<Utc>,
        symbol: Symbol,
        price: f64,
        open: Option<f64>,
        high: Option<f64>,
        low: Option<f64>,
        close: Option<f64>,
        volume: Option<f64>,
    ) -> Self {
        let open = open.unwrap_or(price);
        let close = close.unwrap_or(price);
        let high = high.unwrap_or(price);
        let low = low.unwrap_or(price);

        // Widen the range instead of rejecting slightly inconsistent feeds
        let high = high.max(open).max(close).max(low);
        let low = low.min(open).min(close).min(high);

        Self {
            timestamp,
            symbol,
            price,
            open,
            high,
            low,
            close,
            volume: volume.unwrap_or(0.0),
        }
    }

    /// Create bar from just timestamp and price
    pub fn from_price(timestamp: DateTime<Utc>, symbol: Symbol, price: f64) -> Self {
        Self::new(timestamp, symbol, price, None, None, None, None, None)
    }

    /// Validate the bar data
    pub fn validate(&self) -> Result<(), BarValidationError> {
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(BarValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(BarValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.volume < 0.0 {
            return Err(BarValidationError::NegativeVolume(self.volume));
        }

        if self.open < self.low || self.open > self.high {
            return Err(BarValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(BarValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Calendar date of this bar (UTC)
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}

/// Trading signal emitted by a strategy (or bulk-loaded from file)
///
/// A signal is an intent, not an order: the risk sizer decides whether it
/// becomes an order and at what quantity. Consumed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub signal_id: String,
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    pub side: Side,
    /// Explicit quantity; None delegates sizing to the risk sizer
    pub size: Option<f64>,
    /// Limit price; None means market
    pub limit_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub reason: Option<String>,
}

impl Signal {
    pub fn new(timestamp: DateTime<Utc>, symbol: Symbol, side: Side) -> Self {
        let signal_id = format!(
            "{}-{}-{}",
            symbol,
            timestamp.format("%Y%m%d%H%M%S%3f"),
            side.tag()
        );
        Self {
            signal_id,
            timestamp,
            symbol,
            side,
            size: None,
            limit_price: None,
            stop_loss: None,
            take_profit: None,
            reason: None,
        }
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_limit_price(mut self, price: f64) -> Self {
        self.limit_price = Some(price);
        self
    }

    pub fn with_stop_loss(mut self, stop_loss: f64) -> Self {
        self.stop_loss = Some(stop_loss);
        self
    }

    pub fn with_take_profit(mut self, take_profit: f64) -> Self {
        self.take_profit = Some(take_profit);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_bar_from_price_fills_ohlcv() {
        let bar = Bar::from_price(ts(), Symbol::new("SYM"), 101.5);
        assert_eq!(bar.open, 101.5);
        assert_eq!(bar.high, 101.5);
        assert_eq!(bar.low, 101.5);
        assert_eq!(bar.close, 101.5);
        assert_eq!(bar.volume, 0.0);
        assert!(bar.is_valid());
    }

    #[test]
    fn test_bar_widens_inconsistent_range() {
        // high below close gets widened instead of rejected
        let bar = Bar::new(
            ts(),
            Symbol::new("SYM"),
            102.0,
            Some(100.0),
            Some(101.0),
            Some(99.0),
            Some(102.0),
            Some(1000.0),
        );
        assert_eq!(bar.high, 102.0);
        assert!(bar.low <= bar.open.min(bar.close));
        assert!(bar.is_valid());
    }

    #[test]
    fn test_bar_validation_rejects_negative_volume() {
        let mut bar = Bar::from_price(ts(), Symbol::new("SYM"), 100.0);
        bar.volume = -1.0;
        assert!(matches!(
            bar.validate(),
            Err(BarValidationError::NegativeVolume(_))
        ));
    }

    #[test]
    fn test_bar_direction() {
        let bullish = Bar::new(
            ts(),
            Symbol::new("SYM"),
            104.0,
            Some(99.0),
            Some(106.0),
            Some(95.0),
            Some(104.0),
            None,
        );
        assert!(bullish.is_bullish());

        let bearish = Bar::new(
            ts(),
            Symbol::new("SYM"),
            99.0,
            Some(100.0),
            Some(101.0),
            Some(98.0),
            Some(99.0),
            None,
        );
        assert!(!bearish.is_bullish());
    }

    #[test]
    fn test_side_parsing() {
        assert_eq!("buy".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!("SELL".parse::<Side>().unwrap(), Side::Sell);
        assert!("hold".parse::<Side>().is_err());
    }

    #[test]
    fn test_signal_id_is_deterministic() {
        let a = Signal::new(ts(), Symbol::new("SYM"), Side::Buy);
        let b = Signal::new(ts(), Symbol::new("SYM"), Side::Buy);
        assert_eq!(a.signal_id, b.signal_id);
    }
}
