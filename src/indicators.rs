//! Technical indicators powered by the `ta` crate
//!
//! Moving averages wrap the battle-tested `ta` implementations; ATR uses
//! Wilder's smoothing directly so the warm-up behavior matches the usual
//! charting-platform convention.

use statrs::statistics::Statistics;
use ta::indicators::{ExponentialMovingAverage, SimpleMovingAverage};
use ta::Next;

/// Calculate Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match SimpleMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    let mut result = Vec::with_capacity(values.len());

    for (i, &value) in values.iter().enumerate() {
        let sma_val = indicator.next(value);
        if i + 1 >= period {
            result.push(Some(sma_val));
        } else {
            result.push(None);
        }
    }

    result
}

/// Calculate Exponential Moving Average
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match ExponentialMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    let mut result = Vec::with_capacity(values.len());

    for (i, &value) in values.iter().enumerate() {
        let ema_val = indicator.next(value);
        if i + 1 >= period {
            result.push(Some(ema_val));
        } else {
            result.push(None);
        }
    }

    result
}

/// True range series
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(high.len());

    for i in 0..high.len() {
        if i == 0 {
            tr.push(high[i] - low[i]);
        } else {
            let hl = high[i] - low[i];
            let hc = (high[i] - close[i - 1]).abs();
            let lc = (low[i] - close[i - 1]).abs();
            tr.push(hl.max(hc).max(lc));
        }
    }

    tr
}

/// Average True Range with Wilder's smoothing
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    if high.is_empty() || period == 0 || high.len() != low.len() || high.len() != close.len() {
        return vec![];
    }

    let tr = true_range(high, low, close);
    let mut result = Vec::with_capacity(high.len());

    // ATR = (prev_ATR * (period - 1) + current_TR) / period
    let mut atr_value: Option<f64> = None;

    for (i, &tr_val) in tr.iter().enumerate() {
        if i + 1 < period {
            result.push(None);
        } else if i + 1 == period {
            let sum: f64 = tr[0..period].iter().sum();
            atr_value = Some(sum / period as f64);
            result.push(atr_value);
        } else if let Some(prev_atr) = atr_value {
            let new_atr = (prev_atr * (period - 1) as f64 + tr_val) / period as f64;
            atr_value = Some(new_atr);
            result.push(atr_value);
        } else {
            result.push(None);
        }
    }

    result
}

/// Annualized close-to-close volatility over the trailing `lookback` closes
///
/// Sample standard deviation of simple returns, annualized with the usual
/// 252 trading days. None until enough history has accumulated.
pub fn annualized_volatility(closes: &[f64], lookback: usize) -> Option<f64> {
    if lookback < 2 || closes.len() < lookback + 1 {
        return None;
    }

    let window = &closes[closes.len() - (lookback + 1)..];
    let returns: Vec<f64> = window
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();

    if returns.len() < 2 {
        return None;
    }

    let std_dev = returns.iter().std_dev();
    if std_dev.is_nan() {
        return None;
    }

    Some(std_dev * (252.0_f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sma_warmup_and_values() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma(&values, 3);

        assert_eq!(result.len(), 5);
        assert!(result[0].is_none());
        assert!(result[1].is_none());
        assert_relative_eq!(result[2].unwrap(), 2.0);
        assert_relative_eq!(result[3].unwrap(), 3.0);
        assert_relative_eq!(result[4].unwrap(), 4.0);
    }

    #[test]
    fn test_ema_warmup() {
        let values = vec![10.0, 10.0, 10.0, 10.0];
        let result = ema(&values, 2);
        assert!(result[0].is_none());
        assert_relative_eq!(result[3].unwrap(), 10.0);
    }

    #[test]
    fn test_atr_first_value_is_tr_average() {
        let high = vec![12.0, 13.0, 14.0];
        let low = vec![10.0, 11.0, 12.0];
        let close = vec![11.0, 12.0, 13.0];

        let result = atr(&high, &low, &close, 3);
        assert!(result[0].is_none());
        assert!(result[1].is_none());
        // TRs: 2, 2, 2 -> ATR 2
        assert_relative_eq!(result[2].unwrap(), 2.0);
    }

    #[test]
    fn test_annualized_volatility_constant_series_is_zero() {
        let closes = vec![100.0; 30];
        let vol = annualized_volatility(&closes, 20).unwrap();
        assert_relative_eq!(vol, 0.0);
    }

    #[test]
    fn test_annualized_volatility_needs_history() {
        let closes = vec![100.0, 101.0, 102.0];
        assert!(annualized_volatility(&closes, 20).is_none());
    }
}
