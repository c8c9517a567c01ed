//! Risk sizing: transforms strategy signals into admitted orders
//!
//! Sizing picks a desired quantity (fraction of equity, volatility target,
//! or fixed); admission then rejects or clips it against the position-count,
//! per-position-notional, and portfolio-leverage limits, in that order.

use crate::oms::orderbook::OrderRequest;
use crate::portfolio::Portfolio;
use crate::{Side, Signal};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
#[error("unknown sizing method: {0} (expected fraction, volatility, or fixed)")]
pub struct SizingMethodParseError(String);

/// Position sizing method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizingMethod {
    /// floor(equity * max_position_pct / price)
    #[default]
    Fraction,
    /// floor(target_vol * equity / (price * annualized_vol)), capped by the fraction size
    Volatility,
    /// min_position_size
    Fixed,
}

impl std::str::FromStr for SizingMethod {
    type Err = SizingMethodParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fraction" => Ok(SizingMethod::Fraction),
            "volatility" => Ok(SizingMethod::Volatility),
            "fixed" => Ok(SizingMethod::Fixed),
            other => Err(SizingMethodParseError(other.to_string())),
        }
    }
}

/// Sizes signals and enforces portfolio risk limits
#[derive(Debug, Clone)]
pub struct RiskSizer {
    pub max_position_pct: f64,
    pub max_portfolio_leverage: f64,
    pub max_positions: Option<usize>,
    pub min_position_size: f64,
    pub sizing_method: SizingMethod,
    pub vol_lookback: usize,
    pub target_vol: f64,
}

impl RiskSizer {
    pub fn new(
        max_position_pct: f64,
        max_portfolio_leverage: f64,
        max_positions: Option<usize>,
        min_position_size: f64,
        sizing_method: SizingMethod,
        vol_lookback: usize,
        target_vol: f64,
    ) -> Self {
        Self {
            max_position_pct,
            max_portfolio_leverage,
            max_positions,
            min_position_size,
            sizing_method,
            vol_lookback,
            target_vol,
        }
    }

    /// Turn a signal into an order request, or None when admission rejects it
    ///
    /// `volatility` is the annualized close-to-close volatility used by
    /// volatility sizing; ignored by the other methods.
    pub fn build_order(
        &self,
        signal: &Signal,
        price: f64,
        portfolio: &Portfolio,
        volatility: Option<f64>,
    ) -> Option<OrderRequest> {
        let equity = portfolio.total_equity();

        let desired = self.calculate_position_size(price, equity, signal.size, volatility);
        let admitted = self.admit(signal, desired, price, portfolio);

        if admitted <= 0.0 {
            warn!(
                "signal rejected: {} {} @ {:.4} (sized to zero)",
                signal.symbol, signal.side, price
            );
            return None;
        }

        Some(OrderRequest::from_signal(signal, admitted))
    }

    /// Desired quantity before admission checks
    pub fn calculate_position_size(
        &self,
        price: f64,
        equity: f64,
        signal_size: Option<f64>,
        volatility: Option<f64>,
    ) -> f64 {
        // An explicit signal size is the desired size, still checked later
        if let Some(size) = signal_size {
            if size > 0.0 {
                return size.floor();
            }
        }

        let size = match self.sizing_method {
            SizingMethod::Fraction => self.size_by_fraction(price, equity),
            SizingMethod::Volatility => match volatility {
                Some(vol) => self.size_by_volatility(price, equity, vol),
                None => {
                    warn!("volatility sizing requested but no volatility available, using fraction");
                    self.size_by_fraction(price, equity)
                }
            },
            SizingMethod::Fixed => self.min_position_size,
        };

        let size = size.max(self.min_position_size);

        debug!("calculated position size: {} @ {:.4}", size, price);

        size.floor()
    }

    fn size_by_fraction(&self, price: f64, equity: f64) -> f64 {
        if price <= 0.0 || equity <= 0.0 {
            return self.min_position_size;
        }
        (equity * self.max_position_pct / price).floor()
    }

    fn size_by_volatility(&self, price: f64, equity: f64, volatility: f64) -> f64 {
        if price <= 0.0 || equity <= 0.0 || volatility <= 0.0 {
            return self.min_position_size;
        }

        let target_dollar_vol = self.target_vol * equity;
        let position_dollar_vol = price * volatility;
        let quantity = (target_dollar_vol / position_dollar_vol).floor();

        // Clamped above by the fraction cap
        quantity.min(self.size_by_fraction(price, equity))
    }

    /// Admission checks in order: position count (reject), per-position
    /// notional (clip), leverage (clip). Returns the final size, >= 0.
    fn admit(&self, signal: &Signal, proposed: f64, price: f64, portfolio: &Portfolio) -> f64 {
        if proposed <= 0.0 {
            return 0.0;
        }

        let equity = portfolio.total_equity();
        let symbol = &signal.symbol;
        let positions = portfolio.positions();

        // 1. Position count: a new symbol over the cap is rejected outright
        if let Some(max_positions) = self.max_positions {
            let open_count = portfolio.open_position_count();
            let already_open = positions
                .get(symbol)
                .map_or(false, |p| p.quantity != 0.0);
            if !already_open && open_count >= max_positions {
                warn!(
                    "signal rejected: {} would exceed max positions ({})",
                    symbol, max_positions
                );
                return 0.0;
            }
        }

        let mut quantity = proposed;

        // 2. Per-position notional cap
        let max_position_value = equity * self.max_position_pct;
        if quantity * price > max_position_value {
            let clipped = (max_position_value / price).floor();
            debug!(
                "position size clipped for {}: {} -> {} (notional cap)",
                symbol, quantity, clipped
            );
            quantity = clipped;
        }

        // 3. Portfolio leverage, replacing any existing exposure in this symbol
        let current_exposure: f64 = positions
            .values()
            .filter(|p| p.quantity != 0.0 && &p.symbol != symbol)
            .map(|p| {
                let mark = portfolio
                    .mark_price(&p.symbol)
                    .unwrap_or(p.avg_entry_price);
                (p.quantity * mark).abs()
            })
            .sum();

        let available_exposure = equity * self.max_portfolio_leverage - current_exposure;
        if quantity * price > available_exposure {
            let clipped = (available_exposure.max(0.0) / price).floor();
            debug!(
                "position size clipped for {}: {} -> {} (leverage cap)",
                symbol, quantity, clipped
            );
            quantity = clipped;
        }

        quantity.max(0.0)
    }

    /// Stop-loss from a percentage or an ATR multiple; pure derivation
    pub fn stop_loss_price(
        entry_price: f64,
        side: Side,
        stop_pct: Option<f64>,
        atr: Option<f64>,
        atr_multiplier: f64,
    ) -> Option<f64> {
        if let Some(pct) = stop_pct {
            return Some(match side {
                Side::Buy => entry_price * (1.0 - pct),
                Side::Sell => entry_price * (1.0 + pct),
            });
        }

        if let Some(atr) = atr {
            let distance = atr * atr_multiplier;
            return Some(match side {
                Side::Buy => entry_price - distance,
                Side::Sell => entry_price + distance,
            });
        }

        None
    }

    /// Take-profit from a percentage or a risk/reward multiple of the stop
    /// distance; pure derivation
    pub fn take_profit_price(
        entry_price: f64,
        side: Side,
        profit_pct: Option<f64>,
        risk_reward_ratio: Option<f64>,
        stop_loss: Option<f64>,
    ) -> Option<f64> {
        if let Some(pct) = profit_pct {
            return Some(match side {
                Side::Buy => entry_price * (1.0 + pct),
                Side::Sell => entry_price * (1.0 - pct),
            });
        }

        if let (Some(ratio), Some(stop)) = (risk_reward_ratio, stop_loss) {
            let reward = (entry_price - stop).abs() * ratio;
            return Some(match side {
                Side::Buy => entry_price + reward,
                Side::Sell => entry_price - reward,
            });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oms::types::Fill;
    use crate::Symbol;
    use chrono::{TimeZone, Utc};

    fn sizer() -> RiskSizer {
        RiskSizer::new(0.20, 1.0, Some(2), 1.0, SizingMethod::Fraction, 20, 0.15)
    }

    fn signal(side: Side) -> Signal {
        Signal::new(
            Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap(),
            Symbol::new("SYM"),
            side,
        )
    }

    fn portfolio_with_position(symbol: &str, quantity: f64, price: f64) -> Portfolio {
        let mut portfolio = Portfolio::new(100_000.0, false, false);
        let mut fill = Fill {
            fill_id: "T-F0".to_string(),
            order_id: "T".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap(),
            symbol: Symbol::new(symbol),
            side: if quantity >= 0.0 { Side::Buy } else { Side::Sell },
            quantity: quantity.abs(),
            price,
            commission: 0.0,
            slippage_bps: 0.0,
            execution_price: price,
            realized_pnl: 0.0,
            reason: None,
        };
        portfolio.apply_fill(&mut fill, Some(price));
        portfolio
    }

    #[test]
    fn test_fraction_sizing() {
        let sizer = sizer();
        // 100k * 0.20 / 50 = 400
        assert_eq!(sizer.calculate_position_size(50.0, 100_000.0, None, None), 400.0);
    }

    #[test]
    fn test_explicit_signal_size_wins() {
        let sizer = sizer();
        assert_eq!(
            sizer.calculate_position_size(50.0, 100_000.0, Some(10.0), None),
            10.0
        );
    }

    #[test]
    fn test_volatility_sizing_clamped_by_fraction() {
        let mut sizer = sizer();
        sizer.sizing_method = SizingMethod::Volatility;

        // 0.15 * 100k / (50 * 0.30) = 1000, clamped to the fraction cap 400
        assert_eq!(
            sizer.calculate_position_size(50.0, 100_000.0, None, Some(0.30)),
            400.0
        );

        // High vol shrinks the size below the cap: 0.15*100k/(50*1.5) = 200
        assert_eq!(
            sizer.calculate_position_size(50.0, 100_000.0, None, Some(1.5)),
            200.0
        );
    }

    #[test]
    fn test_fixed_sizing() {
        let mut sizer = sizer();
        sizer.sizing_method = SizingMethod::Fixed;
        sizer.min_position_size = 5.0;
        assert_eq!(sizer.calculate_position_size(50.0, 100_000.0, None, None), 5.0);
    }

    #[test]
    fn test_max_positions_rejects_new_symbol() {
        let mut sizer = sizer();
        sizer.max_positions = Some(1);

        let portfolio = portfolio_with_position("OTHER", 10.0, 100.0);
        let order = sizer.build_order(&signal(Side::Buy), 100.0, &portfolio, None);
        assert!(order.is_none());
    }

    #[test]
    fn test_max_positions_allows_existing_symbol() {
        let mut sizer = sizer();
        sizer.max_positions = Some(1);

        let portfolio = portfolio_with_position("SYM", 10.0, 100.0);
        let order = sizer.build_order(&signal(Side::Buy), 100.0, &portfolio, None);
        assert!(order.is_some());
    }

    #[test]
    fn test_notional_cap_clips() {
        let sizer = sizer();
        let portfolio = Portfolio::new(100_000.0, false, false);

        // Explicit size of 1000 @ 100 = 100k notional, cap is 20k -> 200
        let sig = signal(Side::Buy).with_size(1000.0);
        let order = sizer.build_order(&sig, 100.0, &portfolio, None).unwrap();
        assert_eq!(order.quantity, 200.0);
    }

    #[test]
    fn test_leverage_cap_counts_other_positions() {
        let mut sizer = sizer();
        sizer.max_position_pct = 1.0;
        sizer.max_portfolio_leverage = 1.0;
        sizer.max_positions = None;

        // Existing 20k exposure in OTHER leaves less room for SYM
        let portfolio = portfolio_with_position("OTHER", 200.0, 100.0);
        let equity = portfolio.total_equity();
        let sig = signal(Side::Buy).with_size(10_000.0);
        let order = sizer.build_order(&sig, 100.0, &portfolio, None).unwrap();

        let max_qty = ((equity * 1.0 - 20_000.0) / 100.0).floor();
        assert_eq!(order.quantity, max_qty);
    }

    #[test]
    fn test_zero_size_is_rejection() {
        let mut sizer = sizer();
        sizer.max_position_pct = 1.0;
        sizer.max_portfolio_leverage = 1.0;
        sizer.max_positions = None;

        // 60k exposure against 40k equity: leverage budget already spent
        let portfolio = portfolio_with_position("OTHER", 600.0, 100.0);
        let order = sizer.build_order(&signal(Side::Buy), 100.0, &portfolio, None);
        assert!(order.is_none());
    }

    #[test]
    fn test_limit_signal_becomes_limit_order() {
        let sizer = sizer();
        let portfolio = Portfolio::new(100_000.0, false, false);

        let sig = signal(Side::Buy).with_limit_price(95.0).with_size(10.0);
        let order = sizer.build_order(&sig, 100.0, &portfolio, None).unwrap();
        assert_eq!(order.limit_price, Some(95.0));
    }

    #[test]
    fn test_stop_loss_derivations() {
        assert_eq!(
            RiskSizer::stop_loss_price(100.0, Side::Buy, Some(0.02), None, 2.0),
            Some(98.0)
        );
        assert_eq!(
            RiskSizer::stop_loss_price(100.0, Side::Sell, Some(0.02), None, 2.0),
            Some(102.0)
        );
        assert_eq!(
            RiskSizer::stop_loss_price(100.0, Side::Buy, None, Some(1.5), 2.0),
            Some(97.0)
        );
        assert_eq!(RiskSizer::stop_loss_price(100.0, Side::Buy, None, None, 2.0), None);
    }

    #[test]
    fn test_take_profit_derivations() {
        assert_eq!(
            RiskSizer::take_profit_price(100.0, Side::Buy, Some(0.05), None, None),
            Some(105.0)
        );
        // R:R 2.0 with stop at 98: reward = 4
        assert_eq!(
            RiskSizer::take_profit_price(100.0, Side::Buy, None, Some(2.0), Some(98.0)),
            Some(104.0)
        );
        assert_eq!(
            RiskSizer::take_profit_price(100.0, Side::Sell, None, Some(2.0), Some(102.0)),
            Some(96.0)
        );
    }

    #[test]
    fn test_sizing_method_parse() {
        assert_eq!("fraction".parse::<SizingMethod>().unwrap(), SizingMethod::Fraction);
        assert_eq!("VOLATILITY".parse::<SizingMethod>().unwrap(), SizingMethod::Volatility);
        assert!("martingale".parse::<SizingMethod>().is_err());
    }
}
