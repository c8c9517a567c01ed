//! Execution model: intrabar first-touch fill simulation
//!
//! Pure functions from (order, bar) to an optional fill. Slippage and
//! commission are basis-point models; executed prices are rounded to the
//! instrument tick with half-away-from-zero rounding so results are
//! identical across platforms.

use crate::oms::types::{Fill, Order, OrderType, PositionSide};
use crate::{Bar, Side};
use tracing::debug;

/// Outcome of a TP/SL tie check for one bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TpSlResolution {
    StopLoss(f64),
    TakeProfit(f64),
    None,
}

impl TpSlResolution {
    pub fn label(self) -> &'static str {
        match self {
            TpSlResolution::StopLoss(_) => "SL",
            TpSlResolution::TakeProfit(_) => "TP",
            TpSlResolution::None => "NONE",
        }
    }
}

/// Simulates order execution against OHLC bars
#[derive(Debug, Clone)]
pub struct ExecutionModel {
    pub slippage_bps: f64,
    pub commission_bps: f64,
    pub tick_size: f64,
    pub use_first_touch: bool,
}

impl ExecutionModel {
    pub fn new(slippage_bps: f64, commission_bps: f64, tick_size: f64, use_first_touch: bool) -> Self {
        Self {
            slippage_bps,
            commission_bps,
            tick_size,
            use_first_touch,
        }
    }

    /// Try to fill an order against a bar
    ///
    /// At most one fill per order per bar, always for the full remaining
    /// quantity (no partial fills under the current policy). Returns None
    /// when the order does not match; never errors.
    pub fn try_fill(&self, order: &Order, bar: &Bar, fill_sequence: u64) -> Option<Fill> {
        if !order.is_active() {
            return None;
        }

        if order.symbol != bar.symbol {
            return None;
        }

        let execution_price = self.execution_price(order, bar)?;

        let fill_price = apply_slippage(execution_price, self.slippage_bps, order.side);
        let fill_price = round_to_tick(fill_price, self.tick_size);

        let fill_quantity = order.remaining_quantity();
        let commission = commission(fill_quantity, fill_price, self.commission_bps);

        let fill = Fill {
            fill_id: format!("{}-F{}", order.order_id, fill_sequence),
            order_id: order.order_id.clone(),
            timestamp: bar.timestamp,
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: fill_quantity,
            price: fill_price,
            commission,
            slippage_bps: self.slippage_bps,
            execution_price,
            realized_pnl: 0.0,
            reason: order.reason.clone(),
        };

        debug!(
            "fill generated: {} {} {} {}@{:.4} (exec={:.4})",
            fill.fill_id, order.symbol, order.side, fill_quantity, fill_price, execution_price
        );

        Some(fill)
    }

    fn execution_price(&self, order: &Order, bar: &Bar) -> Option<f64> {
        match order.order_type {
            OrderType::Market => Some(self.market_order_price(bar)),
            OrderType::Limit => self.limit_order_price(order.side, order.limit_price?, bar),
            OrderType::Stop => stop_order_price(order.side, order.stop_price?, bar),
            OrderType::StopLimit => {
                // Stop trigger first, then the limit rule; both in the same bar
                let stop_price = order.stop_price?;
                let triggered = match order.side {
                    Side::Buy => bar.high >= stop_price,
                    Side::Sell => bar.low <= stop_price,
                };
                if !triggered {
                    return None;
                }
                self.limit_order_price(order.side, order.limit_price?, bar)
            }
        }
    }

    fn market_order_price(&self, bar: &Bar) -> f64 {
        if self.use_first_touch {
            bar.open
        } else {
            bar.close
        }
    }

    fn limit_order_price(&self, side: Side, limit_price: f64, bar: &Bar) -> Option<f64> {
        match side {
            Side::Buy => {
                // Needs the bar to trade down to the limit or through it
                if bar.low > limit_price {
                    return None;
                }
                if self.use_first_touch {
                    // Gap below the limit at the open fills at the open
                    if bar.open <= limit_price {
                        Some(bar.open)
                    } else {
                        Some(limit_price)
                    }
                } else if bar.close <= limit_price {
                    Some(bar.close)
                } else {
                    None
                }
            }
            Side::Sell => {
                if bar.high < limit_price {
                    return None;
                }
                if self.use_first_touch {
                    if bar.open >= limit_price {
                        Some(bar.open)
                    } else {
                        Some(limit_price)
                    }
                } else if bar.close >= limit_price {
                    Some(bar.close)
                } else {
                    None
                }
            }
        }
    }

    /// Stop-loss hit test for an open position
    ///
    /// Returns the execution price when the bar trades through the stop.
    /// Longs stop below (fills at min(SL, open) to model a gap down),
    /// shorts stop above.
    pub fn check_stop_loss(&self, position_side: PositionSide, stop_loss: f64, bar: &Bar) -> Option<f64> {
        match position_side {
            PositionSide::Long => {
                if bar.low <= stop_loss {
                    Some(stop_loss.min(bar.open))
                } else {
                    None
                }
            }
            PositionSide::Short => {
                if bar.high >= stop_loss {
                    Some(stop_loss.max(bar.open))
                } else {
                    None
                }
            }
            PositionSide::Flat => None,
        }
    }

    /// Take-profit hit test for an open position (mirror of the stop test)
    pub fn check_take_profit(
        &self,
        position_side: PositionSide,
        take_profit: f64,
        bar: &Bar,
    ) -> Option<f64> {
        match position_side {
            PositionSide::Long => {
                if bar.high >= take_profit {
                    Some(take_profit.max(bar.open))
                } else {
                    None
                }
            }
            PositionSide::Short => {
                if bar.low <= take_profit {
                    Some(take_profit.min(bar.open))
                } else {
                    None
                }
            }
            PositionSide::Flat => None,
        }
    }

    /// Resolve the case where both TP and SL trade inside one bar
    ///
    /// Heuristic: bar direction decides which level was touched first. A
    /// bullish bar (close > open) is assumed to have hit a long's TP before
    /// its SL; a bearish or flat bar assumes the SL. Shorts are mirrored.
    /// Callers may override the resolution; it is a heuristic, not an error.
    pub fn resolve_tp_sl_tie(
        &self,
        position_side: PositionSide,
        stop_loss: f64,
        take_profit: f64,
        bar: &Bar,
    ) -> TpSlResolution {
        let sl_price = self.check_stop_loss(position_side, stop_loss, bar);
        let tp_price = self.check_take_profit(position_side, take_profit, bar);

        match (sl_price, tp_price) {
            (Some(sl), Some(tp)) => {
                let tp_first = match position_side {
                    PositionSide::Long => bar.is_bullish(),
                    PositionSide::Short => !bar.is_bullish(),
                    PositionSide::Flat => false,
                };
                if tp_first {
                    TpSlResolution::TakeProfit(tp)
                } else {
                    TpSlResolution::StopLoss(sl)
                }
            }
            (Some(sl), None) => TpSlResolution::StopLoss(sl),
            (None, Some(tp)) => TpSlResolution::TakeProfit(tp),
            (None, None) => TpSlResolution::None,
        }
    }
}

impl Default for ExecutionModel {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.05, true)
    }
}

/// Adverse price adjustment in basis points, signed by side
pub fn apply_slippage(price: f64, slippage_bps: f64, side: Side) -> f64 {
    match side {
        Side::Buy => price * (1.0 + slippage_bps / 10_000.0),
        Side::Sell => price * (1.0 - slippage_bps / 10_000.0),
    }
}

/// Round to the nearest tick, half away from zero
///
/// f64::round already rounds half away from zero, which keeps results
/// deterministic across platforms (banker's rounding is not acceptable
/// here).
pub fn round_to_tick(price: f64, tick_size: f64) -> f64 {
    if tick_size <= 0.0 {
        return price;
    }
    (price / tick_size).round() * tick_size
}

/// Commission in basis points of traded notional; never negative
pub fn commission(quantity: f64, price: f64, commission_bps: f64) -> f64 {
    (quantity.abs() * price * commission_bps / 10_000.0).abs()
}

fn stop_order_price(side: Side, stop_price: f64, bar: &Bar) -> Option<f64> {
    match side {
        Side::Buy => {
            // Triggers when price rises to the stop; a gap up fills at the open
            if bar.high >= stop_price {
                Some(stop_price.max(bar.open))
            } else {
                None
            }
        }
        Side::Sell => {
            if bar.low <= stop_price {
                Some(stop_price.min(bar.open))
            } else {
                None
            }
        }
    }
}
