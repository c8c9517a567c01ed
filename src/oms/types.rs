//! Order, fill, position, and snapshot types
//!
//! The order lifecycle is a closed state machine: non-terminal orders live
//! in the book's active set, terminal orders ({Filled, Cancelled, Rejected})
//! move to the completed set and never change again.

use crate::{Side, Symbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Order id, unique within a run
pub type OrderId = String;

/// Order type - determines execution logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Execute against the current bar (open under first-touch, else close)
    Market,

    /// Buy limit fills when bar.low <= limit, sell limit when bar.high >= limit
    Limit,

    /// Converts to market once the stop price trades
    Stop,

    /// Converts to a limit order once the stop price trades
    StopLimit,
}

/// Order lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Partial,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    Long,
    Flat,
    Short,
}

/// Order with lifecycle tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    pub status: OrderStatus,

    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,

    pub filled_quantity: f64,
    pub avg_fill_price: f64,

    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,

    pub parent_signal_id: Option<String>,
    pub reason: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn remaining_quantity(&self) -> f64 {
        self.quantity - self.filled_quantity
    }

    /// Order can still be matched against a bar
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Pending | OrderStatus::Submitted | OrderStatus::Partial
        )
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Execution fill record
///
/// `realized_pnl` is written by the portfolio when the fill is applied;
/// the execution model always produces it as zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: String,
    pub order_id: OrderId,
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub commission: f64,
    pub slippage_bps: f64,
    /// Price before slippage and tick rounding
    pub execution_price: f64,
    pub realized_pnl: f64,
    pub reason: Option<String>,
}

impl Fill {
    /// Total value excluding commission
    pub fn gross_value(&self) -> f64 {
        self.quantity * self.price
    }

    /// Total value including commission
    pub fn net_value(&self) -> f64 {
        self.gross_value() + self.commission
    }
}

/// Net position in a symbol
///
/// Sign convention: quantity > 0 long, < 0 short, 0 flat. When flat the
/// average entry price is zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub quantity: f64,
    pub avg_entry_price: f64,

    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub total_commission: f64,

    pub opened_at: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Position {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            quantity: 0.0,
            avg_entry_price: 0.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            total_commission: 0.0,
            opened_at: None,
            last_updated: None,
        }
    }

    pub fn side(&self) -> PositionSide {
        if self.quantity > 0.0 {
            PositionSide::Long
        } else if self.quantity < 0.0 {
            PositionSide::Short
        } else {
            PositionSide::Flat
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0.0
    }

    /// Cost basis of the holding; informational, not an equity component
    pub fn market_value(&self) -> f64 {
        self.quantity.abs() * self.avg_entry_price
    }

    pub fn update_unrealized_pnl(&mut self, current_price: f64) {
        if self.quantity != 0.0 {
            self.unrealized_pnl = (current_price - self.avg_entry_price) * self.quantity;
        } else {
            self.unrealized_pnl = 0.0;
        }
    }
}

/// Portfolio state observed after a bar
///
/// Snapshots are immutable once appended: the positions map is a deep copy
/// so later mutation of the live portfolio cannot rewrite history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cash: f64,
    pub positions: HashMap<Symbol, Position>,

    /// cash + unrealized P&L; the canonical equity identity
    pub total_equity: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,

    pub daily_pnl: f64,
    pub daily_return: f64,

    pub total_commission: f64,
    pub num_trades: usize,

    pub initial_cash: f64,
    pub previous_day_equity: f64,
}

impl PortfolioSnapshot {
    pub fn equity(&self) -> f64 {
        self.total_equity
    }

    /// Sum of position cost bases; informational only (see equity identity)
    pub fn positions_value(&self) -> f64 {
        self.positions.values().map(|p| p.market_value()).sum()
    }

    pub fn leverage(&self) -> f64 {
        if self.total_equity <= 0.0 {
            return 0.0;
        }
        self.positions_value() / self.total_equity
    }

    pub fn get_position(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_order_status_terminal_set() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Submitted.is_terminal());
        assert!(!OrderStatus::Partial.is_terminal());
    }

    #[test]
    fn test_position_side() {
        let mut pos = Position::new(Symbol::new("SYM"));
        assert_eq!(pos.side(), PositionSide::Flat);

        pos.quantity = 10.0;
        assert_eq!(pos.side(), PositionSide::Long);

        pos.quantity = -5.0;
        assert_eq!(pos.side(), PositionSide::Short);
    }

    #[test]
    fn test_position_unrealized_pnl_sign() {
        let mut pos = Position::new(Symbol::new("SYM"));
        pos.quantity = 10.0;
        pos.avg_entry_price = 100.0;

        pos.update_unrealized_pnl(105.0);
        assert_eq!(pos.unrealized_pnl, 50.0);

        pos.quantity = -10.0;
        pos.update_unrealized_pnl(105.0);
        assert_eq!(pos.unrealized_pnl, -50.0);
    }

    #[test]
    fn test_fill_values() {
        let fill = Fill {
            fill_id: "SYM-1-F0".to_string(),
            order_id: "SYM-1".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap(),
            symbol: Symbol::new("SYM"),
            side: Side::Buy,
            quantity: 10.0,
            price: 100.0,
            commission: 2.0,
            slippage_bps: 0.0,
            execution_price: 100.0,
            realized_pnl: 0.0,
            reason: None,
        };
        assert_eq!(fill.gross_value(), 1000.0);
        assert_eq!(fill.net_value(), 1002.0);
    }
}
