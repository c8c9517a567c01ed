//! Order lifecycle management: submission, cancellation, per-bar matching
//!
//! Active orders live in `active`; once an order reaches a terminal state it
//! moves to `completed` and never mutates again. Matching within a bar is
//! deterministic: orders are visited in ascending (submitted timestamp,
//! order id), so multi-order bars replay identically.

use crate::oms::execution::ExecutionModel;
use crate::oms::types::{Fill, Order, OrderId, OrderStatus, OrderType};
use crate::{Bar, Side, Signal, Symbol};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Parameters for a new order submission
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub parent_signal_id: Option<String>,
    pub reason: Option<String>,
}

impl OrderRequest {
    pub fn market(symbol: Symbol, side: Side, quantity: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol,
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            stop_price: None,
            stop_loss: None,
            take_profit: None,
            timestamp,
            parent_signal_id: None,
            reason: None,
        }
    }

    pub fn limit(
        symbol: Symbol,
        side: Side,
        quantity: f64,
        limit_price: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            limit_price: Some(limit_price),
            order_type: OrderType::Limit,
            ..Self::market(symbol, side, quantity, timestamp)
        }
    }

    pub fn stop(
        symbol: Symbol,
        side: Side,
        quantity: f64,
        stop_price: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            stop_price: Some(stop_price),
            order_type: OrderType::Stop,
            ..Self::market(symbol, side, quantity, timestamp)
        }
    }

    /// Build a request from an admitted signal with the sized quantity
    ///
    /// A signal carrying a limit price becomes a limit order; otherwise a
    /// market order.
    pub fn from_signal(signal: &Signal, quantity: f64) -> Self {
        let (order_type, limit_price) = match signal.limit_price {
            Some(price) => (OrderType::Limit, Some(price)),
            None => (OrderType::Market, None),
        };

        Self {
            symbol: signal.symbol.clone(),
            side: signal.side,
            order_type,
            quantity,
            limit_price,
            stop_price: None,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            timestamp: signal.timestamp,
            parent_signal_id: Some(signal.signal_id.clone()),
            reason: signal.reason.clone(),
        }
    }

    pub fn with_stop_loss(mut self, stop_loss: f64) -> Self {
        self.stop_loss = Some(stop_loss);
        self
    }

    pub fn with_take_profit(mut self, take_profit: f64) -> Self {
        self.take_profit = Some(take_profit);
        self
    }
}

/// Order book: lifecycle store and per-bar matcher
pub struct OrderBook {
    execution: ExecutionModel,

    active: HashMap<OrderId, Order>,
    completed: HashMap<OrderId, Order>,
    /// All order ids in submission order
    order_ids: Vec<OrderId>,

    /// Archive of applied fills, in application order
    fills: Vec<Fill>,
    /// order_id -> next fill sequence number
    fill_sequences: HashMap<OrderId, u64>,

    next_order_seq: u64,
}

impl OrderBook {
    pub fn new(execution: ExecutionModel) -> Self {
        Self {
            execution,
            active: HashMap::new(),
            completed: HashMap::new(),
            order_ids: Vec::new(),
            fills: Vec::new(),
            fill_sequences: HashMap::new(),
            next_order_seq: 0,
        }
    }

    pub fn execution_model(&self) -> &ExecutionModel {
        &self.execution
    }

    /// Submit a new order; infallible after risk-sizer validation
    ///
    /// Ids embed a monotonic per-book sequence, so they are unique within a
    /// run and identical runs produce identical ids. The timestamp portion
    /// is for readability only.
    pub fn submit(&mut self, request: OrderRequest) -> OrderId {
        self.next_order_seq += 1;
        let order_id = format!(
            "{}-{}-{}-{}",
            request.symbol,
            request.timestamp.format("%Y%m%d-%H%M%S%3f"),
            request.side.tag(),
            self.next_order_seq
        );
        debug_assert!(
            !self.active.contains_key(&order_id) && !self.completed.contains_key(&order_id),
            "duplicate order id {}",
            order_id
        );

        let order = Order {
            order_id: order_id.clone(),
            timestamp: request.timestamp,
            symbol: request.symbol,
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            status: OrderStatus::Submitted,
            limit_price: request.limit_price,
            stop_price: request.stop_price,
            filled_quantity: 0.0,
            avg_fill_price: 0.0,
            stop_loss: request.stop_loss,
            take_profit: request.take_profit,
            parent_signal_id: request.parent_signal_id,
            reason: request.reason,
            submitted_at: Some(request.timestamp),
            filled_at: None,
        };

        info!(
            "order submitted: {} - {} {} {} {:?} @ {}",
            order_id,
            order.symbol,
            order.side,
            order.quantity,
            order.order_type,
            order
                .limit_price
                .or(order.stop_price)
                .map(|p| p.to_string())
                .unwrap_or_else(|| "MARKET".to_string())
        );

        self.order_ids.push(order_id.clone());
        self.fill_sequences.insert(order_id.clone(), 0);
        self.active.insert(order_id.clone(), order);

        order_id
    }

    /// Cancel an active order; false on unknown id or terminal state
    pub fn cancel(&mut self, order_id: &str) -> bool {
        let Some(order) = self.active.get_mut(order_id) else {
            warn!("cannot cancel order {}: not active", order_id);
            return false;
        };

        order.status = OrderStatus::Cancelled;
        let order = self.active.remove(order_id).expect("order present");
        info!("order cancelled: {}", order_id);
        self.completed.insert(order_id.to_string(), order);

        true
    }

    /// Match all active orders against a bar
    ///
    /// Returned fills are not yet archived: the engine applies them to the
    /// portfolio (which writes realized P&L into each fill) and hands them
    /// back through [`record_fill`](Self::record_fill).
    pub fn process_bar(&mut self, bar: &Bar) -> Vec<Fill> {
        let mut order_ids: Vec<OrderId> = self.active.keys().cloned().collect();
        order_ids.sort_by(|a, b| {
            let oa = &self.active[a];
            let ob = &self.active[b];
            oa.submitted_at
                .cmp(&ob.submitted_at)
                .then_with(|| a.cmp(b))
        });

        let mut fills = Vec::new();
        let mut newly_complete = Vec::new();

        for order_id in order_ids {
            let order = self.active.get_mut(&order_id).expect("active order");

            if order.symbol != bar.symbol {
                continue;
            }

            let sequence = self.fill_sequences.get(&order_id).copied().unwrap_or(0);
            let Some(fill) = self.execution.try_fill(order, bar, sequence) else {
                continue;
            };

            apply_fill_to_order(order, &fill);
            self.fill_sequences.insert(order_id.clone(), sequence + 1);

            if order.is_complete() {
                newly_complete.push(order_id.clone());
            }

            fills.push(fill);
        }

        for order_id in newly_complete {
            if let Some(order) = self.active.remove(&order_id) {
                self.completed.insert(order_id, order);
            }
        }

        fills
    }

    /// Archive an applied fill (realized P&L already set by the portfolio)
    pub fn record_fill(&mut self, fill: Fill) {
        self.fills.push(fill);
    }

    pub fn get(&self, order_id: &str) -> Option<&Order> {
        self.active
            .get(order_id)
            .or_else(|| self.completed.get(order_id))
    }

    /// Active orders in submission order, optionally filtered by symbol
    pub fn active_orders(&self, symbol: Option<&Symbol>) -> Vec<&Order> {
        self.order_ids
            .iter()
            .filter_map(|id| self.active.get(id))
            .filter(|o| symbol.map_or(true, |s| &o.symbol == s))
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    /// Fills filtered by symbol and/or inclusive time range
    pub fn get_fills(
        &self,
        symbol: Option<&Symbol>,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Vec<&Fill> {
        self.fills
            .iter()
            .filter(|f| symbol.map_or(true, |s| &f.symbol == s))
            .filter(|f| {
                range.map_or(true, |(start, end)| {
                    f.timestamp >= start && f.timestamp <= end
                })
            })
            .collect()
    }

    pub fn into_fills(self) -> Vec<Fill> {
        self.fills
    }
}

/// Update order state with a fill: quantities, weighted average price, status
fn apply_fill_to_order(order: &mut Order, fill: &Fill) {
    let prev_value = order.avg_fill_price * order.filled_quantity;
    order.filled_quantity += fill.quantity;

    if order.filled_quantity > 0.0 {
        order.avg_fill_price = (prev_value + fill.price * fill.quantity) / order.filled_quantity;
    } else {
        order.avg_fill_price = fill.price;
    }

    if order.filled_quantity >= order.quantity {
        order.status = OrderStatus::Filled;
        order.filled_at = Some(fill.timestamp);
    } else {
        order.status = OrderStatus::Partial;
    }

    debug!(
        "fill applied to order {}: {}/{} @ {:.4}",
        order.order_id, order.filled_quantity, order.quantity, order.avg_fill_price
    );
}
