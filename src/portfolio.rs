//! Portfolio ledger: positions, cash, realized/unrealized P&L, day bookkeeping
//!
//! Equity identity enforced throughout: `total_equity = cash + unrealized`.
//! Each position's cost-of-goods-held is embedded in reduced cash, and the
//! mark-to-market delta appears as unrealized P&L. Nothing else may be
//! summed into equity.

use crate::oms::types::{Fill, PortfolioSnapshot, Position};
use crate::{Bar, Side, Symbol};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Tracks positions, cash, and P&L with daywise support
pub struct Portfolio {
    pub initial_cash: f64,
    pub cash: f64,
    track_daily_pnl: bool,
    square_off_eod: bool,

    positions: HashMap<Symbol, Position>,

    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub total_commission: f64,
    pub num_trades: usize,

    current_day: Option<NaiveDate>,
    daily_pnl: f64,
    daily_starting_equity: f64,
    previous_day_equity: f64,

    daily_pnl_history: BTreeMap<NaiveDate, f64>,
    daily_return_history: BTreeMap<NaiveDate, f64>,

    snapshots: Vec<PortfolioSnapshot>,

    /// Last seen mark price per symbol
    marks: HashMap<Symbol, f64>,

    /// Synthetic fills emitted by EOD square-offs, drained by the engine
    eod_fills: Vec<Fill>,
    eod_fill_seq: u64,
}

impl Portfolio {
    pub fn new(initial_cash: f64, track_daily_pnl: bool, square_off_eod: bool) -> Self {
        info!("portfolio initialized with {:.2}", initial_cash);
        Self {
            initial_cash,
            cash: initial_cash,
            track_daily_pnl,
            square_off_eod,
            positions: HashMap::new(),
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            total_commission: 0.0,
            num_trades: 0,
            current_day: None,
            daily_pnl: 0.0,
            daily_starting_equity: initial_cash,
            previous_day_equity: initial_cash,
            daily_pnl_history: BTreeMap::new(),
            daily_return_history: BTreeMap::new(),
            snapshots: Vec::new(),
            marks: HashMap::new(),
            eod_fills: Vec::new(),
            eod_fill_seq: 0,
        }
    }

    /// Apply a fill: positions, cash, P&L accumulators. Atomic per fill.
    ///
    /// Realized P&L is computed only for the portion that reduces or closes
    /// existing exposure, and is written back into the fill so the fill
    /// stream carries the complete audit trail.
    pub fn apply_fill(&mut self, fill: &mut Fill, current_price: Option<f64>) {
        let symbol = fill.symbol.clone();

        let mark = current_price.unwrap_or(fill.price);
        self.marks.insert(symbol.clone(), mark);

        if self.track_daily_pnl {
            self.check_new_day(fill.timestamp);
        }

        let position = self
            .positions
            .entry(symbol.clone())
            .or_insert_with(|| {
                let mut p = Position::new(symbol.clone());
                p.opened_at = Some(fill.timestamp);
                p.last_updated = Some(fill.timestamp);
                p
            });

        // Realized P&L only for the closing portion
        let mut fill_realized_pnl = 0.0;
        if position.quantity != 0.0 {
            let is_closing = (position.quantity > 0.0 && fill.side == Side::Sell)
                || (position.quantity < 0.0 && fill.side == Side::Buy);

            if is_closing {
                let close_quantity = fill.quantity.abs().min(position.quantity.abs());
                let signed_close = if position.quantity > 0.0 {
                    close_quantity
                } else {
                    -close_quantity
                };
                fill_realized_pnl = (fill.price - position.avg_entry_price) * signed_close;

                debug!(
                    "closing {} of {} position: entry={:.4}, exit={:.4}, pnl={:.2}",
                    close_quantity, symbol, position.avg_entry_price, fill.price, fill_realized_pnl
                );
            }
        }

        position.realized_pnl += fill_realized_pnl;
        update_position(position, fill);

        // Commission is always a debit, on both sides
        match fill.side {
            Side::Buy => self.cash -= fill.gross_value() + fill.commission,
            Side::Sell => self.cash += fill.gross_value() - fill.commission,
        }

        self.realized_pnl += fill_realized_pnl;
        self.total_commission += fill.commission;
        self.num_trades += 1;

        if self.track_daily_pnl {
            self.daily_pnl += fill_realized_pnl - fill.commission;
        }

        fill.realized_pnl = fill_realized_pnl;

        info!(
            "fill applied: {} {} {}@{:.4} (commission={:.2}, realized_pnl={:.2})",
            symbol, fill.side, fill.quantity, fill.price, fill.commission, fill_realized_pnl
        );
    }

    /// Refresh marks and recompute unrealized P&L across positions
    pub fn update_market_prices(&mut self, prices: &HashMap<Symbol, f64>) {
        for (symbol, price) in prices {
            self.marks.insert(symbol.clone(), *price);
        }

        self.unrealized_pnl = 0.0;
        for (symbol, position) in &mut self.positions {
            if position.quantity != 0.0 {
                if let Some(&price) = self.marks.get(symbol) {
                    position.update_unrealized_pnl(price);
                    self.unrealized_pnl += position.unrealized_pnl;
                }
            }
        }
    }

    /// Mark to market from a bar close
    pub fn update_from_bar(&mut self, bar: &Bar) {
        self.marks.insert(bar.symbol.clone(), bar.close);

        if let Some(position) = self.positions.get_mut(&bar.symbol) {
            if position.quantity != 0.0 {
                position.update_unrealized_pnl(bar.close);
            }
        }

        self.unrealized_pnl = self
            .positions
            .values()
            .filter(|p| p.quantity != 0.0)
            .map(|p| p.unrealized_pnl)
            .sum();
    }

    /// Append an immutable snapshot of the current state
    pub fn create_snapshot(&mut self, timestamp: DateTime<Utc>) -> PortfolioSnapshot {
        let total_equity = self.total_equity();

        let daily_return = if self.previous_day_equity > 0.0 {
            (total_equity - self.previous_day_equity) / self.previous_day_equity
        } else {
            0.0
        };

        let snapshot = PortfolioSnapshot {
            timestamp,
            cash: self.cash,
            // Deep copy: the snapshot must stay stable against future mutation
            positions: self.positions.clone(),
            total_equity,
            realized_pnl: self.realized_pnl,
            unrealized_pnl: self.unrealized_pnl,
            daily_pnl: self.daily_pnl,
            daily_return,
            total_commission: self.total_commission,
            num_trades: self.num_trades,
            initial_cash: self.initial_cash,
            previous_day_equity: self.previous_day_equity,
        };

        self.snapshots.push(snapshot.clone());
        snapshot
    }

    /// Detect a date change and roll the day if needed
    ///
    /// Called by the engine on bar-date transitions and internally before
    /// every fill, so a fill landing on a new date always rolls first.
    pub fn check_new_day(&mut self, timestamp: DateTime<Utc>) {
        let date = timestamp.date_naive();

        let Some(current) = self.current_day else {
            self.current_day = Some(date);
            self.daily_starting_equity = self.total_equity();
            return;
        };

        if date == current {
            return;
        }

        self.close_day(timestamp);
        self.current_day = Some(date);
    }

    /// Freeze the current day's record and reset daily state
    ///
    /// Records daily P&L and return, squares off open positions when
    /// configured, and rolls previous/starting equity forward.
    fn close_day(&mut self, timestamp: DateTime<Utc>) {
        let Some(day) = self.current_day else {
            return;
        };

        // Square off first so its realized P&L lands in this day's record
        if self.square_off_eod {
            self.square_off_all_positions(timestamp);
        }

        self.daily_pnl_history.insert(day, self.daily_pnl);

        let daily_return = if self.daily_starting_equity > 0.0 {
            self.daily_pnl / self.daily_starting_equity
        } else {
            0.0
        };
        self.daily_return_history.insert(day, daily_return);

        let end_of_day_equity = self.total_equity();

        info!(
            "day end {}: pnl={:.2}, return={:.2}%, equity={:.2}",
            day,
            self.daily_pnl,
            daily_return * 100.0,
            end_of_day_equity
        );

        self.previous_day_equity = end_of_day_equity;
        self.daily_starting_equity = end_of_day_equity;
        self.daily_pnl = 0.0;
    }

    /// Finalize the last day at stream end (no new day begins)
    pub fn finalize_day(&mut self, timestamp: DateTime<Utc>) {
        self.close_day(timestamp);
        self.current_day = None;
    }

    /// Close every open position synthetically at its last mark
    ///
    /// No commission is charged and `num_trades` is untouched, but a
    /// synthetic fill record is emitted per close so the fill stream stays
    /// a complete audit trail.
    fn square_off_all_positions(&mut self, timestamp: DateTime<Utc>) {
        let symbols: Vec<Symbol> = self
            .positions
            .iter()
            .filter(|(_, p)| p.quantity != 0.0)
            .map(|(s, _)| s.clone())
            .collect();

        if symbols.is_empty() {
            return;
        }

        info!("squaring off {} positions at {}", symbols.len(), timestamp);

        for symbol in symbols {
            let position = self.positions.get_mut(&symbol).expect("position present");
            let quantity = position.quantity;
            let close_price = self
                .marks
                .get(&symbol)
                .copied()
                .unwrap_or(position.avg_entry_price);
            let close_side = if quantity > 0.0 { Side::Sell } else { Side::Buy };

            let realized = (close_price - position.avg_entry_price) * quantity;

            self.realized_pnl += realized;
            self.daily_pnl += realized;

            if quantity > 0.0 {
                self.cash += quantity.abs() * close_price;
            } else {
                self.cash -= quantity.abs() * close_price;
            }

            info!(
                "EOD square-off: {} {}@{:.4} (entry={:.4}, pnl={:.2})",
                symbol,
                quantity.abs(),
                close_price,
                position.avg_entry_price,
                realized
            );

            position.quantity = 0.0;
            position.avg_entry_price = 0.0;
            position.unrealized_pnl = 0.0;
            position.realized_pnl += realized;
            position.last_updated = Some(timestamp);

            self.eod_fill_seq += 1;
            let date = timestamp.date_naive();
            self.eod_fills.push(Fill {
                fill_id: format!("EOD-{}-{}-F{}", date, symbol, self.eod_fill_seq),
                order_id: format!("EOD-{}-{}", date, symbol),
                timestamp,
                symbol: symbol.clone(),
                side: close_side,
                quantity: quantity.abs(),
                price: close_price,
                commission: 0.0,
                slippage_bps: 0.0,
                execution_price: close_price,
                realized_pnl: realized,
                reason: Some("EOD square-off".to_string()),
            });
        }

        self.unrealized_pnl = 0.0;
    }

    /// Synthetic EOD fills accumulated since the last drain
    pub fn drain_eod_fills(&mut self) -> Vec<Fill> {
        std::mem::take(&mut self.eod_fills)
    }

    pub fn total_equity(&self) -> f64 {
        self.cash + self.unrealized_pnl
    }

    pub fn get_position(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn positions(&self) -> &HashMap<Symbol, Position> {
        &self.positions
    }

    pub fn mark_price(&self, symbol: &Symbol) -> Option<f64> {
        self.marks.get(symbol).copied()
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.values().filter(|p| p.quantity != 0.0).count()
    }

    pub fn snapshots(&self) -> &[PortfolioSnapshot] {
        &self.snapshots
    }

    pub fn into_snapshots(self) -> Vec<PortfolioSnapshot> {
        self.snapshots
    }

    pub fn daily_pnl_history(&self) -> &BTreeMap<NaiveDate, f64> {
        &self.daily_pnl_history
    }

    pub fn daily_return_history(&self) -> &BTreeMap<NaiveDate, f64> {
        &self.daily_return_history
    }

    pub fn equity_curve(&self) -> Vec<(DateTime<Utc>, f64)> {
        self.snapshots
            .iter()
            .map(|s| (s.timestamp, s.total_equity))
            .collect()
    }
}

/// Update a position with a fill: signed quantity plus the four-case
/// average-entry rule (close, add same side, reduce, flip)
fn update_position(position: &mut Position, fill: &Fill) {
    let old_quantity = position.quantity;

    let new_quantity = match fill.side {
        Side::Buy => old_quantity + fill.quantity,
        Side::Sell => old_quantity - fill.quantity,
    };

    if new_quantity == 0.0 {
        position.quantity = 0.0;
        position.avg_entry_price = 0.0;
    } else if (old_quantity > 0.0 && new_quantity > 0.0 && new_quantity.abs() > old_quantity.abs())
        || (old_quantity < 0.0 && new_quantity < 0.0 && new_quantity.abs() > old_quantity.abs())
        || old_quantity == 0.0
    {
        // Opening or adding same-side: weighted average entry
        let old_value = old_quantity.abs() * position.avg_entry_price;
        let new_value = fill.quantity * fill.price;
        position.avg_entry_price = (old_value + new_value) / new_quantity.abs();
        position.quantity = new_quantity;
        if old_quantity == 0.0 {
            position.opened_at = Some(fill.timestamp);
        }
    } else if new_quantity.abs() < old_quantity.abs() && old_quantity * new_quantity > 0.0 {
        // Partial close keeps the entry price
        position.quantity = new_quantity;
    } else {
        // Direction flipped: the fill price is the new basis
        position.quantity = new_quantity;
        position.avg_entry_price = fill.price;
        position.opened_at = Some(fill.timestamp);
    }

    position.last_updated = Some(fill.timestamp);
    position.total_commission += fill.commission;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    fn fill(side: Side, quantity: f64, price: f64, commission: f64, at: DateTime<Utc>) -> Fill {
        Fill {
            fill_id: format!("T-F{}", price),
            order_id: "T".to_string(),
            timestamp: at,
            symbol: Symbol::new("SYM"),
            side,
            quantity,
            price,
            commission,
            slippage_bps: 0.0,
            execution_price: price,
            realized_pnl: 0.0,
            reason: None,
        }
    }

    #[test]
    fn test_buy_then_sell_realizes_pnl() {
        let mut portfolio = Portfolio::new(100_000.0, true, false);

        let mut f1 = fill(Side::Buy, 10.0, 100.0, 0.0, ts(2, 10));
        portfolio.apply_fill(&mut f1, Some(100.0));
        assert_eq!(portfolio.cash, 99_000.0);
        assert_eq!(f1.realized_pnl, 0.0);

        let mut f2 = fill(Side::Sell, 10.0, 102.0, 0.0, ts(2, 11));
        portfolio.apply_fill(&mut f2, Some(102.0));
        assert_relative_eq!(f2.realized_pnl, 20.0);
        assert_relative_eq!(portfolio.cash, 100_020.0);
        assert_relative_eq!(portfolio.realized_pnl, 20.0);
        assert!(portfolio.get_position(&Symbol::new("SYM")).unwrap().is_flat());
    }

    #[test]
    fn test_commission_is_always_a_debit() {
        let mut portfolio = Portfolio::new(100_000.0, true, false);

        let mut f1 = fill(Side::Buy, 10.0, 100.0, 1.0, ts(2, 10));
        portfolio.apply_fill(&mut f1, None);
        assert_relative_eq!(portfolio.cash, 100_000.0 - 1000.0 - 1.0);

        let mut f2 = fill(Side::Sell, 10.0, 100.0, 1.0, ts(2, 11));
        portfolio.apply_fill(&mut f2, None);
        assert_relative_eq!(portfolio.cash, 100_000.0 - 2.0);
        assert_relative_eq!(portfolio.total_commission, 2.0);
    }

    #[test]
    fn test_weighted_average_entry_on_adds() {
        let mut portfolio = Portfolio::new(100_000.0, false, false);

        portfolio.apply_fill(&mut fill(Side::Buy, 10.0, 100.0, 0.0, ts(2, 10)), None);
        portfolio.apply_fill(&mut fill(Side::Buy, 10.0, 110.0, 0.0, ts(2, 11)), None);

        let pos = portfolio.get_position(&Symbol::new("SYM")).unwrap();
        assert_eq!(pos.quantity, 20.0);
        assert_relative_eq!(pos.avg_entry_price, 105.0);
    }

    #[test]
    fn test_partial_close_keeps_entry_price() {
        let mut portfolio = Portfolio::new(100_000.0, false, false);

        portfolio.apply_fill(&mut fill(Side::Buy, 10.0, 100.0, 0.0, ts(2, 10)), None);
        let mut f = fill(Side::Sell, 4.0, 105.0, 0.0, ts(2, 11));
        portfolio.apply_fill(&mut f, None);

        let pos = portfolio.get_position(&Symbol::new("SYM")).unwrap();
        assert_eq!(pos.quantity, 6.0);
        assert_relative_eq!(pos.avg_entry_price, 100.0);
        assert_relative_eq!(f.realized_pnl, 20.0);
    }

    #[test]
    fn test_direction_flip_resets_basis() {
        let mut portfolio = Portfolio::new(100_000.0, false, false);

        portfolio.apply_fill(&mut fill(Side::Buy, 10.0, 100.0, 0.0, ts(2, 10)), None);
        let mut f = fill(Side::Sell, 15.0, 104.0, 0.0, ts(2, 11));
        portfolio.apply_fill(&mut f, None);

        let pos = portfolio.get_position(&Symbol::new("SYM")).unwrap();
        assert_eq!(pos.quantity, -5.0);
        assert_relative_eq!(pos.avg_entry_price, 104.0);
        // Realized only on the 10 closed
        assert_relative_eq!(f.realized_pnl, 40.0);
    }

    #[test]
    fn test_short_side_pnl() {
        let mut portfolio = Portfolio::new(100_000.0, false, false);

        portfolio.apply_fill(&mut fill(Side::Sell, 10.0, 100.0, 0.0, ts(2, 10)), None);
        let pos = portfolio.get_position(&Symbol::new("SYM")).unwrap();
        assert_eq!(pos.quantity, -10.0);
        assert_relative_eq!(portfolio.cash, 101_000.0);

        let mut f = fill(Side::Buy, 10.0, 95.0, 0.0, ts(2, 11));
        portfolio.apply_fill(&mut f, None);
        assert_relative_eq!(f.realized_pnl, 50.0);
        assert_relative_eq!(portfolio.cash, 100_050.0);
    }

    #[test]
    fn test_equity_identity_with_open_position() {
        let mut portfolio = Portfolio::new(100_000.0, false, false);
        portfolio.apply_fill(&mut fill(Side::Buy, 10.0, 100.0, 0.0, ts(2, 10)), Some(100.0));

        let bar = Bar::new(
            ts(2, 11),
            Symbol::new("SYM"),
            103.0,
            Some(101.0),
            Some(104.0),
            Some(100.0),
            Some(103.0),
            None,
        );
        portfolio.update_from_bar(&bar);

        assert_relative_eq!(portfolio.unrealized_pnl, 30.0);
        assert_relative_eq!(portfolio.total_equity(), 99_000.0 + 30.0);

        let snapshot = portfolio.create_snapshot(bar.timestamp);
        assert_relative_eq!(
            snapshot.total_equity,
            snapshot.cash + snapshot.unrealized_pnl,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_snapshot_positions_are_deep_copies() {
        let mut portfolio = Portfolio::new(100_000.0, false, false);
        portfolio.apply_fill(&mut fill(Side::Buy, 10.0, 100.0, 0.0, ts(2, 10)), None);

        let snapshot = portfolio.create_snapshot(ts(2, 10));
        let before = snapshot.get_position(&Symbol::new("SYM")).unwrap().quantity;

        portfolio.apply_fill(&mut fill(Side::Sell, 10.0, 105.0, 0.0, ts(2, 11)), None);

        assert_eq!(
            snapshot.get_position(&Symbol::new("SYM")).unwrap().quantity,
            before
        );
    }

    #[test]
    fn test_day_roll_freezes_daily_history() {
        let mut portfolio = Portfolio::new(100_000.0, true, false);

        portfolio.check_new_day(ts(2, 10));
        portfolio.apply_fill(&mut fill(Side::Buy, 10.0, 100.0, 0.0, ts(2, 10)), Some(100.0));
        portfolio.apply_fill(&mut fill(Side::Sell, 10.0, 102.0, 0.0, ts(2, 15)), Some(102.0));

        // A fill on the next day rolls the previous one
        portfolio.apply_fill(&mut fill(Side::Buy, 5.0, 102.0, 0.0, ts(3, 10)), Some(102.0));

        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_relative_eq!(portfolio.daily_pnl_history()[&day], 20.0);
        assert_relative_eq!(portfolio.daily_return_history()[&day], 20.0 / 100_000.0);
    }

    #[test]
    fn test_eod_square_off_emits_synthetic_fill() {
        let mut portfolio = Portfolio::new(100_000.0, true, true);

        portfolio.check_new_day(ts(2, 10));
        portfolio.apply_fill(&mut fill(Side::Buy, 10.0, 100.0, 0.0, ts(2, 10)), Some(100.0));

        let bar = Bar::new(
            ts(2, 15),
            Symbol::new("SYM"),
            102.0,
            Some(101.0),
            Some(102.5),
            Some(100.5),
            Some(102.0),
            None,
        );
        portfolio.update_from_bar(&bar);

        // Next day's roll squares off at the 102 mark
        portfolio.check_new_day(ts(3, 9));

        let eod_fills = portfolio.drain_eod_fills();
        assert_eq!(eod_fills.len(), 1);
        let eod = &eod_fills[0];
        assert_eq!(eod.side, Side::Sell);
        assert_eq!(eod.price, 102.0);
        assert_eq!(eod.commission, 0.0);
        assert_relative_eq!(eod.realized_pnl, 20.0);

        assert!(portfolio.get_position(&Symbol::new("SYM")).unwrap().is_flat());
        assert_relative_eq!(portfolio.total_equity(), 100_020.0);
        assert_relative_eq!(portfolio.realized_pnl, 20.0);

        // The squared-off day keeps the 20 in its record and the next day
        // starts from post-square-off equity
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_relative_eq!(portfolio.daily_pnl_history()[&day], 20.0);
        assert_relative_eq!(portfolio.previous_day_equity, 100_020.0);

        // Drain is one-shot
        assert!(portfolio.drain_eod_fills().is_empty());
    }

    #[test]
    fn test_flat_portfolio_cash_reconciliation() {
        let mut portfolio = Portfolio::new(100_000.0, true, false);

        portfolio.apply_fill(&mut fill(Side::Buy, 10.0, 100.0, 2.0, ts(2, 10)), None);
        portfolio.apply_fill(&mut fill(Side::Sell, 10.0, 103.0, 2.0, ts(2, 12)), None);

        assert_relative_eq!(portfolio.unrealized_pnl, 0.0);
        assert_relative_eq!(
            portfolio.cash,
            portfolio.initial_cash + portfolio.realized_pnl - portfolio.total_commission
        );
    }
}
