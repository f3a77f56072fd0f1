//! Position and P&L accounting.
//!
//! Keeps one book per side so a long and a short can be open at the same
//! time, each with its own average price and sign convention. Trade metrics
//! are maintained as running aggregates, so the bounded trade ring can be
//! trimmed without skewing win rate or profit factor.

use crate::types::{OrderReason, Side};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{info, warn};

/// Most recent trades retained for snapshots; aggregates cover the rest.
const TRADE_RING_CAP: usize = 100;

/// Notional base used for the P&L percentage metric.
const NOTIONAL_BASE: i64 = 1000;

/// One side's open book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SideBook {
    pub qty: Decimal,
    pub avg_price: Decimal,
}

impl SideBook {
    pub fn is_open(&self) -> bool {
        self.qty > Decimal::ZERO
    }

    fn unrealized(&self, side: Side, mark: Decimal) -> Decimal {
        if !self.is_open() {
            return Decimal::ZERO;
        }
        match side {
            Side::Long => (mark - self.avg_price) * self.qty,
            Side::Short => (self.avg_price - mark) * self.qty,
        }
    }
}

/// A recorded fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub id: String,
    pub side: Side,
    pub action: TradeAction,
    pub qty: Decimal,
    pub price: Decimal,
    /// Realized P&L for CLOSE trades; absent on OPEN.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<Decimal>,
    pub reason: String,
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
    Open,
    Close,
}

/// Aggregate trade statistics, derived from every CLOSE ever recorded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TradeStats {
    pub closed_count: u64,
    pub win_count: u64,
    pub loss_count: u64,
    /// Sum of positive close P&Ls.
    pub total_wins: Decimal,
    /// Sum of |negative close P&Ls|.
    pub total_losses: Decimal,
    pub best_trade: Option<Decimal>,
    pub worst_trade: Option<Decimal>,
}

impl TradeStats {
    fn record_close(&mut self, pnl: Decimal) {
        self.closed_count += 1;
        if pnl > Decimal::ZERO {
            self.win_count += 1;
            self.total_wins += pnl;
        } else if pnl < Decimal::ZERO {
            self.loss_count += 1;
            self.total_losses += -pnl;
        }
        self.best_trade = Some(self.best_trade.map_or(pnl, |b| b.max(pnl)));
        self.worst_trade = Some(self.worst_trade.map_or(pnl, |w| w.min(pnl)));
    }
}

/// Derived metrics for the status/snapshot payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PnlMetrics {
    pub win_rate: f64,
    pub profit_factor: f64,
    pub best_trade: Decimal,
    pub worst_trade: Decimal,
    pub avg_trade_pnl: Decimal,
    pub pnl_percentage: Decimal,
    pub total_wins: Decimal,
    pub total_losses: Decimal,
    pub win_count: u64,
    pub loss_count: u64,
}

/// Open-book view for the snapshot payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookView {
    pub qty: Decimal,
    pub avg_price: Decimal,
}

/// Point-in-time P&L snapshot, numeric fields rounded to 2 decimals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PnlSnapshot {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long_position: Option<BookView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_position: Option<BookView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_price: Option<Decimal>,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub total_pnl: Decimal,
    pub trade_count: u64,
    pub trades: Vec<TradeRecord>,
    pub metrics: PnlMetrics,
}

/// Per-side position and P&L state for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PnlContext {
    symbol: String,
    long: SideBook,
    short: SideBook,
    last_price: Option<Decimal>,
    realized_pnl: Decimal,
    trade_count: u64,
    trades: VecDeque<TradeRecord>,
    stats: TradeStats,
}

impl Default for PnlContext {
    fn default() -> Self {
        Self::new("UNKNOWN")
    }
}

impl PnlContext {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            long: SideBook::default(),
            short: SideBook::default(),
            last_price: None,
            realized_pnl: Decimal::ZERO,
            trade_count: 0,
            trades: VecDeque::new(),
            stats: TradeStats::default(),
        }
    }

    fn book(&self, side: Side) -> &SideBook {
        match side {
            Side::Long => &self.long,
            Side::Short => &self.short,
        }
    }

    fn book_mut(&mut self, side: Side) -> &mut SideBook {
        match side {
            Side::Long => &mut self.long,
            Side::Short => &mut self.short,
        }
    }

    pub fn position(&self, side: Side) -> Option<SideBook> {
        let book = self.book(side);
        book.is_open().then_some(*book)
    }

    pub fn last_price(&self) -> Option<Decimal> {
        self.last_price
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    /// Increase a side's book at `price`, averaging into any existing qty.
    pub fn open(&mut self, side: Side, qty: Decimal, price: Decimal, reason: OrderReason, ts: i64) {
        if qty <= Decimal::ZERO {
            warn!(%side, %qty, "Dropping open with non-positive qty");
            return;
        }
        let book = self.book_mut(side);
        let new_qty = book.qty + qty;
        book.avg_price = (book.avg_price * book.qty + price * qty) / new_qty;
        book.qty = new_qty;

        info!(%side, %qty, %price, reason = %reason, "Position opened");
        self.push_trade(TradeRecord {
            id: uuid::Uuid::new_v4().to_string(),
            side,
            action: TradeAction::Open,
            qty,
            price,
            realized_pnl: None,
            reason: reason.to_string(),
            ts,
        });
    }

    /// Reduce a side's book at `price`, returning the realized P&L delta.
    ///
    /// Quantity is clamped to the held amount. Returns `None` when the side
    /// holds nothing (the caller logs and drops per the invariant rules).
    pub fn close(
        &mut self,
        side: Side,
        qty: Decimal,
        price: Decimal,
        reason: OrderReason,
        ts: i64,
    ) -> Option<Decimal> {
        let book = self.book_mut(side);
        if !book.is_open() {
            return None;
        }
        let fill_qty = qty.min(book.qty);
        let delta = match side {
            Side::Long => (price - book.avg_price) * fill_qty,
            Side::Short => (book.avg_price - price) * fill_qty,
        };
        book.qty -= fill_qty;
        if !book.is_open() {
            *book = SideBook::default();
        }

        self.realized_pnl += delta;
        self.stats.record_close(delta);
        info!(%side, qty = %fill_qty, %price, pnl = %delta, reason = %reason, "Position closed");
        self.push_trade(TradeRecord {
            id: uuid::Uuid::new_v4().to_string(),
            side,
            action: TradeAction::Close,
            qty: fill_qty,
            price,
            realized_pnl: Some(delta),
            reason: reason.to_string(),
            ts,
        });
        Some(delta)
    }

    fn push_trade(&mut self, trade: TradeRecord) {
        self.trade_count += 1;
        self.trades.push_back(trade);
        while self.trades.len() > TRADE_RING_CAP {
            self.trades.pop_front();
        }
    }

    pub fn update_mark_price(&mut self, price: Decimal) {
        self.last_price = Some(price);
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        match self.last_price {
            Some(mark) => {
                self.long.unrealized(Side::Long, mark) + self.short.unrealized(Side::Short, mark)
            }
            None => Decimal::ZERO,
        }
    }

    pub fn total_pnl(&self) -> Decimal {
        self.realized_pnl + self.unrealized_pnl()
    }

    fn metrics(&self) -> PnlMetrics {
        let s = &self.stats;
        let win_rate = if s.closed_count == 0 {
            0.0
        } else {
            round2(s.win_count as f64 / s.closed_count as f64 * 100.0)
        };
        let profit_factor = if s.total_losses <= Decimal::ZERO {
            0.0
        } else {
            round2(
                (s.total_wins / s.total_losses)
                    .to_f64()
                    .unwrap_or(0.0),
            )
        };
        let avg_trade_pnl = if s.closed_count == 0 {
            Decimal::ZERO
        } else {
            self.realized_pnl / Decimal::from(s.closed_count)
        };
        let pnl_percentage = self.total_pnl() / Decimal::from(NOTIONAL_BASE) * Decimal::ONE_HUNDRED;
        PnlMetrics {
            win_rate,
            profit_factor,
            best_trade: s.best_trade.unwrap_or_default().round_dp(2),
            worst_trade: s.worst_trade.unwrap_or_default().round_dp(2),
            avg_trade_pnl: avg_trade_pnl.round_dp(2),
            pnl_percentage: pnl_percentage.round_dp(2),
            total_wins: s.total_wins.round_dp(2),
            total_losses: s.total_losses.round_dp(2),
            win_count: s.win_count,
            loss_count: s.loss_count,
        }
    }

    pub fn snapshot(&self) -> PnlSnapshot {
        let view = |book: &SideBook| BookView {
            qty: book.qty,
            avg_price: book.avg_price.round_dp(2),
        };
        PnlSnapshot {
            symbol: self.symbol.clone(),
            long_position: self.long.is_open().then(|| view(&self.long)),
            short_position: self.short.is_open().then(|| view(&self.short)),
            last_price: self.last_price,
            realized_pnl: self.realized_pnl.round_dp(2),
            unrealized_pnl: self.unrealized_pnl().round_dp(2),
            total_pnl: self.total_pnl().round_dp(2),
            trade_count: self.trade_count,
            trades: self.trades.iter().cloned().collect(),
            metrics: self.metrics(),
        }
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
