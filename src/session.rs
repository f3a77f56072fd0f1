//! Session Manager
//!
//! Tracks cumulative paper and live P&L and drives the trading mode:
//! paper until cumulative paper P&L first turns positive, then live; live
//! falls back to paper if cumulative live P&L turns negative. A daily
//! realized-loss limit raises `daily_stop_active`, which blocks the
//! paper-to-live gate (and new live entries) until the daily reset.

use crate::pnl::TradeRecord;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{error, info, warn};

/// Trades retained in the session ring.
const SESSION_TRADE_CAP: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Paper,
    Live,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Paper => write!(f, "PAPER"),
            TradingMode::Live => write!(f, "LIVE"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionManager {
    mode: TradingMode,
    paper_cumulative_pnl: Decimal,
    live_cumulative_pnl: Decimal,
    total_live_realised_pnl: Decimal,
    daily_realised_pnl: Decimal,
    /// Negative threshold; daily realized P&L at or below it halts live entry.
    daily_loss_limit: Decimal,
    daily_stop_active: bool,
    trades: VecDeque<TradeRecord>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(Decimal::new(-500, 0))
    }
}

impl SessionManager {
    pub fn new(daily_loss_limit: Decimal) -> Self {
        Self {
            mode: TradingMode::Paper,
            paper_cumulative_pnl: Decimal::ZERO,
            live_cumulative_pnl: Decimal::ZERO,
            total_live_realised_pnl: Decimal::ZERO,
            daily_realised_pnl: Decimal::ZERO,
            daily_loss_limit,
            daily_stop_active: false,
            trades: VecDeque::new(),
        }
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    pub fn paper_cumulative_pnl(&self) -> Decimal {
        self.paper_cumulative_pnl
    }

    pub fn live_cumulative_pnl(&self) -> Decimal {
        self.live_cumulative_pnl
    }

    pub fn total_live_realised_pnl(&self) -> Decimal {
        self.total_live_realised_pnl
    }

    pub fn daily_realised_pnl(&self) -> Decimal {
        self.daily_realised_pnl
    }

    pub fn daily_loss_limit(&self) -> Decimal {
        self.daily_loss_limit
    }

    pub fn daily_stop_active(&self) -> bool {
        self.daily_stop_active
    }

    pub fn trades(&self) -> impl Iterator<Item = &TradeRecord> {
        self.trades.iter()
    }

    /// Whether new cycles may start. Open positions are always managed;
    /// only fresh entries are gated.
    pub fn entry_allowed(&self) -> bool {
        !(self.daily_stop_active && self.mode == TradingMode::Live)
    }

    /// Route a realized P&L delta into the account matching the current mode
    /// and remember the trade.
    pub fn record_realized(&mut self, delta: Decimal, trade: TradeRecord) {
        match self.mode {
            TradingMode::Paper => self.update_paper_pnl(delta),
            TradingMode::Live => self.update_live_pnl(delta),
        }
        self.trades.push_back(trade);
        while self.trades.len() > SESSION_TRADE_CAP {
            self.trades.pop_front();
        }
    }

    /// Accumulate paper P&L; flips the one-way gate to LIVE once cumulative
    /// paper P&L turns positive (unless the daily stop is holding it shut).
    pub fn update_paper_pnl(&mut self, delta: Decimal) {
        if self.mode != TradingMode::Paper {
            warn!(%delta, mode = %self.mode, "Ignoring paper P&L update outside PAPER mode");
            return;
        }
        self.paper_cumulative_pnl += delta;
        if self.paper_cumulative_pnl > Decimal::ZERO {
            if self.daily_stop_active {
                warn!(
                    paper_pnl = %self.paper_cumulative_pnl,
                    "Paper P&L positive but daily stop active; staying in PAPER"
                );
                return;
            }
            self.mode = TradingMode::Live;
            self.live_cumulative_pnl = Decimal::ZERO;
            info!(
                paper_pnl = %self.paper_cumulative_pnl,
                "Paper P&L turned positive - switching to LIVE"
            );
        }
    }

    /// Accumulate live P&L and apply the two risk circuit-breakers.
    pub fn update_live_pnl(&mut self, delta: Decimal) {
        if self.mode != TradingMode::Live {
            warn!(%delta, mode = %self.mode, "Ignoring live P&L update outside LIVE mode");
            return;
        }
        self.live_cumulative_pnl += delta;
        self.total_live_realised_pnl += delta;
        self.daily_realised_pnl += delta;

        if self.live_cumulative_pnl < Decimal::ZERO {
            self.mode = TradingMode::Paper;
            self.daily_stop_active = true;
            warn!(
                live_pnl = %self.live_cumulative_pnl,
                "Live P&L negative - falling back to PAPER, daily stop engaged"
            );
        }
        if self.daily_realised_pnl <= self.daily_loss_limit {
            self.daily_stop_active = true;
            error!(
                daily_pnl = %self.daily_realised_pnl,
                limit = %self.daily_loss_limit,
                "DAILY LOSS LIMIT BREACHED - live entry halted"
            );
        }
    }

    /// Reset for a new trading day. Driven by an external scheduler.
    pub fn reset_daily_stats(&mut self) {
        let old = self.daily_realised_pnl;
        self.daily_realised_pnl = Decimal::ZERO;
        self.daily_stop_active = false;
        info!(previous_day_pnl = %old, "Daily session counters reset");
    }
}
