//! Dual state machine: independent long and short sides over one tick feed.
//!
//! The two sides share nothing but the append-only signal history. Every
//! tick is delivered to both, long side first, so transitions within a tick
//! are deterministic.

mod side;

pub use side::{OpenPosition, SideFsm, SidePhase, WaitSource, ANCHOR_OFFSET, WINDOW_MS};

use crate::types::{OrderRequest, Side, SignalKind, Tick, TradeSignal};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Signals kept for the status payload.
const SIGNAL_HISTORY_CAP: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DualFsm {
    long: SideFsm,
    short: SideFsm,
    signal_history: VecDeque<TradeSignal>,
    last_tick: Option<Tick>,
}

impl Default for DualFsm {
    fn default() -> Self {
        Self::new(Decimal::ONE)
    }
}

impl DualFsm {
    pub fn new(order_qty: Decimal) -> Self {
        Self {
            long: SideFsm::new(Side::Long, order_qty),
            short: SideFsm::new(Side::Short, order_qty),
            signal_history: VecDeque::new(),
            last_tick: None,
        }
    }

    pub fn long(&self) -> &SideFsm {
        &self.long
    }

    pub fn short(&self) -> &SideFsm {
        &self.short
    }

    pub fn last_tick(&self) -> Option<Tick> {
        self.last_tick
    }

    pub fn signal_history(&self) -> impl Iterator<Item = &TradeSignal> {
        self.signal_history.iter()
    }

    /// Route a signal to its side and remember it.
    pub fn on_signal(&mut self, signal: TradeSignal) {
        match signal.kind {
            SignalKind::Buy => self.long.on_signal(signal.ts),
            SignalKind::Sell => self.short.on_signal(signal.ts),
        }
        self.signal_history.push_back(signal);
        while self.signal_history.len() > SIGNAL_HISTORY_CAP {
            self.signal_history.pop_front();
        }
    }

    /// Deliver one tick to both sides (long first) and collect any orders.
    pub fn on_tick(&mut self, tick: Tick) -> Vec<OrderRequest> {
        let mut out = Vec::new();
        self.long.on_tick(tick, &mut out);
        self.short.on_tick(tick, &mut out);
        self.last_tick = Some(tick);
        out
    }

    /// Close everything at the last observed price and idle both sides.
    /// Silently a no-op before the first tick.
    pub fn manual_close(&mut self) -> Vec<OrderRequest> {
        let mut out = Vec::new();
        let Some(tick) = self.last_tick else {
            debug!("Manual close ignored: no tick observed yet");
            return out;
        };
        self.long.manual_close(tick.price, tick.ts, &mut out);
        self.short.manual_close(tick.price, tick.ts, &mut out);
        out
    }

    /// Re-evaluate all live windows against the current clock. Must run on
    /// restore, before the next tick, so downtime expirations are applied.
    pub fn fast_forward(&mut self, now_ms: i64) {
        self.long.fast_forward(now_ms);
        self.short.fast_forward(now_ms);
    }

    /// Consistent view of both sides for the status endpoint.
    pub fn status(&self) -> FsmStatus {
        FsmStatus {
            buy_state: self.long.phase().to_string(),
            sell_state: self.short.phase().to_string(),
            long_position: self.long.position(),
            short_position: self.short.position(),
            anchors: AnchorsView {
                saved_buy_ltp: self.long.anchor(),
                buy_entry_trigger: self.long.entry_trigger(),
                buy_stop: self.long.stop(),
                saved_sell_ltp: self.short.anchor(),
                sell_entry_trigger: self.short.entry_trigger(),
                sell_stop: self.short.stop(),
            },
            signal_history: self.signal_history.iter().copied().collect(),
            timers: self.timers(),
        }
    }

    fn timers(&self) -> TimersView {
        // The singular wait fields report the active wait window, preferring
        // the most recently opened when both sides cool down at once.
        let active = [&self.long, &self.short]
            .into_iter()
            .filter(|s| s.phase() == SidePhase::WaitWindow)
            .max_by_key(|s| s.wait_window_start().unwrap_or(i64::MIN));
        TimersView {
            buy: SideTimers::of(&self.long),
            sell: SideTimers::of(&self.short),
            wait_window_duration_ms: active.and_then(|s| s.wait_window_duration_ms()),
            wait_window_source: active
                .and_then(|s| s.wait_window_source())
                .map(|s| s.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorsView {
    pub saved_buy_ltp: Option<Decimal>,
    pub buy_entry_trigger: Option<Decimal>,
    pub buy_stop: Option<Decimal>,
    pub saved_sell_ltp: Option<Decimal>,
    pub sell_entry_trigger: Option<Decimal>,
    pub sell_stop: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideTimers {
    pub entry_window_start_ts: Option<i64>,
    pub profit_window_start_ts: Option<i64>,
    pub wait_window_start_ts: Option<i64>,
    pub wait_for_entry_start_ts: Option<i64>,
}

impl SideTimers {
    fn of(side: &SideFsm) -> Self {
        Self {
            entry_window_start_ts: side.entry_window_start(),
            profit_window_start_ts: side.profit_window_start(),
            wait_window_start_ts: side.wait_window_start(),
            wait_for_entry_start_ts: side.wait_for_entry_start(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimersView {
    pub buy: SideTimers,
    pub sell: SideTimers,
    pub wait_window_duration_ms: Option<i64>,
    pub wait_window_source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsmStatus {
    pub buy_state: String,
    pub sell_state: String,
    pub long_position: Option<OpenPosition>,
    pub short_position: Option<OpenPosition>,
    pub anchors: AnchorsView,
    pub signal_history: Vec<TradeSignal>,
    pub timers: TimersView,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderReason;
    use rust_decimal_macros::dec;

    fn tick(price: &str, ts: i64) -> Tick {
        Tick::new(price.parse().unwrap(), ts)
    }

    fn signal(kind: SignalKind, ts: i64) -> TradeSignal {
        TradeSignal { kind, ts }
    }

    #[test]
    fn sides_are_independent_on_shared_ticks() {
        let mut fsm = DualFsm::new(Decimal::ONE);
        fsm.on_signal(signal(SignalKind::Buy, 0));
        fsm.on_signal(signal(SignalKind::Sell, 0));

        // First tick latches both sides' anchors.
        let orders = fsm.on_tick(tick("100.0", 1));
        assert!(orders.is_empty());
        assert_eq!(fsm.long().entry_trigger(), Some(dec!(100.5)));
        assert_eq!(fsm.long().stop(), Some(dec!(99.5)));
        assert_eq!(fsm.short().entry_trigger(), Some(dec!(99.5)));
        assert_eq!(fsm.short().stop(), Some(dec!(100.5)));

        // Second tick opens the long and is an entry miss for the short.
        let orders = fsm.on_tick(tick("100.6", 2));
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].reason, OrderReason::OpenLong);
        assert_eq!(fsm.long().phase(), SidePhase::ProfitWindow);
        assert_eq!(fsm.short().phase(), SidePhase::WaitWindow);
        assert_eq!(fsm.short().wait_window_duration_ms(), Some(59_999));
    }

    #[test]
    fn buy_signal_does_not_touch_short_side() {
        let mut fsm = DualFsm::new(Decimal::ONE);
        fsm.on_signal(signal(SignalKind::Sell, 0));
        fsm.on_tick(tick("100.0", 1000));
        let short_trigger = fsm.short().entry_trigger();

        fsm.on_signal(signal(SignalKind::Buy, 2000));
        assert_eq!(fsm.short().entry_trigger(), short_trigger);
        assert_eq!(fsm.short().phase(), SidePhase::EntryWindow);
        assert_eq!(fsm.long().phase(), SidePhase::Signal);
    }

    #[test]
    fn manual_close_before_any_tick_is_silent() {
        let mut fsm = DualFsm::new(Decimal::ONE);
        fsm.on_signal(signal(SignalKind::Buy, 0));
        assert!(fsm.manual_close().is_empty());
        assert_eq!(fsm.long().phase(), SidePhase::Signal);
    }

    #[test]
    fn manual_close_closes_both_sides_at_last_price() {
        let mut fsm = DualFsm::new(Decimal::ONE);
        fsm.on_signal(signal(SignalKind::Buy, 0));
        fsm.on_tick(tick("100.0", 1000));
        fsm.on_tick(tick("100.6", 2000));
        assert!(fsm.long().position().is_some());

        let orders = fsm.manual_close();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].reason, OrderReason::ManualOverride);
        assert_eq!(orders[0].price, dec!(100.6));
        assert_eq!(fsm.long().phase(), SidePhase::WaitForSignal);
        assert_eq!(fsm.short().phase(), SidePhase::WaitForSignal);
    }

    #[test]
    fn signal_history_is_capped_at_ten() {
        let mut fsm = DualFsm::new(Decimal::ONE);
        for i in 0..15 {
            fsm.on_signal(signal(SignalKind::Buy, i));
        }
        let history: Vec<_> = fsm.signal_history().collect();
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].ts, 5);
    }

    #[test]
    fn status_reports_singular_wait_fields_from_active_wait() {
        let mut fsm = DualFsm::new(Decimal::ONE);
        fsm.on_signal(signal(SignalKind::Sell, 0));
        fsm.on_tick(tick("100.0", 1));
        fsm.on_tick(tick("100.6", 2)); // short entry miss

        let status = fsm.status();
        assert_eq!(status.sell_state, "WAIT_WINDOW");
        assert_eq!(status.timers.wait_window_duration_ms, Some(59_999));
        assert_eq!(status.timers.wait_window_source.as_deref(), Some("ENTRY"));
    }

    #[test]
    fn serde_round_trip_preserves_both_sides() {
        let mut fsm = DualFsm::new(Decimal::ONE);
        fsm.on_signal(signal(SignalKind::Buy, 0));
        fsm.on_signal(signal(SignalKind::Sell, 0));
        fsm.on_tick(tick("100.0", 1));
        fsm.on_tick(tick("100.6", 2));

        let json = serde_json::to_string(&fsm).unwrap();
        let restored: DualFsm = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.long().phase(), fsm.long().phase());
        assert_eq!(restored.short().phase(), fsm.short().phase());
        assert_eq!(
            restored.long().position().unwrap().entry_price,
            dec!(100.6)
        );
        assert_eq!(restored.last_tick(), fsm.last_tick());
    }
}
