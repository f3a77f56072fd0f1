//! One side of the dual state machine.
//!
//! The long side reacts to BUY signals and opens LONG positions; the short
//! side is its mirror with comparisons reversed. All time comparisons use
//! tick timestamps, never wall clock. ENTRY_WINDOW and WAIT_FOR_ENTRY
//! consume exactly one tick for their decision: a pending flag gates the
//! evaluation so a burst of ticks cannot produce multiple entries.

use crate::metrics;
use crate::types::{OrderReason, OrderRequest, Side, Tick};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Fixed window budget shared by the entry and profit phases.
pub const WINDOW_MS: i64 = 60_000;

/// Distance from the anchor price to the entry trigger and to the stop.
pub const ANCHOR_OFFSET: Decimal = dec!(0.5);

/// Phase of one side's machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SidePhase {
    WaitForSignal,
    Signal,
    EntryWindow,
    ProfitWindow,
    WaitWindow,
    WaitForEntry,
}

impl SidePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SidePhase::WaitForSignal => "WAIT_FOR_SIGNAL",
            SidePhase::Signal => "SIGNAL",
            SidePhase::EntryWindow => "ENTRY_WINDOW",
            SidePhase::ProfitWindow => "PROFIT_WINDOW",
            SidePhase::WaitWindow => "WAIT_WINDOW",
            SidePhase::WaitForEntry => "WAIT_FOR_ENTRY",
        }
    }
}

impl std::fmt::Display for SidePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which window a wait window inherits its residual budget from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitSource {
    Entry,
    Profit,
}

impl std::fmt::Display for WaitSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitSource::Entry => write!(f, "ENTRY"),
            WaitSource::Profit => write!(f, "PROFIT"),
        }
    }
}

/// An open position held by one side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPosition {
    pub qty: Decimal,
    pub entry_price: Decimal,
    pub stop: Decimal,
}

/// One side's complete state: phase, anchors, windows and position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SideFsm {
    side: Side,
    phase: SidePhase,
    order_qty: Decimal,
    /// Price latched from the first tick after a signal.
    anchor: Option<Decimal>,
    entry_trigger: Option<Decimal>,
    stop: Option<Decimal>,
    position: Option<OpenPosition>,
    entry_window_start: Option<i64>,
    entry_tick_pending: bool,
    profit_window_start: Option<i64>,
    wait_window_start: Option<i64>,
    wait_window_duration_ms: Option<i64>,
    wait_window_source: Option<WaitSource>,
    wait_for_entry_start: Option<i64>,
    first_tick_seen: bool,
}

impl Default for SideFsm {
    fn default() -> Self {
        Self::new(Side::Long, Decimal::ONE)
    }
}

impl SideFsm {
    pub fn new(side: Side, order_qty: Decimal) -> Self {
        Self {
            side,
            phase: SidePhase::WaitForSignal,
            order_qty,
            anchor: None,
            entry_trigger: None,
            stop: None,
            position: None,
            entry_window_start: None,
            entry_tick_pending: false,
            profit_window_start: None,
            wait_window_start: None,
            wait_window_duration_ms: None,
            wait_window_source: None,
            wait_for_entry_start: None,
            first_tick_seen: false,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn phase(&self) -> SidePhase {
        self.phase
    }

    pub fn anchor(&self) -> Option<Decimal> {
        self.anchor
    }

    pub fn entry_trigger(&self) -> Option<Decimal> {
        self.entry_trigger
    }

    pub fn stop(&self) -> Option<Decimal> {
        self.stop
    }

    pub fn position(&self) -> Option<OpenPosition> {
        self.position
    }

    pub fn entry_window_start(&self) -> Option<i64> {
        self.entry_window_start
    }

    pub fn profit_window_start(&self) -> Option<i64> {
        self.profit_window_start
    }

    pub fn wait_window_start(&self) -> Option<i64> {
        self.wait_window_start
    }

    pub fn wait_window_duration_ms(&self) -> Option<i64> {
        self.wait_window_duration_ms
    }

    pub fn wait_window_source(&self) -> Option<WaitSource> {
        self.wait_window_source
    }

    pub fn wait_for_entry_start(&self) -> Option<i64> {
        self.wait_for_entry_start
    }

    fn open_reason(&self) -> OrderReason {
        match self.side {
            Side::Long => OrderReason::OpenLong,
            Side::Short => OrderReason::OpenShort,
        }
    }

    fn close_reason(&self) -> OrderReason {
        match self.side {
            Side::Long => OrderReason::CloseLong,
            Side::Short => OrderReason::CloseShort,
        }
    }

    fn derive_trigger(&self, anchor: Decimal) -> Decimal {
        match self.side {
            Side::Long => anchor + ANCHOR_OFFSET,
            Side::Short => anchor - ANCHOR_OFFSET,
        }
    }

    fn derive_stop(&self, anchor: Decimal) -> Decimal {
        match self.side {
            Side::Long => anchor - ANCHOR_OFFSET,
            Side::Short => anchor + ANCHOR_OFFSET,
        }
    }

    fn trigger_hit(&self, price: Decimal, trigger: Decimal) -> bool {
        match self.side {
            Side::Long => price >= trigger,
            Side::Short => price <= trigger,
        }
    }

    fn stop_hit(&self, price: Decimal, stop: Decimal) -> bool {
        match self.side {
            Side::Long => price <= stop,
            Side::Short => price >= stop,
        }
    }

    fn set_phase(&mut self, to: SidePhase) {
        if self.phase != to {
            info!(side = %self.side, from = %self.phase, to = %to, "State transition");
            metrics::record_transition(self.side.to_string().as_str(), self.phase.as_str(), to.as_str());
            self.phase = to;
        }
    }

    /// Accept a signal for this side. Accepted at any time: a mid-cycle
    /// signal discards the side's anchors and phase, and the next tick
    /// re-latches. Any open position is left untouched (the open guard
    /// prevents a double entry later in the new cycle).
    pub fn on_signal(&mut self, ts: i64) {
        if self.phase != SidePhase::WaitForSignal {
            debug!(side = %self.side, phase = %self.phase, ts, "Mid-cycle signal: restarting cycle");
        }
        self.clear_cycle();
        self.set_phase(SidePhase::Signal);
    }

    fn clear_cycle(&mut self) {
        self.anchor = None;
        self.entry_trigger = None;
        self.stop = None;
        self.entry_window_start = None;
        self.entry_tick_pending = false;
        self.profit_window_start = None;
        self.wait_window_start = None;
        self.wait_window_duration_ms = None;
        self.wait_window_source = None;
        self.wait_for_entry_start = None;
        self.first_tick_seen = false;
    }

    /// Process one tick. Order requests (opens/closes) are appended to `out`.
    pub fn on_tick(&mut self, tick: Tick, out: &mut Vec<OrderRequest>) {
        let (price, ts) = (tick.price, tick.ts);
        match self.phase {
            SidePhase::WaitForSignal => {}
            SidePhase::Signal => self.latch_anchors(price, ts),
            SidePhase::EntryWindow => self.decide_entry(price, ts, out),
            SidePhase::ProfitWindow => self.manage_position(price, ts, out),
            SidePhase::WaitWindow => self.check_wait_window(ts),
            SidePhase::WaitForEntry => self.check_rearm(price, ts, out),
        }
    }

    /// SIGNAL: the first tick fixes the anchor and derives trigger and stop.
    fn latch_anchors(&mut self, price: Decimal, ts: i64) {
        let trigger = self.derive_trigger(price);
        let stop = self.derive_stop(price);
        self.anchor = Some(price);
        self.entry_trigger = Some(trigger);
        self.stop = Some(stop);
        self.entry_window_start = Some(ts);
        self.entry_tick_pending = true;
        info!(side = %self.side, anchor = %price, %trigger, %stop, ts, "Anchors latched");
        self.set_phase(SidePhase::EntryWindow);
    }

    /// ENTRY_WINDOW: exactly the next tick decides entry or wait.
    fn decide_entry(&mut self, price: Decimal, ts: i64, out: &mut Vec<OrderRequest>) {
        if !self.entry_tick_pending {
            return;
        }
        self.entry_tick_pending = false;

        let Some(trigger) = self.entry_trigger else {
            warn!(side = %self.side, "Entry window without anchors; resetting side");
            self.reset();
            return;
        };

        if self.trigger_hit(price, trigger) && self.try_open(price, ts, out) {
            return;
        }
        let start = self.entry_window_start.unwrap_or(ts);
        let residual = WINDOW_MS - (ts - start);
        debug!(side = %self.side, %price, %trigger, residual_ms = residual, "Entry miss");
        self.enter_wait_window(ts, residual, WaitSource::Entry);
    }

    /// PROFIT_WINDOW: each tick checks the stop; the window rolls every
    /// 60 s while the stop is untouched.
    fn manage_position(&mut self, price: Decimal, ts: i64, out: &mut Vec<OrderRequest>) {
        let Some(pos) = self.position else {
            warn!(side = %self.side, "Profit window without a position; resetting side");
            self.reset();
            return;
        };
        if self.stop_hit(price, pos.stop) {
            out.push(OrderRequest {
                side: self.side,
                qty: pos.qty,
                price,
                ts,
                reason: self.close_reason(),
            });
            self.position = None;
            let start = self.profit_window_start.unwrap_or(ts);
            let residual = WINDOW_MS - (ts - start);
            self.profit_window_start = None;
            info!(side = %self.side, %price, stop = %pos.stop, residual_ms = residual, "Stop hit");
            self.enter_wait_window(ts, residual, WaitSource::Profit);
        } else if ts - self.profit_window_start.unwrap_or(ts) >= WINDOW_MS {
            // Roll the window; the stop carries over unchanged.
            self.profit_window_start = Some(ts);
            debug!(side = %self.side, ts, "Profit window restarted");
        }
    }

    /// WAIT_WINDOW: ticks only move the clock; expiry resolves by source.
    fn check_wait_window(&mut self, ts: i64) {
        let start = self.wait_window_start.unwrap_or(ts);
        let duration = self.wait_window_duration_ms.unwrap_or(0);
        if ts - start >= duration {
            self.resolve_wait_window(ts);
        }
    }

    /// WAIT_FOR_ENTRY: one first-tick chance per 60-s lap against the same
    /// anchors, looping until the trigger hits.
    fn check_rearm(&mut self, price: Decimal, ts: i64, out: &mut Vec<OrderRequest>) {
        if !self.first_tick_seen {
            self.first_tick_seen = true;
            let Some(trigger) = self.entry_trigger else {
                warn!(side = %self.side, "Re-arm window without anchors; resetting side");
                self.reset();
                return;
            };
            if self.trigger_hit(price, trigger) && self.try_open(price, ts, out) {
                self.wait_for_entry_start = None;
            } else {
                debug!(side = %self.side, %price, %trigger, "Re-arm first tick missed");
            }
        } else if ts - self.wait_for_entry_start.unwrap_or(ts) >= WINDOW_MS {
            self.wait_for_entry_start = Some(ts);
            self.first_tick_seen = false;
            debug!(side = %self.side, ts, "Re-arm window restarted");
        }
    }

    /// Open at `price` and move to PROFIT_WINDOW. Returns false when the
    /// side already holds (the call is dropped, never doubled).
    fn try_open(&mut self, price: Decimal, ts: i64, out: &mut Vec<OrderRequest>) -> bool {
        if self.position.is_some() {
            warn!(side = %self.side, %price, "Dropping open: side already holds a position");
            return false;
        }
        let Some(stop) = self.stop else {
            warn!(side = %self.side, "Dropping open: no stop derived");
            return false;
        };
        out.push(OrderRequest {
            side: self.side,
            qty: self.order_qty,
            price,
            ts,
            reason: self.open_reason(),
        });
        self.position = Some(OpenPosition {
            qty: self.order_qty,
            entry_price: price,
            stop,
        });
        self.profit_window_start = Some(ts);
        info!(side = %self.side, %price, %stop, ts, "Entry trigger hit");
        self.set_phase(SidePhase::ProfitWindow);
        true
    }

    /// Open a wait window carrying the caller's unused budget. A residual
    /// of zero or less skips the wait and applies the resolution at once.
    fn enter_wait_window(&mut self, ts: i64, residual_ms: i64, source: WaitSource) {
        if residual_ms <= 0 {
            debug!(side = %self.side, %source, "Wait window skipped: budget exhausted");
            self.wait_window_source = Some(source);
            self.resolve_wait_window(ts);
            return;
        }
        self.wait_window_start = Some(ts);
        self.wait_window_duration_ms = Some(residual_ms);
        self.wait_window_source = Some(source);
        self.set_phase(SidePhase::WaitWindow);
    }

    /// Apply a wait window's resolution at time `ts`. The resolving tick is
    /// never decisive; the next tick is the first evaluated afterwards.
    fn resolve_wait_window(&mut self, ts: i64) {
        let source = self.wait_window_source.unwrap_or(WaitSource::Entry);
        // Start/duration/source are kept for observability; the phase alone
        // says whether a wait is live.
        match source {
            WaitSource::Entry => {
                self.entry_window_start = Some(ts);
                self.entry_tick_pending = true;
                self.set_phase(SidePhase::EntryWindow);
            }
            WaitSource::Profit => {
                self.wait_for_entry_start = Some(ts);
                self.first_tick_seen = false;
                self.set_phase(SidePhase::WaitForEntry);
            }
        }
    }

    /// Emit a close for any held position and return the side to idle.
    pub fn manual_close(&mut self, price: Decimal, ts: i64, out: &mut Vec<OrderRequest>) {
        if let Some(pos) = self.position.take() {
            out.push(OrderRequest {
                side: self.side,
                qty: pos.qty,
                price,
                ts,
                reason: OrderReason::ManualOverride,
            });
            info!(side = %self.side, %price, "Manual close");
        }
        self.reset();
    }

    /// Drop anchors, windows and phase back to idle. Any open position must
    /// already have been closed by the caller.
    pub fn reset(&mut self) {
        self.clear_cycle();
        self.set_phase(SidePhase::WaitForSignal);
    }

    /// Re-evaluate live windows against `now` after a restart gap, so
    /// expirations that happened while the process was down are not missed.
    pub fn fast_forward(&mut self, now_ms: i64) {
        match self.phase {
            SidePhase::WaitWindow => {
                let start = self.wait_window_start.unwrap_or(now_ms);
                let duration = self.wait_window_duration_ms.unwrap_or(0);
                if now_ms - start >= duration {
                    info!(side = %self.side, "Wait window expired during downtime");
                    self.resolve_wait_window(now_ms);
                }
            }
            SidePhase::ProfitWindow => {
                if let Some(start) = self.profit_window_start {
                    if now_ms - start >= WINDOW_MS {
                        self.profit_window_start = Some(now_ms);
                    }
                }
            }
            SidePhase::WaitForEntry => {
                if let Some(start) = self.wait_for_entry_start {
                    if now_ms - start >= WINDOW_MS {
                        self.wait_for_entry_start = Some(now_ms);
                        self.first_tick_seen = false;
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(price: &str, ts: i64) -> Tick {
        Tick::new(price.parse().unwrap(), ts)
    }

    fn long_fsm() -> SideFsm {
        SideFsm::new(Side::Long, Decimal::ONE)
    }

    fn short_fsm() -> SideFsm {
        SideFsm::new(Side::Short, Decimal::ONE)
    }

    #[test]
    fn first_tick_latches_anchors_with_unit_spread() {
        let mut fsm = long_fsm();
        let mut out = Vec::new();
        fsm.on_signal(0);
        fsm.on_tick(tick("100.0", 1000), &mut out);

        assert_eq!(fsm.phase(), SidePhase::EntryWindow);
        assert_eq!(fsm.anchor(), Some(dec!(100.0)));
        assert_eq!(fsm.entry_trigger(), Some(dec!(100.5)));
        assert_eq!(fsm.stop(), Some(dec!(99.5)));
        assert_eq!(
            fsm.entry_trigger().unwrap() - fsm.stop().unwrap(),
            dec!(1.0)
        );
        assert!(out.is_empty());
    }

    #[test]
    fn short_anchors_mirror_long() {
        let mut fsm = short_fsm();
        let mut out = Vec::new();
        fsm.on_signal(0);
        fsm.on_tick(tick("100.0", 1000), &mut out);

        assert_eq!(fsm.entry_trigger(), Some(dec!(99.5)));
        assert_eq!(fsm.stop(), Some(dec!(100.5)));
        assert_eq!(
            fsm.stop().unwrap() - fsm.entry_trigger().unwrap(),
            dec!(1.0)
        );
    }

    #[test]
    fn entry_hit_opens_and_enters_profit_window() {
        let mut fsm = long_fsm();
        let mut out = Vec::new();
        fsm.on_signal(0);
        fsm.on_tick(tick("100.0", 1000), &mut out);
        fsm.on_tick(tick("100.6", 2000), &mut out);

        assert_eq!(fsm.phase(), SidePhase::ProfitWindow);
        let pos = fsm.position().unwrap();
        assert_eq!(pos.entry_price, dec!(100.6));
        assert_eq!(pos.stop, dec!(99.5));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].reason, OrderReason::OpenLong);
        assert_eq!(fsm.profit_window_start(), Some(2000));
    }

    #[test]
    fn entry_miss_enters_wait_with_residual() {
        let mut fsm = long_fsm();
        let mut out = Vec::new();
        fsm.on_signal(0);
        fsm.on_tick(tick("200.0", 500), &mut out);
        fsm.on_tick(tick("199.8", 1500), &mut out);

        assert_eq!(fsm.phase(), SidePhase::WaitWindow);
        assert_eq!(fsm.wait_window_duration_ms(), Some(59_000));
        assert_eq!(fsm.wait_window_source(), Some(WaitSource::Entry));
        assert!(out.is_empty());
    }

    #[test]
    fn wait_resolution_re_enters_entry_window_same_anchors() {
        let mut fsm = long_fsm();
        let mut out = Vec::new();
        fsm.on_signal(0);
        fsm.on_tick(tick("200.0", 500), &mut out);
        fsm.on_tick(tick("199.8", 1500), &mut out);

        // Inside the wait nothing happens.
        fsm.on_tick(tick("250.0", 30_000), &mut out);
        assert_eq!(fsm.phase(), SidePhase::WaitWindow);
        assert!(out.is_empty());

        // The resolving tick is not decisive.
        fsm.on_tick(tick("250.0", 60_500), &mut out);
        assert_eq!(fsm.phase(), SidePhase::EntryWindow);
        assert!(out.is_empty());

        // The next tick decides against the original anchors.
        fsm.on_tick(tick("200.6", 61_500), &mut out);
        assert_eq!(fsm.phase(), SidePhase::ProfitWindow);
        assert_eq!(out[0].price, dec!(200.6));
    }

    #[test]
    fn stop_hit_closes_and_waits_with_residual() {
        let mut fsm = long_fsm();
        let mut out = Vec::new();
        fsm.on_signal(0);
        fsm.on_tick(tick("100.0", 1000), &mut out);
        fsm.on_tick(tick("100.6", 2000), &mut out);
        out.clear();

        fsm.on_tick(tick("99.4", 3000), &mut out);
        assert_eq!(fsm.phase(), SidePhase::WaitWindow);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].reason, OrderReason::CloseLong);
        assert_eq!(out[0].price, dec!(99.4));
        assert_eq!(fsm.wait_window_duration_ms(), Some(59_000));
        assert_eq!(fsm.wait_window_source(), Some(WaitSource::Profit));
        assert!(fsm.position().is_none());
    }

    #[test]
    fn profit_window_rolls_after_sixty_seconds() {
        let mut fsm = long_fsm();
        let mut out = Vec::new();
        fsm.on_signal(0);
        fsm.on_tick(tick("100.0", 1000), &mut out);
        fsm.on_tick(tick("100.6", 2000), &mut out);

        fsm.on_tick(tick("101.0", 62_000), &mut out);
        assert_eq!(fsm.phase(), SidePhase::ProfitWindow);
        assert_eq!(fsm.profit_window_start(), Some(62_000));
        // Stop is unchanged across the roll.
        assert_eq!(fsm.position().unwrap().stop, dec!(99.5));
    }

    #[test]
    fn rearm_loop_offers_one_first_tick_per_lap() {
        let mut fsm = long_fsm();
        let mut out = Vec::new();
        fsm.on_signal(0);
        fsm.on_tick(tick("100.0", 1000), &mut out);
        fsm.on_tick(tick("100.6", 2000), &mut out);
        fsm.on_tick(tick("99.4", 3000), &mut out);
        out.clear();

        // Wait window (59 s from t=3000) resolves at t=62000.
        fsm.on_tick(tick("99.0", 62_000), &mut out);
        assert_eq!(fsm.phase(), SidePhase::WaitForEntry);
        assert_eq!(fsm.wait_for_entry_start(), Some(62_000));

        // First tick misses; later ticks in the same lap are ignored even
        // above the trigger.
        fsm.on_tick(tick("99.4", 62_500), &mut out);
        fsm.on_tick(tick("100.9", 70_000), &mut out);
        assert!(out.is_empty());
        assert_eq!(fsm.phase(), SidePhase::WaitForEntry);

        // Lap restart at +60 s; the restarting tick is not evaluated.
        fsm.on_tick(tick("100.9", 122_000), &mut out);
        assert!(out.is_empty());

        // The next first tick triggers against the original anchors.
        fsm.on_tick(tick("100.7", 122_500), &mut out);
        assert_eq!(fsm.phase(), SidePhase::ProfitWindow);
        assert_eq!(out[0].price, dec!(100.7));
        assert_eq!(fsm.profit_window_start(), Some(122_500));
    }

    #[test]
    fn exhausted_budget_skips_wait_window() {
        let mut fsm = long_fsm();
        let mut out = Vec::new();
        fsm.on_signal(0);
        fsm.on_tick(tick("100.0", 1000), &mut out);
        // Decision tick arrives after the full window budget: residual <= 0.
        fsm.on_tick(tick("99.0", 62_000), &mut out);

        assert_eq!(fsm.phase(), SidePhase::EntryWindow);
        assert_eq!(fsm.entry_window_start(), Some(62_000));

        fsm.on_tick(tick("100.5", 62_100), &mut out);
        assert_eq!(fsm.phase(), SidePhase::ProfitWindow);
    }

    #[test]
    fn mid_cycle_signal_relatches_anchors() {
        let mut fsm = long_fsm();
        let mut out = Vec::new();
        fsm.on_signal(0);
        fsm.on_tick(tick("100.0", 1000), &mut out);
        assert_eq!(fsm.entry_trigger(), Some(dec!(100.5)));

        fsm.on_signal(1500);
        assert_eq!(fsm.phase(), SidePhase::Signal);
        assert_eq!(fsm.anchor(), None);

        fsm.on_tick(tick("200.0", 2000), &mut out);
        assert_eq!(fsm.entry_trigger(), Some(dec!(200.5)));
        assert_eq!(fsm.stop(), Some(dec!(199.5)));
    }

    #[test]
    fn open_guard_takes_miss_path_when_holding() {
        let mut fsm = long_fsm();
        let mut out = Vec::new();
        fsm.on_signal(0);
        fsm.on_tick(tick("100.0", 1000), &mut out);
        fsm.on_tick(tick("100.6", 2000), &mut out);
        assert!(fsm.position().is_some());
        out.clear();

        // Same-side signal while holding; the new cycle must not double-open.
        fsm.on_signal(3000);
        fsm.on_tick(tick("100.0", 4000), &mut out);
        fsm.on_tick(tick("100.6", 5000), &mut out);
        assert!(out.is_empty());
        assert_eq!(fsm.phase(), SidePhase::WaitWindow);
        assert_eq!(fsm.position().unwrap().entry_price, dec!(100.6));
    }

    #[test]
    fn manual_close_emits_override_and_resets() {
        let mut fsm = long_fsm();
        let mut out = Vec::new();
        fsm.on_signal(0);
        fsm.on_tick(tick("100.0", 1000), &mut out);
        fsm.on_tick(tick("100.6", 2000), &mut out);
        out.clear();

        fsm.manual_close(dec!(101.0), 3000, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].reason, OrderReason::ManualOverride);
        assert_eq!(fsm.phase(), SidePhase::WaitForSignal);
        assert!(fsm.position().is_none());
        assert!(fsm.anchor().is_none());
    }

    #[test]
    fn fast_forward_resolves_expired_wait_window() {
        let mut fsm = long_fsm();
        let mut out = Vec::new();
        fsm.on_signal(0);
        fsm.on_tick(tick("100.0", 1000), &mut out);
        fsm.on_tick(tick("100.6", 2000), &mut out);
        fsm.on_tick(tick("99.4", 3000), &mut out);
        assert_eq!(fsm.phase(), SidePhase::WaitWindow);

        // Simulated restart long after the wait deadline.
        fsm.fast_forward(500_000);
        assert_eq!(fsm.phase(), SidePhase::WaitForEntry);
        assert_eq!(fsm.wait_for_entry_start(), Some(500_000));
    }

    #[test]
    fn fast_forward_restarts_stale_profit_window() {
        let mut fsm = long_fsm();
        let mut out = Vec::new();
        fsm.on_signal(0);
        fsm.on_tick(tick("100.0", 1000), &mut out);
        fsm.on_tick(tick("100.6", 2000), &mut out);

        fsm.fast_forward(200_000);
        assert_eq!(fsm.phase(), SidePhase::ProfitWindow);
        assert_eq!(fsm.profit_window_start(), Some(200_000));
    }

    #[test]
    fn serde_round_trip() {
        let mut fsm = long_fsm();
        let mut out = Vec::new();
        fsm.on_signal(0);
        fsm.on_tick(tick("100.0", 1000), &mut out);

        let json = serde_json::to_string(&fsm).unwrap();
        let restored: SideFsm = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.phase(), fsm.phase());
        assert_eq!(restored.entry_trigger(), fsm.entry_trigger());
        assert_eq!(restored.entry_window_start(), fsm.entry_window_start());
    }
}
