//! The engine task: one owner for all trading state.
//!
//! Signals, ticks, manual overrides and status reads arrive as commands on a
//! single channel and are processed one at a time, so the FSM, broker and
//! session never see concurrent mutation and every status read is one
//! consistent view. Suspension happens only at the channel and the snapshot
//! timer; the trading core itself is synchronous.

use crate::broker::PaperBroker;
use crate::config::EngineConfig;
use crate::fsm::{DualFsm, FsmStatus};
use crate::metrics;
use crate::pnl::{PnlContext, PnlSnapshot, TradeAction, TradeRecord};
use crate::session::SessionManager;
use crate::snapshot::{EngineSnapshot, SnapshotStore};
use crate::types::{OrderIntent, OrderRequest, Tick, TradeSignal};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Duration, Instant};
use tracing::{error, info, warn};

/// Everything the engine can be asked to do.
#[derive(Debug)]
pub enum EngineCommand {
    Signal(TradeSignal),
    Tick(Tick),
    ManualClose,
    Status(oneshot::Sender<StatusReport>),
    ResetDaily,
    Shutdown,
}

/// Cheap handle for submitting commands from the HTTP and feed edges.
pub type EngineHandle = mpsc::UnboundedSender<EngineCommand>;

/// Session counters for the status payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub mode: String,
    pub paper_cumulative_pnl: Decimal,
    pub live_cumulative_pnl: Decimal,
    pub total_live_realised_pnl: Decimal,
    pub daily_realised_pnl: Decimal,
    pub daily_loss_limit: Decimal,
    pub daily_stop_active: bool,
}

/// Full engine state as served by `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub symbol: String,
    #[serde(flatten)]
    pub fsm: FsmStatus,
    pub pnl: PnlSnapshot,
    pub session: SessionStatus,
}

pub struct Engine {
    symbol: String,
    fsm: DualFsm,
    broker: PaperBroker,
    session: SessionManager,
    store: SnapshotStore,
}

impl Engine {
    /// Build a fresh engine, or restore one from the snapshot store. Live
    /// window timers are re-evaluated against the current clock before any
    /// tick is processed, so expirations during downtime are not missed.
    pub fn bootstrap(config: &EngineConfig, store: SnapshotStore) -> Self {
        let (fsm, session, pnl) = match store.load(&config.symbol) {
            Some(snapshot) => (snapshot.fsm, snapshot.session, snapshot.pnl),
            None => (
                DualFsm::new(config.order_qty),
                SessionManager::new(config.daily_loss_limit),
                PnlContext::new(&config.symbol),
            ),
        };
        let mut engine = Self {
            symbol: config.symbol.clone(),
            fsm,
            broker: PaperBroker::new(pnl),
            session,
            store,
        };
        engine.fsm.fast_forward(Utc::now().timestamp_millis());
        engine
    }

    /// Consume commands until shutdown, persisting on a fixed cadence and
    /// once more on the way out.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<EngineCommand>, config: EngineConfig) {
        let period = Duration::from_secs(config.snapshot_interval_secs.max(1));
        let mut snapshot_timer = interval_at(Instant::now() + period, period);
        info!(symbol = %self.symbol, "Engine started");

        loop {
            tokio::select! {
                _ = snapshot_timer.tick() => self.persist(),
                cmd = rx.recv() => match cmd {
                    Some(EngineCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle(cmd),
                },
            }
        }

        self.persist();
        info!(symbol = %self.symbol, "Engine stopped");
    }

    pub fn handle(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Signal(signal) => self.handle_signal(signal),
            EngineCommand::Tick(tick) => self.handle_tick(tick),
            EngineCommand::ManualClose => self.handle_manual_close(),
            EngineCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
            EngineCommand::ResetDaily => self.session.reset_daily_stats(),
            EngineCommand::Shutdown => {}
        }
    }

    /// Accept a strategy signal unless the daily stop gates live entries.
    pub fn handle_signal(&mut self, signal: TradeSignal) {
        if !self.session.entry_allowed() {
            warn!(kind = %signal.kind, "Dropping signal: daily stop active in LIVE mode");
            return;
        }
        metrics::record_signal(&signal.kind.to_string());
        self.fsm.on_signal(signal);
    }

    /// Feed one tick through both sides and settle any resulting orders.
    pub fn handle_tick(&mut self, tick: Tick) {
        metrics::record_tick(&self.symbol);
        self.broker.pnl_mut().update_mark_price(tick.price);
        let orders = self.fsm.on_tick(tick);
        self.settle(orders);
        if let Some(total) = self.broker.pnl().total_pnl().to_f64() {
            metrics::set_total_pnl(&self.symbol, total);
        }
    }

    /// Close any open positions at the last observed price and idle the FSM.
    pub fn handle_manual_close(&mut self) {
        let orders = self.fsm.manual_close();
        self.settle(orders);
    }

    fn settle(&mut self, orders: Vec<OrderRequest>) {
        for order in orders {
            let Some(fill) = self.broker.place(order) else {
                continue;
            };
            if order.reason.intent() == OrderIntent::Close {
                let trade = TradeRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    side: order.side,
                    action: TradeAction::Close,
                    qty: order.qty,
                    price: order.price,
                    realized_pnl: Some(fill.realized_delta),
                    reason: order.reason.to_string(),
                    ts: order.ts,
                };
                self.session.record_realized(fill.realized_delta, trade);
            }
        }
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            symbol: self.symbol.clone(),
            fsm: self.fsm.status(),
            pnl: self.broker.pnl().snapshot(),
            session: SessionStatus {
                mode: self.session.mode().to_string(),
                paper_cumulative_pnl: self.session.paper_cumulative_pnl(),
                live_cumulative_pnl: self.session.live_cumulative_pnl(),
                total_live_realised_pnl: self.session.total_live_realised_pnl(),
                daily_realised_pnl: self.session.daily_realised_pnl(),
                daily_loss_limit: self.session.daily_loss_limit(),
                daily_stop_active: self.session.daily_stop_active(),
            },
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn fsm(&self) -> &DualFsm {
        &self.fsm
    }

    pub fn pnl(&self) -> &PnlContext {
        self.broker.pnl()
    }

    /// One atomic view of the full state for serialization.
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            fsm: self.fsm.clone(),
            session: self.session.clone(),
            pnl: self.broker.pnl().clone(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Persist the current state. Failures are logged and the engine keeps
    /// running on its in-memory state.
    fn persist(&self) {
        if let Err(e) = self.store.save(&self.symbol, self.snapshot()) {
            metrics::record_snapshot_failure(&self.symbol);
            error!(symbol = %self.symbol, error = %e, "Snapshot write failed; continuing in-memory");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("symbol", &self.symbol)
            .field("mode", &self.session.mode())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TradingMode;
    use crate::types::SignalKind;
    use rust_decimal_macros::dec;

    fn engine() -> Engine {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        // The tempdir guard drops here; persistence is not under test.
        Engine::bootstrap(&EngineConfig::default(), store)
    }

    fn signal(kind: SignalKind, ts: i64) -> TradeSignal {
        TradeSignal { kind, ts }
    }

    fn tick(price: &str, ts: i64) -> Tick {
        Tick::new(price.parse().unwrap(), ts)
    }

    #[test]
    fn entry_and_stop_out_round_trip() {
        let mut engine = engine();
        engine.handle_signal(signal(SignalKind::Buy, 0));
        engine.handle_tick(tick("100.0", 1000));
        engine.handle_tick(tick("100.6", 2000));
        assert!(engine.pnl().position(crate::types::Side::Long).is_some());

        engine.handle_tick(tick("99.4", 3000));
        assert_eq!(engine.pnl().realized_pnl(), dec!(-1.2));
        // Paper loss routed into the session.
        assert_eq!(engine.session().paper_cumulative_pnl(), dec!(-1.2));
    }

    #[test]
    fn manual_close_settles_through_session() {
        let mut engine = engine();
        engine.handle_signal(signal(SignalKind::Buy, 0));
        engine.handle_tick(tick("100.0", 1000));
        engine.handle_tick(tick("100.6", 2000));

        engine.handle_manual_close();
        assert!(engine.pnl().position(crate::types::Side::Long).is_none());
        // Closed at the last tick price 100.6: flat trade.
        assert_eq!(engine.session().paper_cumulative_pnl(), dec!(0));
    }

    #[test]
    fn status_report_is_consistent() {
        let mut engine = engine();
        engine.handle_signal(signal(SignalKind::Buy, 0));
        engine.handle_tick(tick("100.0", 1000));

        let status = engine.status();
        assert_eq!(status.fsm.buy_state, "ENTRY_WINDOW");
        assert_eq!(status.session.mode, "PAPER");
        assert_eq!(status.fsm.anchors.buy_entry_trigger, Some(dec!(100.5)));
        assert_eq!(status.pnl.last_price, Some(dec!(100.0)));
    }

    #[test]
    fn signals_dropped_while_daily_stop_holds_in_live() {
        let mut engine = engine();
        // Reach LIVE, bank some profit, reset the day, then breach the
        // daily limit while cumulative live P&L stays positive.
        engine.session.update_paper_pnl(dec!(1000));
        assert_eq!(engine.session.mode(), TradingMode::Live);
        engine.session.update_live_pnl(dec!(600));
        engine.session.reset_daily_stats();
        engine.session.update_live_pnl(dec!(-550));
        assert_eq!(engine.session.mode(), TradingMode::Live);
        assert!(engine.session.daily_stop_active());

        engine.handle_signal(signal(SignalKind::Buy, 0));
        assert_eq!(engine.fsm().long().phase(), crate::fsm::SidePhase::WaitForSignal);

        // The daily reset lifts the gate.
        engine.session.reset_daily_stats();
        engine.handle_signal(signal(SignalKind::Buy, 1));
        assert_eq!(engine.fsm().long().phase(), crate::fsm::SidePhase::Signal);
    }
}
