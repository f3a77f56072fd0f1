//! Signal Bus
//!
//! Pub/sub fan-out for strategy signals over two topics (BUY and SELL).
//! Delivery is non-blocking for the publisher and happens in registration
//! order. Subscribers are registered once at startup; afterwards the bus is
//! shared immutably, so publishing needs no locks.

use crate::types::{SignalKind, TradeSignal};
use tokio::sync::mpsc;
use tracing::{debug, warn};

type Subscriber = (mpsc::UnboundedSender<TradeSignal>, String);

#[derive(Debug, Default)]
pub struct SignalBus {
    buy: Vec<Subscriber>,
    sell: Vec<Subscriber>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for one topic. Call before the bus is shared.
    pub fn subscribe(
        &mut self,
        kind: SignalKind,
        sender: mpsc::UnboundedSender<TradeSignal>,
        name: impl Into<String>,
    ) {
        let entry = (sender, name.into());
        match kind {
            SignalKind::Buy => self.buy.push(entry),
            SignalKind::Sell => self.sell.push(entry),
        }
    }

    /// Register a subscriber for both topics.
    pub fn subscribe_all(
        &mut self,
        sender: mpsc::UnboundedSender<TradeSignal>,
        name: impl Into<String>,
    ) {
        let name = name.into();
        self.subscribe(SignalKind::Buy, sender.clone(), name.clone());
        self.subscribe(SignalKind::Sell, sender, name);
    }

    /// Deliver a signal to every subscriber of its topic, in registration
    /// order. Returns how many subscribers received it.
    pub fn publish(&self, signal: TradeSignal) -> usize {
        let subscribers = match signal.kind {
            SignalKind::Buy => &self.buy,
            SignalKind::Sell => &self.sell,
        };
        let mut delivered = 0;
        for (sender, name) in subscribers {
            match sender.send(signal) {
                Ok(()) => {
                    delivered += 1;
                    debug!(subscriber = %name, kind = %signal.kind, "Signal delivered");
                }
                Err(_) => {
                    warn!(subscriber = %name, kind = %signal.kind, "Signal dropped: subscriber gone");
                }
            }
        }
        delivered
    }
}
