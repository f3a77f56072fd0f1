//! Common Types Module
//!
//! Shared types used across the codebase to avoid circular dependencies.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single market trade event. The timestamp is the authoritative clock for
/// all window comparisons in the state machines; wall-clock time is never
/// consulted on the tick path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Trade price in instrument price units.
    pub price: Decimal,
    /// Trade timestamp, epoch milliseconds.
    pub ts: i64,
}

impl Tick {
    pub fn new(price: Decimal, ts: i64) -> Self {
        Self { price, ts }
    }
}

/// Position side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Strategy signal kind as received over the webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    Buy,
    Sell,
}

impl SignalKind {
    /// The position side this signal's FSM opens.
    pub fn side(self) -> Side {
        match self {
            SignalKind::Buy => Side::Long,
            SignalKind::Sell => Side::Short,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Buy => write!(f, "BUY"),
            SignalKind::Sell => write!(f, "SELL"),
        }
    }
}

/// An accepted strategy signal with its receive timestamp (epoch ms).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub kind: SignalKind,
    pub ts: i64,
}

/// Why an order was placed. Carried alongside every order; the broker
/// classifies open vs close by the tag, never by string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderReason {
    OpenLong,
    CloseLong,
    OpenShort,
    CloseShort,
    ManualOverride,
}

/// Broker-level classification of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderIntent {
    Open,
    Close,
}

impl OrderReason {
    pub fn intent(self) -> OrderIntent {
        match self {
            OrderReason::OpenLong | OrderReason::OpenShort => OrderIntent::Open,
            OrderReason::CloseLong | OrderReason::CloseShort | OrderReason::ManualOverride => {
                OrderIntent::Close
            }
        }
    }
}

impl std::fmt::Display for OrderReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderReason::OpenLong => "OPEN_LONG",
            OrderReason::CloseLong => "CLOSE_LONG",
            OrderReason::OpenShort => "OPEN_SHORT",
            OrderReason::CloseShort => "CLOSE_SHORT",
            OrderReason::ManualOverride => "MANUAL_OVERRIDE",
        };
        write!(f, "{}", s)
    }
}

/// An order the FSM asks the broker to fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderRequest {
    pub side: Side,
    pub qty: Decimal,
    pub price: Decimal,
    pub ts: i64,
    pub reason: OrderReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_classification() {
        assert_eq!(OrderReason::OpenLong.intent(), OrderIntent::Open);
        assert_eq!(OrderReason::OpenShort.intent(), OrderIntent::Open);
        assert_eq!(OrderReason::CloseLong.intent(), OrderIntent::Close);
        assert_eq!(OrderReason::CloseShort.intent(), OrderIntent::Close);
        assert_eq!(OrderReason::ManualOverride.intent(), OrderIntent::Close);
    }

    #[test]
    fn signal_maps_to_side() {
        assert_eq!(SignalKind::Buy.side(), Side::Long);
        assert_eq!(SignalKind::Sell.side(), Side::Short);
    }
}
