//! Paper Broker
//!
//! A thin adapter between the state machines and the P&L context. Orders
//! carry a tagged [`OrderReason`]; the broker classifies open vs close by the
//! tag and fills at the given price with no latency model. Guard violations
//! (closing a side that holds nothing) are logged and dropped without
//! touching state.

use crate::metrics;
use crate::pnl::PnlContext;
use crate::types::{OrderIntent, OrderRequest, Side};
use rust_decimal::Decimal;
use tracing::warn;

/// Outcome of a filled order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub request: OrderRequest,
    /// Realized P&L delta for close fills; zero for opens.
    pub realized_delta: Decimal,
}

/// Simulated broker that fills against an in-process [`PnlContext`].
#[derive(Debug)]
pub struct PaperBroker {
    pnl: PnlContext,
}

impl PaperBroker {
    pub fn new(pnl: PnlContext) -> Self {
        Self { pnl }
    }

    pub fn pnl(&self) -> &PnlContext {
        &self.pnl
    }

    pub fn pnl_mut(&mut self) -> &mut PnlContext {
        &mut self.pnl
    }

    pub fn into_pnl(self) -> PnlContext {
        self.pnl
    }

    /// Fill an order. Returns `None` when the guard drops it.
    pub fn place(&mut self, req: OrderRequest) -> Option<Fill> {
        match req.reason.intent() {
            OrderIntent::Open => {
                self.pnl.open(req.side, req.qty, req.price, req.reason, req.ts);
                metrics::record_order(&side_label(req.side), "open");
                Some(Fill {
                    request: req,
                    realized_delta: Decimal::ZERO,
                })
            }
            OrderIntent::Close => match self.pnl.close(req.side, req.qty, req.price, req.reason, req.ts) {
                Some(delta) => {
                    metrics::record_order(&side_label(req.side), "close");
                    Some(Fill {
                        request: req,
                        realized_delta: delta,
                    })
                }
                None => {
                    warn!(
                        side = %req.side,
                        reason = %req.reason,
                        "Dropping close: no open position on this side"
                    );
                    None
                }
            },
        }
    }
}

fn side_label(side: Side) -> String {
    side.to_string()
}
