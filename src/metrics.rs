//! Prometheus Metrics Module
//!
//! Pre-registered metrics for production observability.

use lazy_static::lazy_static;
use prometheus::{
    opts, register_gauge_vec, register_int_counter_vec, Encoder, GaugeVec, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    /// Ticks consumed from the market stream
    pub static ref TICKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("signalforge_ticks_total", "Market ticks consumed"),
        &["symbol"]
    ).expect("FATAL: Failed to register TICKS_TOTAL metric - check for duplicate registration");

    /// Webhook signals accepted (by kind)
    pub static ref SIGNALS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("signalforge_signals_total", "Strategy signals accepted"),
        &["kind"]
    ).expect("FATAL: Failed to register SIGNALS_TOTAL metric - check for duplicate registration");

    /// Paper orders filled (by side and intent)
    pub static ref ORDERS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("signalforge_orders_total", "Paper orders filled"),
        &["side", "intent"]
    ).expect("FATAL: Failed to register ORDERS_TOTAL metric - check for duplicate registration");

    /// FSM phase transitions
    pub static ref FSM_TRANSITIONS: IntCounterVec = register_int_counter_vec!(
        opts!("signalforge_fsm_transitions_total", "FSM phase transitions"),
        &["side", "from", "to"]
    ).expect("FATAL: Failed to register FSM_TRANSITIONS metric - check for duplicate registration");

    /// Market stream reconnection attempts
    pub static ref WS_RECONNECTIONS: IntCounterVec = register_int_counter_vec!(
        opts!("signalforge_ws_reconnections_total", "Market stream reconnection attempts"),
        &["status"]
    ).expect("FATAL: Failed to register WS_RECONNECTIONS metric - check for duplicate registration");

    /// Snapshot persistence failures
    pub static ref SNAPSHOT_FAILURES: IntCounterVec = register_int_counter_vec!(
        opts!("signalforge_snapshot_failures_total", "State snapshot write failures"),
        &["symbol"]
    ).expect("FATAL: Failed to register SNAPSHOT_FAILURES metric - check for duplicate registration");

    /// Current total P&L (realized + unrealized)
    pub static ref TOTAL_PNL: GaugeVec = register_gauge_vec!(
        opts!("signalforge_total_pnl", "Current total P&L"),
        &["symbol"]
    ).expect("FATAL: Failed to register TOTAL_PNL metric - check for duplicate registration");
}

pub fn record_tick(symbol: &str) {
    TICKS_TOTAL.with_label_values(&[symbol]).inc();
}

pub fn record_signal(kind: &str) {
    SIGNALS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_order(side: &str, intent: &str) {
    ORDERS_TOTAL.with_label_values(&[side, intent]).inc();
}

pub fn record_transition(side: &str, from: &str, to: &str) {
    FSM_TRANSITIONS.with_label_values(&[side, from, to]).inc();
}

pub fn record_ws_reconnection(status: &str) {
    WS_RECONNECTIONS.with_label_values(&[status]).inc();
}

pub fn record_snapshot_failure(symbol: &str) {
    SNAPSHOT_FAILURES.with_label_values(&[symbol]).inc();
}

pub fn set_total_pnl(symbol: &str, pnl: f64) {
    TOTAL_PNL.with_label_values(&[symbol]).set(pnl);
}

/// Get metrics as text for the /metrics endpoint.
///
/// Handles encoding errors gracefully instead of panicking.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode Prometheus metrics: {}", e);
        return String::new();
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Prometheus metrics buffer is not valid UTF-8: {}", e);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_metrics() {
        record_tick("TEST-SYM");
        record_order("LONG", "open");

        let output = gather_metrics();
        assert!(
            output.contains("signalforge"),
            "Expected metrics output to contain 'signalforge', got: {}",
            &output[..output.len().min(200)]
        );
    }
}
