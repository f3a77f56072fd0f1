//! HTTP edge: webhook ingress, status egress, relays CRUD, health, metrics.
//!
//! Handlers never touch trading state directly. The webhook publishes to
//! the signal bus and returns immediately; status reads round-trip a oneshot
//! through the engine's command channel so every response is one consistent
//! snapshot.

use crate::bus::SignalBus;
use crate::engine::{EngineCommand, EngineHandle, StatusReport};
use crate::metrics;
use crate::relay::{RelayPayload, RelayRegistry};
use crate::types::{SignalKind, TradeSignal};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{info, warn};

lazy_static! {
    static ref ENTRY_RE: Regex =
        Regex::new(r"(?i)accepted\s+entry").expect("entry pattern is valid");
    static ref EXIT_RE: Regex = Regex::new(r"(?i)accepted\s+exit").expect("exit pattern is valid");
}

/// Shared state for all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub bus: Arc<SignalBus>,
    pub relays: Arc<RelayRegistry>,
    pub feed_connected: Arc<AtomicBool>,
    pub symbol: String,
    pub started_at: Instant,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/status", get(status))
        .route(
            "/relays",
            get(list_relays).post(add_relay).delete(remove_relay),
        )
        .route("/close-all", post(close_all))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
}

/// Bind and serve until the process shuts down. A bind failure is fatal and
/// propagates to the caller.
pub async fn run_server(state: AppState, port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app(state)).await
}

/// Extract the signal text from a webhook body: a JSON object's
/// `message`/`text`/`signal` field, or the raw body itself.
fn signal_text(body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for key in ["message", "text", "signal"] {
            if let Some(Value::String(s)) = map.get(key) {
                return s.clone();
            }
        }
    }
    body.to_string()
}

/// Classify webhook text. `Accepted Entry` means BUY, `Accepted Exit` means
/// SELL, case-insensitive; anything else is rejected.
pub fn parse_signal(body: &str) -> Option<(SignalKind, String)> {
    let text = signal_text(body);
    if ENTRY_RE.is_match(&text) {
        Some((SignalKind::Buy, text))
    } else if EXIT_RE.is_match(&text) {
        Some((SignalKind::Sell, text))
    } else {
        None
    }
}

async fn webhook(State(state): State<AppState>, body: String) -> (StatusCode, Json<Value>) {
    let Some((kind, raw)) = parse_signal(&body) else {
        warn!(body = %body.chars().take(120).collect::<String>(), "Rejected webhook: no recognizable signal");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "unrecognized signal"})),
        );
    };

    let ts = Utc::now().timestamp_millis();
    let signal = TradeSignal { kind, ts };
    info!(kind = %kind, ts, "Webhook signal accepted");
    state.bus.publish(signal);

    let payload = RelayPayload::new(kind, &raw, ts);
    tokio::spawn(Arc::clone(&state.relays).fan_out(payload));

    (StatusCode::OK, Json(json!({"status": "ok"})))
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusReport>, StatusCode> {
    let (tx, rx) = oneshot::channel();
    state
        .engine
        .send(EngineCommand::Status(tx))
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    let report = rx.await.map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct RelayBody {
    url: String,
}

async fn list_relays(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"relays": state.relays.list().await}))
}

async fn add_relay(
    State(state): State<AppState>,
    Json(body): Json<RelayBody>,
) -> (StatusCode, Json<Value>) {
    match state.relays.add(&body.url).await {
        Ok(added) => (StatusCode::OK, Json(json!({"added": added, "url": body.url}))),
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({"error": e}))),
    }
}

async fn remove_relay(
    State(state): State<AppState>,
    Json(body): Json<RelayBody>,
) -> Json<Value> {
    let removed = state.relays.remove(&body.url).await;
    Json(json!({"removed": removed, "url": body.url}))
}

async fn close_all(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.engine.send(EngineCommand::ManualClose) {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ok"}))),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "engine unavailable"})),
        ),
    }
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "symbol": state.symbol,
        "feedConnected": state.feed_connected.load(Ordering::Relaxed),
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
        "timestamp": Utc::now().timestamp(),
    }))
}

async fn metrics_endpoint() -> String {
    metrics::gather_metrics()
}
