//! Market data ingress.
//!
//! Subscribes to a trade-stream WebSocket emitting frames with a
//! string-decimal price (`p`) and a millisecond trade timestamp (`T`), and
//! forwards each as a [`Tick`] into the engine. Reconnects up to ten times
//! with a five-second backoff; a clean engine shutdown ends the task.

use crate::engine::{EngineCommand, EngineHandle};
use crate::metrics;
use crate::types::Tick;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// One trade frame from the stream. Extra fields are ignored.
#[derive(Debug, Deserialize)]
struct TradeFrame {
    /// Price as a string decimal.
    p: String,
    /// Trade timestamp in epoch milliseconds.
    #[serde(rename = "T")]
    ts: i64,
}

pub struct MarketFeed {
    url: String,
    engine: EngineHandle,
    connected: Arc<AtomicBool>,
}

impl MarketFeed {
    pub fn new(url: String, engine: EngineHandle, connected: Arc<AtomicBool>) -> Self {
        Self {
            url,
            engine,
            connected,
        }
    }

    /// Connect-and-consume loop. Returns when the engine is gone or the
    /// reconnect budget is exhausted.
    pub async fn run(self) {
        let mut attempts = 0u32;

        loop {
            info!(url = %self.url, attempt = attempts, "Connecting to market stream");
            let ws_stream = match connect_async(&self.url).await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    metrics::record_ws_reconnection("failure");
                    error!(error = %e, "Market stream connection failed");
                    attempts += 1;
                    if attempts >= MAX_RECONNECT_ATTEMPTS {
                        error!("Market stream reconnect budget exhausted; feed stopped");
                        return;
                    }
                    sleep(RECONNECT_BACKOFF).await;
                    continue;
                }
            };

            metrics::record_ws_reconnection("success");
            attempts = 0;
            self.connected.store(true, Ordering::Relaxed);
            info!("Market stream connected");

            let (mut write, mut read) = ws_stream.split();
            let engine_gone = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if self.forward_frame(&text).is_err() {
                            break true;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        warn!("Market stream closed by server");
                        break false;
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Market stream error");
                        break false;
                    }
                    None => {
                        warn!("Market stream ended");
                        break false;
                    }
                    _ => {}
                }
            };

            self.connected.store(false, Ordering::Relaxed);
            if engine_gone {
                info!("Engine channel closed; feed stopped");
                return;
            }

            attempts += 1;
            if attempts >= MAX_RECONNECT_ATTEMPTS {
                error!("Market stream reconnect budget exhausted; feed stopped");
                return;
            }
            info!(delay_secs = RECONNECT_BACKOFF.as_secs(), "Reconnecting to market stream");
            sleep(RECONNECT_BACKOFF).await;
        }
    }

    /// Parse a frame and push the tick to the engine. `Err` means the engine
    /// channel is closed.
    fn forward_frame(&self, text: &str) -> Result<(), ()> {
        let frame: TradeFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "Skipping unparseable frame");
                return Ok(());
            }
        };
        let price = match Decimal::from_str_exact(&frame.p) {
            Ok(price) => price,
            Err(e) => {
                warn!(price = %frame.p, error = %e, "Skipping frame with bad price");
                return Ok(());
            }
        };
        self.engine
            .send(EngineCommand::Tick(Tick::new(price, frame.ts)))
            .map_err(|_| ())
    }
}
