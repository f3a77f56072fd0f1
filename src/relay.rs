//! Webhook relay fan-out.
//!
//! Accepted signals can be re-broadcast to registered downstream URLs. The
//! set lives in memory; fan-out is fire-and-forget with a per-relay timeout
//! so a slow relay never delays the webhook response or the engine.

use crate::types::SignalKind;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Per-relay request timeout.
const RELAY_TIMEOUT_SECS: u64 = 5;

/// Payload delivered to each relay.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayPayload {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub side: String,
    pub raw_message: String,
    pub ts: i64,
}

impl RelayPayload {
    pub fn new(side: SignalKind, raw_message: &str, ts: i64) -> Self {
        Self {
            message: format!("Signal {side}"),
            kind: "tradingview-signal".to_string(),
            side: side.to_string(),
            raw_message: raw_message.to_string(),
            ts,
        }
    }
}

/// In-memory registry of relay URLs.
#[derive(Debug)]
pub struct RelayRegistry {
    urls: RwLock<BTreeSet<String>>,
    client: reqwest::Client,
}

impl Default for RelayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayRegistry {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(RELAY_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            urls: RwLock::new(BTreeSet::new()),
            client,
        }
    }

    /// Add a relay URL. Only http(s) schemes are accepted.
    pub async fn add(&self, url: &str) -> Result<bool, String> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(format!("invalid relay url '{url}': must be http(s)"));
        }
        Ok(self.urls.write().await.insert(url.to_string()))
    }

    pub async fn remove(&self, url: &str) -> bool {
        self.urls.write().await.remove(url)
    }

    pub async fn list(&self) -> Vec<String> {
        self.urls.read().await.iter().cloned().collect()
    }

    /// POST the payload to every registered relay concurrently. Failures
    /// are logged and dropped; nothing here can affect engine state.
    pub async fn fan_out(self: Arc<Self>, payload: RelayPayload) {
        let urls = self.list().await;
        for url in urls {
            let client = self.client.clone();
            let payload = payload.clone();
            tokio::spawn(async move {
                match client.post(&url).json(&payload).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        debug!(%url, "Relay delivered");
                    }
                    Ok(resp) => {
                        warn!(%url, status = %resp.status(), "Relay rejected payload");
                    }
                    Err(e) => {
                        warn!(%url, error = %e, "Relay delivery failed");
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_validates_scheme() {
        let registry = RelayRegistry::new();
        assert!(registry.add("https://example.com/hook").await.unwrap());
        assert!(registry.add("http://example.com/hook").await.unwrap());
        assert!(registry.add("ftp://example.com").await.is_err());
        assert!(registry.add("example.com").await.is_err());
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let registry = RelayRegistry::new();
        assert!(registry.add("https://example.com/a").await.unwrap());
        assert!(!registry.add("https://example.com/a").await.unwrap());
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn remove_unknown_is_false() {
        let registry = RelayRegistry::new();
        assert!(!registry.remove("https://example.com/a").await);

        registry.add("https://example.com/a").await.unwrap();
        assert!(registry.remove("https://example.com/a").await);
        assert!(registry.list().await.is_empty());
    }

    #[test]
    fn payload_shape() {
        let payload = RelayPayload::new(SignalKind::Buy, "Accepted Entry", 123);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "tradingview-signal");
        assert_eq!(json["side"], "BUY");
        assert_eq!(json["rawMessage"], "Accepted Entry");
        assert_eq!(json["ts"], 123);
    }
}
