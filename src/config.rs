//! Engine configuration derived from environment variables.
//!
//! CLI flags may override individual fields after `from_env()`; the env is
//! the source of defaults so a plain `.env` file is enough to run.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while assembling or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("SYMBOL must not be empty")]
    EmptySymbol,

    #[error("DAILY_LOSS_LIMIT must be negative, got {0}")]
    NonNegativeLossLimit(Decimal),

    #[error("ORDER_QTY must be positive, got {0}")]
    NonPositiveQty(Decimal),

    #[error("invalid MARKET_WS_URL '{0}': must start with ws:// or wss://")]
    InvalidWsUrl(String),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Instrument symbol, e.g. "BTCUSDT".
    pub symbol: String,
    /// HTTP listen port for webhook/status.
    pub port: u16,
    /// Directory for the persisted state document.
    pub data_dir: PathBuf,
    /// Daily realized-loss halt threshold (negative).
    pub daily_loss_limit: Decimal,
    /// Quantity per FSM entry.
    pub order_qty: Decimal,
    /// Seconds between state snapshots.
    pub snapshot_interval_secs: u64,
    /// Trade-stream WebSocket endpoint. The engine subscribes to
    /// `<url>/<symbol lowercase>@trade`.
    pub market_ws_url: String,
}

fn env_str(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_u16(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_decimal(name: &str, default: Decimal) -> Decimal {
    env::var(name)
        .ok()
        .and_then(|s| Decimal::from_str(s.trim()).ok())
        .unwrap_or(default)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            port: 3000,
            data_dir: PathBuf::from("data"),
            daily_loss_limit: dec!(-500),
            order_qty: Decimal::ONE,
            snapshot_interval_secs: 60,
            market_ws_url: "wss://stream.binance.com:9443/ws".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            symbol: env_str("SYMBOL", &defaults.symbol),
            port: env_u16("PORT", defaults.port),
            data_dir: PathBuf::from(env_str("DATA_DIR", "data")),
            daily_loss_limit: env_decimal("DAILY_LOSS_LIMIT", defaults.daily_loss_limit),
            order_qty: env_decimal("ORDER_QTY", defaults.order_qty),
            snapshot_interval_secs: env_u64(
                "SNAPSHOT_INTERVAL_SECS",
                defaults.snapshot_interval_secs,
            ),
            market_ws_url: env_str("MARKET_WS_URL", &defaults.market_ws_url),
        }
    }

    /// Validate cross-field constraints. Invalid config is a fatal startup
    /// error; the process must not run with a positive loss limit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::EmptySymbol);
        }
        if self.daily_loss_limit >= Decimal::ZERO {
            return Err(ConfigError::NonNegativeLossLimit(self.daily_loss_limit));
        }
        if self.order_qty <= Decimal::ZERO {
            return Err(ConfigError::NonPositiveQty(self.order_qty));
        }
        if !self.market_ws_url.starts_with("ws://") && !self.market_ws_url.starts_with("wss://") {
            return Err(ConfigError::InvalidWsUrl(self.market_ws_url.clone()));
        }
        Ok(())
    }

    /// Full stream URL for the configured symbol.
    pub fn stream_url(&self) -> String {
        format!(
            "{}/{}@trade",
            self.market_ws_url.trim_end_matches('/'),
            self.symbol.to_lowercase()
        )
    }
}
