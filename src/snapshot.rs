//! Engine state persistence with atomic file writes.
//!
//! The state document is JSON keyed by symbol, so several engines can share
//! one data directory. Loads are tolerant: a missing or corrupt file yields
//! a fresh state, and unknown fields are ignored for forward compatibility.
//!
//! # Safety
//! - Uses atomic file writes (write to temp, fsync, rename) for durability

use crate::fsm::DualFsm;
use crate::pnl::PnlContext;
use crate::session::SessionManager;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const STATE_FILE: &str = "state.json";

/// Combined state of the three stateful components at one instant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSnapshot {
    pub fsm: DualFsm,
    pub session: SessionManager,
    pub pnl: PnlContext,
    /// When the snapshot was taken, epoch ms.
    pub timestamp: i64,
}

/// On-disk store for [`EngineSnapshot`]s keyed by symbol.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Open a store under `data_dir`, creating the directory if needed.
    pub fn open(data_dir: &Path) -> std::io::Result<Self> {
        fs::create_dir_all(data_dir)?;
        Ok(Self {
            path: data_dir.join(STATE_FILE),
        })
    }

    /// Load the snapshot for `symbol`, or `None` when absent or unreadable.
    pub fn load(&self, symbol: &str) -> Option<EngineSnapshot> {
        let data = fs::read_to_string(&self.path).ok()?;
        let mut map: HashMap<String, EngineSnapshot> = match serde_json::from_str(&data) {
            Ok(map) => map,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Corrupt state file; starting fresh");
                return None;
            }
        };
        let snapshot = map.remove(symbol)?;
        info!(symbol, timestamp = snapshot.timestamp, "State restored from snapshot");
        Some(snapshot)
    }

    /// Persist the snapshot for `symbol`, preserving other symbols' entries.
    ///
    /// Uses write-to-temp, fsync, rename: POSIX guarantees the rename is
    /// atomic on the same filesystem, so a crash leaves either the old file
    /// or the new one, never a partial write.
    pub fn save(
        &self,
        symbol: &str,
        snapshot: EngineSnapshot,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut map: HashMap<String, EngineSnapshot> = fs::read_to_string(&self.path)
            .ok()
            .and_then(|data| serde_json::from_str(&data).ok())
            .unwrap_or_default();
        map.insert(symbol.to_string(), snapshot);

        let json = serde_json::to_string_pretty(&map)?;
        let temp_path = self.path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, &self.path)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SignalKind, Tick, TradeSignal};
    use rust_decimal_macros::dec;

    fn sample_snapshot() -> EngineSnapshot {
        let mut fsm = DualFsm::new(dec!(1));
        fsm.on_signal(TradeSignal {
            kind: SignalKind::Buy,
            ts: 0,
        });
        fsm.on_tick(Tick::new(dec!(100.0), 1000));
        EngineSnapshot {
            fsm,
            session: SessionManager::new(dec!(-500)),
            pnl: PnlContext::new("BTCUSDT"),
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();

        store.save("BTCUSDT", sample_snapshot()).unwrap();
        let restored = store.load("BTCUSDT").unwrap();
        assert_eq!(restored.timestamp, 1_700_000_000_000);
        assert_eq!(restored.fsm.long().anchor(), Some(dec!(100.0)));
    }

    #[test]
    fn load_missing_symbol_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        store.save("BTCUSDT", sample_snapshot()).unwrap();
        assert!(store.load("ETHUSDT").is_none());
    }

    #[test]
    fn load_corrupt_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        fs::write(dir.path().join(STATE_FILE), "{not json").unwrap();
        assert!(store.load("BTCUSDT").is_none());
    }

    #[test]
    fn save_preserves_other_symbols() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        store.save("BTCUSDT", sample_snapshot()).unwrap();
        store
            .save(
                "ETHUSDT",
                EngineSnapshot {
                    timestamp: 42,
                    ..EngineSnapshot::default()
                },
            )
            .unwrap();

        assert!(store.load("BTCUSDT").is_some());
        assert_eq!(store.load("ETHUSDT").unwrap().timestamp, 42);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        let json = serde_json::json!({
            "BTCUSDT": {
                "timestamp": 7,
                "futureField": {"nested": true}
            }
        });
        fs::write(dir.path().join(STATE_FILE), json.to_string()).unwrap();
        let restored = store.load("BTCUSDT").unwrap();
        assert_eq!(restored.timestamp, 7);
    }
}
