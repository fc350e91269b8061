//! Daily JSON snapshot files: `<dir>/<YYYY-MM-DD>/<account>.json`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::PersistenceSink;
use crate::trade::{Trade, TradeSnapshotV1};

pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, account_id: &str, day: NaiveDate) -> PathBuf {
        self.root
            .join(day.format("%Y-%m-%d").to_string())
            .join(format!("{account_id}.json"))
    }
}

#[async_trait]
impl PersistenceSink for JsonFileStore {
    async fn load_trades(&self, account_id: &str, day: NaiveDate) -> Result<Vec<Trade>> {
        let path = self.path_for(account_id, day);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {path:?}"))?;
        let records: Vec<serde_json::Value> =
            serde_json::from_str(&raw).with_context(|| format!("Malformed snapshot {path:?}"))?;

        let trades = records
            .into_iter()
            .map(|record| -> Result<Trade> {
                let snapshot = TradeSnapshotV1::decode(&record.to_string())?;
                Ok(snapshot.into_trade()?)
            })
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Invalid trade in {path:?}"))?;

        info!("📂 [PERSISTENCE] Loaded {} trades from {:?}", trades.len(), path);
        Ok(trades)
    }

    /// Rewrites the whole file, so a repeated save leaves the same content.
    async fn save_trades(&self, account_id: &str, day: NaiveDate, trades: &[Trade]) -> Result<()> {
        let path = self.path_for(account_id, day);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {parent:?}"))?;
        }

        let snapshots: Vec<TradeSnapshotV1> = trades.iter().map(TradeSnapshotV1::from_trade).collect();
        let json = serde_json::to_string_pretty(&snapshots)?;

        // write-then-rename so a crash never leaves a torn file
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {tmp:?}"))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace {path:?}"))?;

        debug!(account_id, trades = trades.len(), "Trades saved to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Direction;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("ote-json-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_save_load_and_overwrite() {
        let dir = scratch_dir();
        let store = JsonFileStore::new(&dir);
        let day = NaiveDate::from_ymd_opt(2024, 10, 3).unwrap();

        let mut trade = Trade::new("hedge", "NIFTY24O1026000CE", Direction::Long, 25, Utc::now());
        trade.requested_entry = dec!(1.1);
        let trades = vec![trade];

        store.save_trades("AB1234", day, &trades).await.unwrap();
        store.save_trades("AB1234", day, &trades).await.unwrap();

        assert!(store.path_for("AB1234", day).ends_with("2024-10-03/AB1234.json"));
        let loaded = store.load_trades("AB1234", day).await.unwrap();
        assert_eq!(loaded, trades);

        let other_day = day.succ_opt().unwrap();
        assert!(store.load_trades("AB1234", other_day).await.unwrap().is_empty());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
