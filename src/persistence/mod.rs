//! Durable trade snapshots.
//!
//! The manager saves every trade of the account once per cycle and reloads the
//! trading day's trades on restart:
//! - [`SqliteTradeStore`]: one row per trade id, upserted
//! - [`JsonFileStore`]: one JSON file per account and trading day

mod json_file;
mod sqlite;

pub use json_file::JsonFileStore;
pub use sqlite::{SqliteTradeStore, StoredTrade};

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;

use crate::config::{ManagerConfig, SnapshotBackend};
use crate::trade::Trade;

/// Storage for an account's trades, scoped by trading day.
///
/// Saves are idempotent: saving the same list twice leaves one record per trade id.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn load_trades(&self, account_id: &str, day: NaiveDate) -> Result<Vec<Trade>>;

    async fn save_trades(&self, account_id: &str, day: NaiveDate, trades: &[Trade]) -> Result<()>;
}

/// Open the configured snapshot backend.
pub fn open_sink(config: &ManagerConfig) -> Result<Arc<dyn PersistenceSink>> {
    Ok(match config.snapshot_backend {
        SnapshotBackend::Sqlite => Arc::new(SqliteTradeStore::new(&config.db_path)?),
        SnapshotBackend::Json => Arc::new(JsonFileStore::new(&config.snapshot_dir)),
    })
}
