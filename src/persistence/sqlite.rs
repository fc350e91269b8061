//! SQLite trade store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

use super::PersistenceSink;
use crate::trade::{Trade, TradeSnapshotV1, TRADE_SCHEMA_VERSION};

/// A persisted trade with its scoping columns.
#[derive(Debug, Clone)]
pub struct StoredTrade {
    pub account_id: String,
    pub trading_day: NaiveDate,
    pub trade: Trade,
}

pub struct SqliteTradeStore {
    conn: Mutex<Connection>,
}

impl SqliteTradeStore {
    /// Open (or create) the database and its schema. `":memory:"` is accepted.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {parent:?}"))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {path:?}"))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        info!("📂 [PERSISTENCE] Trade store opened at {:?}", path);
        Ok(store)
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                trade_id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                trading_day TEXT NOT NULL,
                strategy TEXT NOT NULL,
                symbol TEXT NOT NULL,
                state TEXT NOT NULL,
                pnl TEXT NOT NULL,
                schema_version INTEGER NOT NULL,
                snapshot TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_account_day ON trades(account_id, trading_day);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    fn upsert(&self, account_id: &str, day: NaiveDate, trades: &[Trade]) -> Result<()> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        let now = Utc::now().to_rfc3339();
        let day = day.to_string();

        for trade in trades {
            let snapshot = TradeSnapshotV1::from_trade(trade)
                .encode()
                .with_context(|| format!("Failed to encode trade {}", trade.trade_id))?;

            tx.execute(
                r#"
                INSERT INTO trades (trade_id, account_id, trading_day, strategy, symbol, state,
                                    pnl, schema_version, snapshot, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(trade_id) DO UPDATE SET
                    state = ?6,
                    pnl = ?7,
                    schema_version = ?8,
                    snapshot = ?9,
                    updated_at = ?10
                "#,
                params![
                    trade.trade_id,
                    account_id,
                    day,
                    trade.strategy,
                    trade.symbol,
                    trade.state().to_string(),
                    trade.pnl.to_string(),
                    TRADE_SCHEMA_VERSION,
                    snapshot,
                    now,
                ],
            )?;
        }

        tx.commit()?;
        debug!(account_id, trades = trades.len(), "Trades saved to database");
        Ok(())
    }

    fn select(&self, account_id: Option<&str>, day: Option<NaiveDate>) -> Result<Vec<StoredTrade>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT trade_id, account_id, trading_day, snapshot
            FROM trades
            WHERE (?1 IS NULL OR account_id = ?1)
              AND (?2 IS NULL OR trading_day = ?2)
            ORDER BY trading_day, account_id, rowid
            "#,
        )?;

        let rows = stmt.query_map(params![account_id, day.map(|d| d.to_string())], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut stored = Vec::new();
        for row in rows {
            let (trade_id, account_id, day, snapshot) = row?;
            let decoded = TradeSnapshotV1::decode(&snapshot)
                .and_then(TradeSnapshotV1::into_trade)
                .map_err(anyhow::Error::from)
                .and_then(|trade| {
                    let trading_day = day.parse::<NaiveDate>()?;
                    Ok((trade, trading_day))
                });

            match decoded {
                Ok((trade, trading_day)) => stored.push(StoredTrade {
                    account_id,
                    trading_day,
                    trade,
                }),
                Err(e) => warn!(%trade_id, error = %e, "Skipping unreadable trade snapshot"),
            }
        }
        Ok(stored)
    }

    /// Every stored trade, optionally restricted to one trading day.
    pub fn history(&self, day: Option<NaiveDate>) -> Result<Vec<StoredTrade>> {
        self.select(None, day)
    }

    /// Number of stored rows for an account.
    pub fn count(&self, account_id: &str) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM trades WHERE account_id = ?1",
            [account_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

#[async_trait]
impl PersistenceSink for SqliteTradeStore {
    async fn load_trades(&self, account_id: &str, day: NaiveDate) -> Result<Vec<Trade>> {
        let trades: Vec<Trade> = self
            .select(Some(account_id), Some(day))?
            .into_iter()
            .map(|s| s.trade)
            .collect();

        info!(
            "📂 [PERSISTENCE] Loaded {} trades for {} on {}",
            trades.len(),
            account_id,
            day
        );
        Ok(trades)
    }

    async fn save_trades(&self, account_id: &str, day: NaiveDate, trades: &[Trade]) -> Result<()> {
        self.upsert(account_id, day, trades)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Direction;
    use crate::trade::TradeState;
    use rust_decimal_macros::dec;
    use tokio_test::assert_ok;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 3).unwrap()
    }

    fn trades() -> Vec<Trade> {
        let now = Utc::now();
        let mut a = Trade::new("ps", "NIFTY24O1025000CE", Direction::Short, 50, now);
        a.requested_entry = dec!(20);
        a.transition(TradeState::Active, now).unwrap();
        a.record_entry_fills(25, dec!(19.9)).unwrap();
        let b = Trade::new("ps", "NIFTY24O1024000PE", Direction::Short, 50, now);
        vec![a, b]
    }

    #[tokio::test]
    async fn test_save_and_load_trades() {
        let store = SqliteTradeStore::new(":memory:").unwrap();
        let trades = trades();

        store.save_trades("AB1234", day(), &trades).await.unwrap();

        let loaded = store.load_trades("AB1234", day()).await.unwrap();
        assert_eq!(loaded, trades);
        assert!(store.load_trades("OTHER", day()).await.unwrap().is_empty());
        assert!(store
            .load_trades("AB1234", day().succ_opt().unwrap())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_repeated_save_is_idempotent() {
        let store = SqliteTradeStore::new(":memory:").unwrap();
        let mut trades = trades();

        assert_ok!(store.save_trades("AB1234", day(), &trades).await);
        assert_ok!(store.save_trades("AB1234", day(), &trades).await);
        assert_eq!(store.count("AB1234").unwrap(), 2);

        trades[0].cmp = dec!(18);
        trades[0].update_pnl();
        store.save_trades("AB1234", day(), &trades).await.unwrap();
        assert_eq!(store.count("AB1234").unwrap(), 2);

        let loaded = store.load_trades("AB1234", day()).await.unwrap();
        assert_eq!(loaded[0].pnl, trades[0].pnl);
    }

    #[tokio::test]
    async fn test_unreadable_rows_are_skipped() {
        let store = SqliteTradeStore::new(":memory:").unwrap();
        store.save_trades("AB1234", day(), &trades()).await.unwrap();
        store
            .conn()
            .execute("UPDATE trades SET snapshot = '{\"schema_version\": 9}' WHERE rowid = 1", [])
            .unwrap();

        let loaded = store.load_trades("AB1234", day()).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(store.history(None).unwrap().len(), 1);
    }
}
