//! Configuration management for the options trade engine.
//!
//! Loads settings from an optional `config.{toml,yaml,json}` file and
//! `OTE__`-prefixed environment variables (e.g. `OTE__BROKER__API_KEY`).

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::exchange::ProductType;

/// Number of entries in a strategy lot table.
pub const LOT_TABLE_LEN: usize = 10;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub manager: ManagerConfig,
    /// Strategy instances run for the account
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Account identifier used as the persistence key
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_broker_name")]
    pub broker: String,
    #[serde(default)]
    pub client_id: String,
    /// Scales every strategy's lot table
    #[serde(default = "default_multiplier")]
    pub multiplier: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_market_open")]
    pub open: NaiveTime,
    #[serde(default = "default_market_close")]
    pub close: NaiveTime,
    /// Global cutoff for trades without their own square-off time
    #[serde(default = "default_square_off")]
    pub square_off: NaiveTime,
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
    /// Exchange offset from UTC (IST = 330)
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_underlyings")]
    pub underlyings: HashMap<String, UnderlyingConfig>,
}

/// Expiry and strike conventions of one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnderlyingConfig {
    pub weekly_expiry: Weekday,
    pub monthly_expiry: Weekday,
    pub strike_step: u32,
    /// Feed symbol of the cash index, e.g. "NIFTY 50"
    #[serde(default)]
    pub index_symbol: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotBackend {
    #[default]
    Sqlite,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Control cycle period, aligned to the minute
    #[serde(default = "default_cycle_secs")]
    pub cycle_secs: u32,
    /// Phase offset of strategy wake-ups after the manager cycle
    #[serde(default = "default_strategy_offset_secs")]
    pub strategy_offset_secs: u32,
    /// Delay before the single retry of a transient gateway failure
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Broker limit on modifications per order
    #[serde(default = "default_max_modifications")]
    pub max_modifications: u32,
    /// Percentage an open order is moved towards the market each cycle
    #[serde(default = "default_chase_pct")]
    pub chase_pct: Decimal,
    #[serde(default)]
    pub snapshot_backend: SnapshotBackend,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: String,
    /// Quote polling interval of the market data feed
    #[serde(default = "default_feed_interval_ms")]
    pub feed_interval_ms: u64,
    /// Route orders to the in-memory paper broker
    #[serde(default)]
    pub paper: bool,
}

/// One strategy instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Unique instance id; prefix of every trade id it creates
    pub id: String,
    /// Registered strategy kind, e.g. "premium_sell"
    pub kind: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_underlying")]
    pub underlying: String,
    #[serde(default)]
    pub product_type: ProductType,
    #[serde(default = "default_strategy_start")]
    pub start: NaiveTime,
    /// No new entries after this time
    #[serde(default = "default_strategy_stop")]
    pub stop: NaiveTime,
    #[serde(default)]
    pub square_off: Option<NaiveTime>,
    #[serde(default = "default_max_trades_per_day")]
    pub max_trades_per_day: u32,
    /// `[expiry-day, Mon, Tue, Wed, Thu, Fri, 4d, 3d, 2d, 1d before expiry]`
    #[serde(default = "default_lot_table")]
    pub lots: Vec<u32>,
    /// Aggregate stop per lot (negative, 0 = none)
    #[serde(default)]
    pub strategy_sl: Decimal,
    /// Aggregate target per lot (0 = none)
    #[serde(default)]
    pub strategy_target: Decimal,
    /// Skip the day when INDIA VIX is below this (0 = off)
    #[serde(default)]
    pub vix_threshold: Decimal,
    /// Scale the budget by sqrt(VIX / 16)
    #[serde(default)]
    pub vix_adjust: bool,
    /// Strategy-specific parameters, decoded by the strategy constructor
    #[serde(default)]
    pub params: serde_json::Value,
}

// Default value functions
fn default_broker_name() -> String {
    "zerodha".to_string()
}

fn default_multiplier() -> Decimal {
    Decimal::ONE
}

fn default_base_url() -> String {
    "https://api.kite.trade".to_string()
}

fn default_request_timeout() -> u64 {
    7
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

fn default_market_open() -> NaiveTime {
    hm(9, 15)
}

fn default_market_close() -> NaiveTime {
    hm(15, 30)
}

fn default_square_off() -> NaiveTime {
    hm(15, 15)
}

fn default_utc_offset_minutes() -> i32 {
    330
}

fn default_underlyings() -> HashMap<String, UnderlyingConfig> {
    let index = |weekly, monthly, step, symbol: &str| UnderlyingConfig {
        weekly_expiry: weekly,
        monthly_expiry: monthly,
        strike_step: step,
        index_symbol: symbol.to_string(),
    };

    HashMap::from([
        (
            "NIFTY".to_string(),
            index(Weekday::Thu, Weekday::Thu, 50, "NIFTY 50"),
        ),
        (
            "BANKNIFTY".to_string(),
            index(Weekday::Wed, Weekday::Thu, 100, "NIFTY BANK"),
        ),
        (
            "FINNIFTY".to_string(),
            index(Weekday::Tue, Weekday::Tue, 50, "NIFTY FIN SERVICE"),
        ),
    ])
}

fn default_cycle_secs() -> u32 {
    5
}

fn default_strategy_offset_secs() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_modifications() -> u32 {
    25
}

fn default_chase_pct() -> Decimal {
    Decimal::ONE
}

fn default_db_path() -> String {
    "data/trades.db".to_string()
}

fn default_snapshot_dir() -> String {
    "data/snapshots".to_string()
}

fn default_feed_interval_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_underlying() -> String {
    "NIFTY".to_string()
}

fn default_strategy_start() -> NaiveTime {
    hm(9, 20)
}

fn default_strategy_stop() -> NaiveTime {
    hm(15, 0)
}

fn default_max_trades_per_day() -> u32 {
    2
}

fn default_lot_table() -> Vec<u32> {
    vec![1; LOT_TABLE_LEN]
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("OTE"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.account.multiplier > Decimal::ZERO,
            "account multiplier must be positive"
        );

        anyhow::ensure!(
            self.market.open < self.market.close,
            "market open must be before market close"
        );

        anyhow::ensure!(
            self.manager.cycle_secs > 0 && self.manager.cycle_secs <= 60,
            "cycle_secs must be between 1 and 60"
        );

        anyhow::ensure!(
            self.manager.chase_pct >= Decimal::ZERO,
            "chase_pct must not be negative"
        );

        for strategy in &self.strategies {
            strategy
                .validate()
                .with_context(|| format!("Invalid strategy '{}'", strategy.id))?;
        }

        Ok(())
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.id.is_empty(), "strategy id must not be empty");
        anyhow::ensure!(
            !self.id.contains(':'),
            "strategy id must not contain ':'"
        );
        anyhow::ensure!(
            self.lots.len() == LOT_TABLE_LEN,
            "lot table must have {} entries, got {}",
            LOT_TABLE_LEN,
            self.lots.len()
        );
        anyhow::ensure!(self.start < self.stop, "start must be before stop");
        anyhow::ensure!(
            self.strategy_target >= Decimal::ZERO,
            "strategy_target must not be negative"
        );
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            account: AccountConfig::default(),
            broker: BrokerConfig::default(),
            market: MarketConfig::default(),
            manager: ManagerConfig::default(),
            strategies: Vec::new(),
        }
    }
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            broker: default_broker_name(),
            client_id: String::new(),
            multiplier: default_multiplier(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            open: default_market_open(),
            close: default_market_close(),
            square_off: default_square_off(),
            holidays: Vec::new(),
            utc_offset_minutes: default_utc_offset_minutes(),
            underlyings: default_underlyings(),
        }
    }
}

impl Default for UnderlyingConfig {
    fn default() -> Self {
        Self {
            weekly_expiry: Weekday::Thu,
            monthly_expiry: Weekday::Thu,
            strike_step: 50,
            index_symbol: String::new(),
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            cycle_secs: default_cycle_secs(),
            strategy_offset_secs: default_strategy_offset_secs(),
            retry_delay_ms: default_retry_delay_ms(),
            max_modifications: default_max_modifications(),
            chase_pct: default_chase_pct(),
            snapshot_backend: SnapshotBackend::default(),
            db_path: default_db_path(),
            snapshot_dir: default_snapshot_dir(),
            feed_interval_ms: default_feed_interval_ms(),
            paper: false,
        }
    }
}

impl StrategyConfig {
    /// Instance with default settings, used by tests and the `lots` command.
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            enabled: true,
            underlying: default_underlying(),
            product_type: ProductType::default(),
            start: default_strategy_start(),
            stop: default_strategy_stop(),
            square_off: None,
            max_trades_per_day: default_max_trades_per_day(),
            lots: default_lot_table(),
            strategy_sl: Decimal::ZERO,
            strategy_target: Decimal::ZERO,
            vix_threshold: Decimal::ZERO,
            vix_adjust: false,
            params: serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.market.underlyings["BANKNIFTY"].strike_step, 100);
        assert_eq!(config.manager.max_modifications, 25);
    }

    #[test]
    fn test_strategy_lot_table_length_checked() {
        let mut strategy = StrategyConfig::new("ps1", "premium_sell");
        assert!(strategy.validate().is_ok());

        strategy.lots = vec![1, 2, 3];
        assert!(strategy.validate().is_err());
    }

    #[test]
    fn test_strategy_id_rejects_separator() {
        let strategy = StrategyConfig::new("a:b", "premium_sell");
        assert!(strategy.validate().is_err());
    }

    #[test]
    fn test_deserialize_strategy_with_defaults() {
        let json = serde_json::json!({
            "id": "rb",
            "kind": "range_breakout",
            "start": "09:16:00",
            "strategy_sl": "-1500",
            "params": { "breakout_time": "10:00:00" }
        });
        let strategy: StrategyConfig = serde_json::from_value(json).unwrap();
        assert!(strategy.enabled);
        assert_eq!(strategy.underlying, "NIFTY");
        assert_eq!(strategy.strategy_sl, dec!(-1500));
        assert_eq!(strategy.lots.len(), LOT_TABLE_LEN);
        assert_eq!(strategy.start, hm(9, 16));
    }

    #[test]
    fn test_market_config_weekday_names() {
        let json = serde_json::json!({
            "underlyings": {
                "MIDCPNIFTY": { "weekly_expiry": "Mon", "monthly_expiry": "Mon", "strike_step": 25 }
            }
        });
        let market: MarketConfig = serde_json::from_value(json).unwrap();
        assert_eq!(market.underlyings["MIDCPNIFTY"].weekly_expiry, Weekday::Mon);
        assert_eq!(market.open, hm(9, 15));
    }
}
