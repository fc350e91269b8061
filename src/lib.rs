//! # Options Trade Engine
//!
//! Trade and order lifecycle engine for intraday index options strategies on an
//! Indian broker account.
//!
//! ## Architecture
//!
//! - `config`: Configuration loading and validation
//! - `exchange`: Broker gateway (Kite REST), paper broker and quote feed
//! - `trade`: The trade record, its state machine and persisted snapshot
//! - `manager`: Per-account control loop tracking every order leg
//! - `strategy`: Strategy contract, per-instance run loops and bundled strategies
//! - `risk`: Daily lot sizing and strategy-level pnl budgets
//! - `persistence`: Trade snapshots in SQLite or JSON files
//! - `engine`: Wires the above into one running account
//! - `utils`: Clock, trading calendar and price rounding

pub mod config;
pub mod engine;
pub mod exchange;
pub mod manager;
pub mod persistence;
pub mod risk;
pub mod strategy;
pub mod trade;
pub mod utils;

pub use config::Config;
