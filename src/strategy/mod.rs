//! Strategy contract and the bundled strategies.
//!
//! A [`Strategy`] holds only decision logic. The framework wraps each configured
//! instance in a [`StrategyInstance`] that owns the shared behaviour:
//! - Entry gating (quantity, stop time, trades per day) before the strategy veto
//! - Daily lot sizing and the strategy-level pnl budget
//! - The enable flag the manager and the run loop both observe
//!
//! Instances are built once at startup by the [`StrategyRegistry`] and driven by
//! one [`spawn_strategy`] task each.

mod cheap_hedge;
mod context;
mod instance;
mod premium_sell;
mod range_breakout;
mod registry;
mod runner;
pub mod strikes;

pub use cheap_hedge::CheapHedge;
pub use context::StrategyContext;
pub use instance::StrategyInstance;
pub use premium_sell::PremiumSell;
pub use range_breakout::RangeBreakout;
pub use registry::{RegistryError, StrategyFactory, StrategyRegistry};
pub use runner::{run_strategy, spawn_strategy};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::exchange::Tick;
use crate::trade::Trade;

#[async_trait]
pub trait Strategy: Send + Sync {
    /// Registered kind, e.g. `"premium_sell"`.
    fn kind(&self) -> &'static str;

    /// One decision pass; may hand new trades to the manager through `ctx`.
    async fn process(&self, ctx: &StrategyContext) -> anyhow::Result<()>;

    /// Strategy-specific reason to refuse an entry, checked after the base rules.
    fn entry_veto(&self, _trade: &Trade, _tick: &Tick) -> Option<String> {
        None
    }

    /// Proposed stop for `trade` at `ltp`; zero means no change.
    fn trailing_stop_loss(&self, _trade: &Trade, _ltp: Decimal) -> Decimal {
        Decimal::ZERO
    }
}
