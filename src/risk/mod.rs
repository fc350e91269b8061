//! Strategy risk controls.
//!
//! - Daily lot sizing from a lot table with expiry de-rating
//! - Strategy-level pnl budget (stop/target per lot) with trailing ratchet

mod budget;
mod lots;

pub use budget::StrategyBudget;
pub use lots::{derating_factor, LotSizer, EXPIRY_INDICES};
