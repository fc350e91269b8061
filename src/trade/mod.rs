//! Trade and order model.
//!
//! - [`Trade`]: a strategy position with entry, stop-loss and target legs
//! - [`LegSummary`]: aggregate status of one leg's child orders
//! - [`TradeSnapshotV1`]: versioned persistence schema

mod legs;
mod model;
pub mod snapshot;

pub use legs::LegSummary;
pub use model::{DisableReason, ExitReason, InstrumentKind, Trade, TradeError, TradeState};
pub use snapshot::{SnapshotError, TradeSnapshotV1, TRADE_SCHEMA_VERSION};
