//! Versioned snapshot schema for persisting trades.
//!
//! Decoding is strict: unknown fields and foreign schema versions are rejected,
//! and every field that may be absent carries an explicit default.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::{DisableReason, ExitReason, InstrumentKind, Trade, TradeState};
use crate::exchange::{Direction, Order, OrderSide, OrderStatus, OrderType, ProductType};

pub const TRADE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("unsupported snapshot schema version {found} (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("trade {trade_id}: filled qty {filled} exceeds qty {qty}")]
    Overfill { trade_id: String, filled: u32, qty: u32 },

    #[error("malformed snapshot: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderSnapshotV1 {
    pub order_id: String,
    pub symbol: String,
    pub exchange: String,
    pub product_type: ProductType,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub price: Decimal,
    pub trigger_price: Decimal,
    pub qty: u32,
    pub status: OrderStatus,
    pub filled_qty: u32,
    #[serde(default)]
    pub pending_qty: u32,
    #[serde(default)]
    pub average_price: Decimal,
    #[serde(default)]
    pub placed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub parent_order_id: Option<String>,
    #[serde(default)]
    pub modifications: u32,
    #[serde(default)]
    pub algo_cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TradeSnapshotV1 {
    pub schema_version: u32,
    pub trade_id: String,
    pub symbol: String,
    pub exchange: String,
    pub strategy: String,
    pub direction: Direction,
    pub product_type: ProductType,
    pub instrument: InstrumentKind,
    #[serde(default)]
    pub underlying: Option<String>,
    #[serde(default)]
    pub place_market_order: bool,
    #[serde(default)]
    pub square_off_at: Option<DateTime<Utc>>,
    pub requested_entry: Decimal,
    #[serde(default)]
    pub entry: Decimal,
    pub qty: u32,
    #[serde(default)]
    pub filled_qty: u32,
    #[serde(default)]
    pub initial_stop_loss: Decimal,
    #[serde(default)]
    pub stop_loss: Decimal,
    #[serde(default)]
    pub stop_loss_pct: Decimal,
    #[serde(default)]
    pub target: Decimal,
    #[serde(default)]
    pub cmp: Decimal,
    pub state: TradeState,
    #[serde(default)]
    pub strategy_timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pnl: Decimal,
    #[serde(default)]
    pub pnl_pct: Decimal,
    #[serde(default)]
    pub exit: Decimal,
    #[serde(default)]
    pub exit_reason: Option<ExitReason>,
    #[serde(default)]
    pub exit_requested: Option<ExitReason>,
    #[serde(default)]
    pub disable_reason: Option<DisableReason>,
    #[serde(default)]
    pub entry_orders: Vec<OrderSnapshotV1>,
    #[serde(default)]
    pub sl_orders: Vec<OrderSnapshotV1>,
    #[serde(default)]
    pub target_orders: Vec<OrderSnapshotV1>,
}

/// Only the version, read before committing to a strict decode.
#[derive(Deserialize)]
struct VersionHeader {
    schema_version: u32,
}

impl From<&Order> for OrderSnapshotV1 {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.order_id.clone(),
            symbol: order.symbol.clone(),
            exchange: order.exchange.clone(),
            product_type: order.product_type,
            order_type: order.order_type,
            side: order.side,
            price: order.price,
            trigger_price: order.trigger_price,
            qty: order.qty,
            status: order.status,
            filled_qty: order.filled_qty,
            pending_qty: order.pending_qty,
            average_price: order.average_price,
            placed_at: order.placed_at,
            updated_at: order.updated_at,
            message: order.message.clone(),
            parent_order_id: order.parent_order_id.clone(),
            modifications: order.modifications,
            algo_cancelled: order.algo_cancelled,
        }
    }
}

impl From<OrderSnapshotV1> for Order {
    fn from(s: OrderSnapshotV1) -> Self {
        Self {
            order_id: s.order_id,
            symbol: s.symbol,
            exchange: s.exchange,
            product_type: s.product_type,
            order_type: s.order_type,
            side: s.side,
            price: s.price,
            trigger_price: s.trigger_price,
            qty: s.qty,
            status: s.status,
            filled_qty: s.filled_qty,
            pending_qty: s.pending_qty,
            average_price: s.average_price,
            placed_at: s.placed_at,
            updated_at: s.updated_at,
            message: s.message,
            parent_order_id: s.parent_order_id,
            modifications: s.modifications,
            algo_cancelled: s.algo_cancelled,
        }
    }
}

impl TradeSnapshotV1 {
    pub fn from_trade(trade: &Trade) -> Self {
        Self {
            schema_version: TRADE_SCHEMA_VERSION,
            trade_id: trade.trade_id.clone(),
            symbol: trade.symbol.clone(),
            exchange: trade.exchange.clone(),
            strategy: trade.strategy.clone(),
            direction: trade.direction,
            product_type: trade.product_type,
            instrument: trade.instrument,
            underlying: trade.underlying.clone(),
            place_market_order: trade.place_market_order,
            square_off_at: trade.square_off_at,
            requested_entry: trade.requested_entry,
            entry: trade.entry,
            qty: trade.qty(),
            filled_qty: trade.filled_qty(),
            initial_stop_loss: trade.initial_stop_loss(),
            stop_loss: trade.stop_loss(),
            stop_loss_pct: trade.stop_loss_pct,
            target: trade.target,
            cmp: trade.cmp,
            state: trade.state(),
            strategy_timestamp: trade.strategy_timestamp,
            created_at: trade.created_at,
            started_at: trade.started_at,
            ended_at: trade.ended_at,
            pnl: trade.pnl,
            pnl_pct: trade.pnl_pct,
            exit: trade.exit,
            exit_reason: trade.exit_reason(),
            exit_requested: trade.exit_requested,
            disable_reason: trade.disable_reason.clone(),
            entry_orders: trade.entry_orders.iter().map(Into::into).collect(),
            sl_orders: trade.sl_orders.iter().map(Into::into).collect(),
            target_orders: trade.target_orders.iter().map(Into::into).collect(),
        }
    }

    /// Rebuild the trade, checking version and quantity invariants.
    pub fn into_trade(self) -> Result<Trade, SnapshotError> {
        if self.schema_version != TRADE_SCHEMA_VERSION {
            return Err(SnapshotError::VersionMismatch {
                found: self.schema_version,
                expected: TRADE_SCHEMA_VERSION,
            });
        }
        if self.filled_qty > self.qty {
            return Err(SnapshotError::Overfill {
                trade_id: self.trade_id,
                filled: self.filled_qty,
                qty: self.qty,
            });
        }

        let mut trade = Trade::new(&self.strategy, self.symbol, self.direction, self.qty, self.created_at);
        trade.trade_id = self.trade_id;
        trade.exchange = self.exchange;
        trade.product_type = self.product_type;
        trade.instrument = self.instrument;
        trade.underlying = self.underlying;
        trade.place_market_order = self.place_market_order;
        trade.square_off_at = self.square_off_at;
        trade.requested_entry = self.requested_entry;
        trade.entry = self.entry;
        trade.stop_loss_pct = self.stop_loss_pct;
        trade.target = self.target;
        trade.cmp = self.cmp;
        trade.strategy_timestamp = self.strategy_timestamp;
        trade.started_at = self.started_at;
        trade.ended_at = self.ended_at;
        trade.pnl = self.pnl;
        trade.pnl_pct = self.pnl_pct;
        trade.exit = self.exit;
        trade.exit_requested = self.exit_requested;
        trade.disable_reason = self.disable_reason;
        trade.entry_orders = self.entry_orders.into_iter().map(Into::into).collect();
        trade.sl_orders = self.sl_orders.into_iter().map(Into::into).collect();
        trade.target_orders = self.target_orders.into_iter().map(Into::into).collect();
        trade.restore_lifecycle(
            self.qty,
            self.filled_qty,
            self.state,
            self.stop_loss,
            self.initial_stop_loss,
            self.exit_reason,
        );
        Ok(trade)
    }

    /// Strictly decode a JSON snapshot.
    pub fn decode(json: &str) -> Result<Self, SnapshotError> {
        let header: VersionHeader = serde_json::from_str(json)?;
        if header.schema_version != TRADE_SCHEMA_VERSION {
            return Err(SnapshotError::VersionMismatch {
                found: header.schema_version,
                expected: TRADE_SCHEMA_VERSION,
            });
        }
        Ok(serde_json::from_str(json)?)
    }

    pub fn encode(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }
}
