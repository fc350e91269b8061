//! Broker-facing value types: orders, ticks, quotes and instruments.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Side of the order that opens a position in this direction.
    pub fn entry_side(self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        }
    }

    /// Side of the order that closes a position in this direction.
    pub fn exit_side(self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Sell,
            Direction::Short => OrderSide::Buy,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Broker product type (intraday, carry-forward, delivery).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProductType {
    #[default]
    Mis,
    Nrml,
    Cnc,
}

impl ProductType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductType::Mis => "MIS",
            ProductType::Nrml => "NRML",
            ProductType::Cnc => "CNC",
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "LIMIT")]
    Limit,
    #[serde(rename = "MARKET")]
    Market,
    /// Stop-limit: becomes a limit order at `price` once `trigger_price` trades.
    #[serde(rename = "SL")]
    StopLimit,
    #[serde(rename = "SL-M")]
    StopMarket,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::StopLimit => "SL",
            OrderType::StopMarket => "SL-M",
        }
    }

    pub fn is_stop(self) -> bool {
        matches!(self, OrderType::StopLimit | OrderType::StopMarket)
    }
}

/// Order status as tracked by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "TRIGGER PENDING")]
    TriggerPending,
    #[serde(rename = "COMPLETE")]
    Complete,
    #[serde(rename = "CANCELLED")]
    Cancelled,
    #[serde(rename = "REJECTED")]
    Rejected,
}

impl OrderStatus {
    /// Map a broker status string; transitional states count as open.
    pub fn from_broker(status: &str) -> Self {
        match status {
            "COMPLETE" => OrderStatus::Complete,
            "CANCELLED" => OrderStatus::Cancelled,
            "REJECTED" => OrderStatus::Rejected,
            "TRIGGER PENDING" => OrderStatus::TriggerPending,
            _ => OrderStatus::Open,
        }
    }

    /// Still working at the broker.
    pub fn is_live(self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::TriggerPending)
    }

    /// Cancelled or rejected.
    pub fn is_dead(self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Rejected)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Open => "OPEN",
            OrderStatus::TriggerPending => "TRIGGER PENDING",
            OrderStatus::Complete => "COMPLETE",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
        };
        write!(f, "{s}")
    }
}

/// Option type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    #[serde(rename = "CE")]
    Call,
    #[serde(rename = "PE")]
    Put,
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionType::Call => write!(f, "CE"),
            OptionType::Put => write!(f, "PE"),
        }
    }
}

/// Depth of data requested for a market-data subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionMode {
    Ltp,
    #[default]
    Quote,
    Full,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ohlc {
    #[serde(default)]
    pub open: Decimal,
    #[serde(default)]
    pub high: Decimal,
    #[serde(default)]
    pub low: Decimal,
    #[serde(default)]
    pub close: Decimal,
}

/// A pushed market-data update for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub symbol: String,
    pub last_price: Decimal,
    pub volume: u64,
    pub buy_qty: u64,
    pub sell_qty: u64,
    pub ohlc: Ohlc,
    pub open_interest: u64,
    pub exchange_timestamp: Option<DateTime<Utc>>,
}

impl Tick {
    /// Minimal tick carrying only a last price.
    pub fn ltp(symbol: impl Into<String>, last_price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            last_price,
            volume: 0,
            buy_qty: 0,
            sell_qty: 0,
            ohlc: Ohlc::default(),
            open_interest: 0,
            exchange_timestamp: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CircuitLimits {
    pub lower: Decimal,
    pub upper: Decimal,
}

/// Snapshot quote used for strike selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub last_price: Decimal,
    pub last_qty: u64,
    pub average_price: Decimal,
    pub volume: u64,
    pub buy_qty: u64,
    pub sell_qty: u64,
    pub ohlc: Ohlc,
    pub change: Decimal,
    pub open_interest: u64,
    pub circuit: CircuitLimits,
}

impl Quote {
    /// Whether both sides of the book show quantity.
    pub fn has_depth(&self) -> bool {
        self.buy_qty > 0 && self.sell_qty > 0
    }

    pub fn to_tick(&self) -> Tick {
        Tick {
            symbol: self.symbol.clone(),
            last_price: self.last_price,
            volume: self.volume,
            buy_qty: self.buy_qty,
            sell_qty: self.sell_qty,
            ohlc: self.ohlc,
            open_interest: self.open_interest,
            exchange_timestamp: None,
        }
    }
}

/// Tradable instrument metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    pub symbol: String,
    pub exchange: String,
    pub lot_size: u32,
    pub tick_size: Decimal,
}

/// Parameters for a new order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub exchange: String,
    pub product_type: ProductType,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub qty: u32,
    pub price: Decimal,
    pub trigger_price: Decimal,
    pub tag: Option<String>,
}

/// Fields to change on a working order; `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderModify {
    pub order_type: Option<OrderType>,
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub qty: Option<u32>,
}

/// Local copy of a broker order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
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
    pub pending_qty: u32,
    pub average_price: Decimal,
    pub placed_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub parent_order_id: Option<String>,
    /// Modifications sent by this engine.
    pub modifications: u32,
    /// Set when this engine requested the cancellation.
    pub algo_cancelled: bool,
}

impl Order {
    /// Local record of an order the broker just accepted.
    pub fn accepted(order_id: String, request: &OrderRequest, now: DateTime<Utc>) -> Self {
        let status = if request.order_type.is_stop() {
            OrderStatus::TriggerPending
        } else {
            OrderStatus::Open
        };
        Self {
            order_id,
            symbol: request.symbol.clone(),
            exchange: request.exchange.clone(),
            product_type: request.product_type,
            order_type: request.order_type,
            side: request.side,
            price: request.price,
            trigger_price: request.trigger_price,
            qty: request.qty,
            status,
            filled_qty: 0,
            pending_qty: request.qty,
            average_price: Decimal::ZERO,
            placed_at: Some(now),
            updated_at: Some(now),
            message: None,
            parent_order_id: None,
            modifications: 0,
            algo_cancelled: false,
        }
    }

    /// Take the broker's view of this order, keeping engine-local bookkeeping.
    pub fn apply_update(&mut self, broker: &Order) {
        self.status = broker.status;
        self.order_type = broker.order_type;
        self.price = broker.price;
        self.trigger_price = broker.trigger_price;
        self.qty = broker.qty;
        self.filled_qty = broker.filled_qty.min(broker.qty);
        self.pending_qty = broker.pending_qty;
        self.average_price = broker.average_price;
        self.updated_at = broker.updated_at.or(self.updated_at);
        self.message = broker.message.clone();
        if broker.parent_order_id.is_some() {
            self.parent_order_id = broker.parent_order_id.clone();
        }
    }
}

/// Result of a status refresh.
#[derive(Debug, Clone, Default)]
pub struct OrderStatusUpdate {
    /// Fresh copies of orders the caller already knew about.
    pub updated: Vec<Order>,
    /// Orders the caller did not know, linked to a known order by parent id.
    pub discovered: Vec<Order>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(order_type: OrderType) -> OrderRequest {
        OrderRequest {
            symbol: "NIFTY24O1025000CE".to_string(),
            exchange: "NFO".to_string(),
            product_type: ProductType::Mis,
            order_type,
            side: OrderSide::Buy,
            qty: 50,
            price: dec!(101),
            trigger_price: dec!(100),
            tag: None,
        }
    }

    #[test]
    fn test_broker_status_mapping() {
        assert_eq!(OrderStatus::from_broker("COMPLETE"), OrderStatus::Complete);
        assert_eq!(OrderStatus::from_broker("TRIGGER PENDING"), OrderStatus::TriggerPending);
        assert_eq!(OrderStatus::from_broker("MODIFY PENDING"), OrderStatus::Open);
        assert!(OrderStatus::Rejected.is_dead());
        assert!(!OrderStatus::Complete.is_live());
    }

    #[test]
    fn test_accepted_stop_order_is_trigger_pending() {
        let now = Utc::now();
        let order = Order::accepted("1".to_string(), &request(OrderType::StopLimit), now);
        assert_eq!(order.status, OrderStatus::TriggerPending);
        assert_eq!(order.pending_qty, 50);

        let order = Order::accepted("2".to_string(), &request(OrderType::Limit), now);
        assert_eq!(order.status, OrderStatus::Open);
    }

    #[test]
    fn test_apply_update_keeps_local_bookkeeping() {
        let now = Utc::now();
        let mut local = Order::accepted("1".to_string(), &request(OrderType::Limit), now);
        local.modifications = 3;
        local.algo_cancelled = true;

        let mut broker = local.clone();
        broker.modifications = 0;
        broker.algo_cancelled = false;
        broker.status = OrderStatus::Complete;
        broker.filled_qty = 50;
        broker.average_price = dec!(100.5);

        local.apply_update(&broker);
        assert_eq!(local.status, OrderStatus::Complete);
        assert_eq!(local.average_price, dec!(100.5));
        assert_eq!(local.modifications, 3);
        assert!(local.algo_cancelled);
    }

    #[test]
    fn test_direction_sides() {
        assert_eq!(Direction::Long.entry_side(), OrderSide::Buy);
        assert_eq!(Direction::Short.exit_side(), OrderSide::Buy);
        assert_eq!(OptionType::Put.to_string(), "PE");
    }
}
