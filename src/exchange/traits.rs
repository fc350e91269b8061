//! Narrow broker interfaces consumed by the engine.
//!
//! The manager and strategies only ever talk to a broker through these traits:
//! - [`OrderGateway`]: place/modify/cancel orders and pull status deltas
//! - [`QuoteSource`]: snapshot quotes and instrument metadata for strike selection
//! - [`MarketDataFeed`]: symbol subscriptions for pushed ticks

use async_trait::async_trait;

use super::error::GatewayError;
use super::types::{Instrument, OrderModify, OrderRequest, OrderStatusUpdate, Quote, SubscriptionMode};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Submit a new order; returns the broker order id.
    async fn place_order(&self, request: &OrderRequest) -> Result<String, GatewayError>;

    async fn modify_order(&self, order_id: &str, modify: &OrderModify) -> Result<(), GatewayError>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError>;

    /// Fresh copies of `known` orders plus unknown orders whose parent is in `known`.
    async fn fetch_statuses(&self, known: &[String]) -> Result<OrderStatusUpdate, GatewayError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Quote for a symbol on the derivatives (NFO) or cash (NSE) segment.
    async fn quote(&self, symbol: &str, is_derivative: bool) -> Result<Quote, GatewayError>;

    async fn instrument(&self, symbol: &str, is_derivative: bool) -> Result<Instrument, GatewayError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Start pushing ticks for `symbols`; re-subscribing is a no-op.
    async fn subscribe(&self, symbols: &[String], mode: SubscriptionMode) -> anyhow::Result<()>;
}

/// Exchange segment for a symbol.
pub fn segment(is_derivative: bool) -> &'static str {
    if is_derivative {
        "NFO"
    } else {
        "NSE"
    }
}
