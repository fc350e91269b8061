//! In-memory paper broker for paper trading and tests.
//!
//! Implements [`OrderGateway`] and [`QuoteSource`] against a simulated order book:
//! - Market orders fill at the last price
//! - Limit orders fill once marketable
//! - Stop orders trigger when the last price crosses the trigger
//! - Failures and order statuses can be scripted for tests

use super::error::GatewayError;
use super::traits::{segment, OrderGateway, QuoteSource};
use super::types::*;
use crate::utils::{Clock, SystemClock};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

const DEFAULT_LOT_SIZE: u32 = 25;
const DEFAULT_MAX_MODIFICATIONS: u32 = 25;

/// Gateway operation a scripted failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaperOp {
    Place,
    Modify,
    Cancel,
    Fetch,
    Quote,
}

/// Simulated broker state.
#[derive(Debug, Default)]
pub struct PaperState {
    pub orders: HashMap<String, Order>,
    /// Broker-side modification count per order
    pub modifications: HashMap<String, u32>,
    pub order_count: u64,
    pub cancel_count: u64,
}

/// Paper broker simulating order matching against last prices.
pub struct PaperBroker {
    state: Arc<RwLock<PaperState>>,
    order_id_counter: AtomicU64,
    quotes: Arc<RwLock<HashMap<String, Quote>>>,
    lot_sizes: Arc<RwLock<HashMap<String, u32>>>,
    failures: Arc<RwLock<VecDeque<(PaperOp, GatewayError)>>>,
    /// Live prices for symbols with working orders, when paper trading on real data
    upstream: Option<Arc<dyn QuoteSource>>,
    clock: Arc<dyn Clock>,
    matching: AtomicBool,
    max_modifications: u32,
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(RwLock::new(PaperState::default())),
            order_id_counter: AtomicU64::new(1),
            quotes: Arc::new(RwLock::new(HashMap::new())),
            lot_sizes: Arc::new(RwLock::new(HashMap::new())),
            failures: Arc::new(RwLock::new(VecDeque::new())),
            upstream: None,
            clock,
            matching: AtomicBool::new(true),
            max_modifications: DEFAULT_MAX_MODIFICATIONS,
        }
    }

    /// Take prices for working orders from a live quote source.
    pub fn with_upstream(mut self, upstream: Arc<dyn QuoteSource>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Enable or disable automatic fills; scripted statuses still apply.
    pub fn set_matching(&self, enabled: bool) {
        self.matching.store(enabled, Ordering::SeqCst);
    }

    /// Set the last price of a symbol and match working orders against it.
    pub async fn set_price(&self, symbol: &str, last_price: Decimal) {
        {
            let mut quotes = self.quotes.write().await;
            let quote = quotes.entry(symbol.to_string()).or_insert_with(|| Quote {
                symbol: symbol.to_string(),
                buy_qty: 100,
                sell_qty: 100,
                ..Default::default()
            });
            quote.last_price = last_price;
            quote.ohlc.high = quote.ohlc.high.max(last_price);
            if quote.ohlc.low == Decimal::ZERO || last_price < quote.ohlc.low {
                quote.ohlc.low = last_price;
            }
        }
        self.match_orders().await;
    }

    /// Replace the full quote of a symbol.
    pub async fn set_quote(&self, quote: Quote) {
        self.quotes
            .write()
            .await
            .insert(quote.symbol.clone(), quote);
        self.match_orders().await;
    }

    pub async fn set_lot_size(&self, symbol: &str, lot_size: u32) {
        self.lot_sizes
            .write()
            .await
            .insert(symbol.to_string(), lot_size);
    }

    /// Fail the next call of `op` with `error`.
    pub async fn fail_next(&self, op: PaperOp, error: GatewayError) {
        self.failures.write().await.push_back((op, error));
    }

    /// Force an order's status, as if the broker reported it.
    pub async fn set_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        filled_qty: u32,
        average_price: Decimal,
    ) {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        if let Some(order) = state.orders.get_mut(order_id) {
            order.status = status;
            order.filled_qty = filled_qty.min(order.qty);
            order.pending_qty = order.qty - order.filled_qty;
            order.average_price = average_price;
            order.updated_at = Some(now);
        }
    }

    /// Add a broker-created child order (e.g. the remainder of a partial fill).
    pub async fn add_child_order(&self, parent_id: &str, mut child: Order) {
        child.parent_order_id = Some(parent_id.to_string());
        self.state
            .write()
            .await
            .orders
            .insert(child.order_id.clone(), child);
    }

    pub async fn order(&self, order_id: &str) -> Option<Order> {
        self.state.read().await.orders.get(order_id).cloned()
    }

    /// All orders for a symbol, in placement order.
    pub async fn orders_for(&self, symbol: &str) -> Vec<Order> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.symbol == symbol)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.order_id.parse::<u64>().unwrap_or(u64::MAX));
        orders
    }

    pub async fn order_count(&self) -> u64 {
        self.state.read().await.order_count
    }

    fn next_order_id(&self) -> u64 {
        self.order_id_counter.fetch_add(1, Ordering::SeqCst)
    }

    async fn take_failure(&self, op: PaperOp) -> Result<(), GatewayError> {
        let mut failures = self.failures.write().await;
        if let Some(index) = failures.iter().position(|(o, _)| *o == op) {
            if let Some((_, error)) = failures.remove(index) {
                return Err(error);
            }
        }
        Ok(())
    }

    async fn refresh_from_upstream(&self) {
        let Some(upstream) = &self.upstream else {
            return;
        };

        let symbols: Vec<(String, bool)> = {
            let state = self.state.read().await;
            state
                .orders
                .values()
                .filter(|o| o.status.is_live())
                .map(|o| (o.symbol.clone(), o.exchange != "NSE"))
                .collect()
        };

        for (symbol, is_derivative) in symbols {
            match upstream.quote(&symbol, is_derivative).await {
                Ok(quote) => {
                    self.quotes.write().await.insert(symbol, quote);
                }
                Err(e) => debug!(%symbol, error = %e, "Paper broker price refresh failed"),
            }
        }
    }

    /// Trigger and fill working orders against last prices.
    async fn match_orders(&self) {
        if !self.matching.load(Ordering::SeqCst) {
            return;
        }

        let now = self.clock.now();
        let quotes = self.quotes.read().await;
        let mut state = self.state.write().await;

        for order in state.orders.values_mut() {
            if !order.status.is_live() {
                continue;
            }
            let Some(ltp) = quotes
                .get(&order.symbol)
                .map(|q| q.last_price)
                .filter(|p| *p > Decimal::ZERO)
            else {
                continue;
            };

            if order.status == OrderStatus::TriggerPending {
                let triggered = match order.side {
                    OrderSide::Buy => ltp >= order.trigger_price,
                    OrderSide::Sell => ltp <= order.trigger_price,
                };
                if !triggered {
                    continue;
                }
                order.status = OrderStatus::Open;
                order.updated_at = Some(now);
            }

            let fill_price = match order.order_type {
                OrderType::Market | OrderType::StopMarket => Some(ltp),
                OrderType::Limit | OrderType::StopLimit => match order.side {
                    OrderSide::Buy if ltp <= order.price => Some(ltp),
                    OrderSide::Sell if ltp >= order.price => Some(ltp),
                    _ => None,
                },
            };

            if let Some(price) = fill_price {
                order.status = OrderStatus::Complete;
                order.filled_qty = order.qty;
                order.pending_qty = 0;
                order.average_price = price;
                order.updated_at = Some(now);
                info!(
                    order_id = %order.order_id,
                    symbol = %order.symbol,
                    side = ?order.side,
                    qty = order.qty,
                    price = %price,
                    "Paper order filled"
                );
            }
        }
    }
}

#[async_trait]
impl OrderGateway for PaperBroker {
    async fn place_order(&self, request: &OrderRequest) -> Result<String, GatewayError> {
        self.take_failure(PaperOp::Place).await?;
        if request.qty == 0 {
            return Err(GatewayError::rejected("quantity must be positive"));
        }

        let order_id = self.next_order_id().to_string();
        let order = Order::accepted(order_id.clone(), request, self.clock.now());
        {
            let mut state = self.state.write().await;
            state.orders.insert(order_id.clone(), order);
            state.order_count += 1;
        }

        info!(
            %order_id,
            symbol = %request.symbol,
            side = ?request.side,
            order_type = request.order_type.as_str(),
            qty = request.qty,
            price = %request.price,
            trigger = %request.trigger_price,
            "Paper order placed"
        );

        self.match_orders().await;
        Ok(order_id)
    }

    async fn modify_order(&self, order_id: &str, modify: &OrderModify) -> Result<(), GatewayError> {
        self.take_failure(PaperOp::Modify).await?;
        let now = self.clock.now();
        {
            let mut state = self.state.write().await;
            let count = {
                let count = state.modifications.entry(order_id.to_string()).or_insert(0);
                *count += 1;
                *count
            };
            if count > self.max_modifications {
                return Err(GatewayError::modification_limit(order_id));
            }

            let order = state
                .orders
                .get_mut(order_id)
                .ok_or_else(|| GatewayError::NotFound(order_id.to_string()))?;
            if !order.status.is_live() {
                return Err(GatewayError::rejected(format!(
                    "order is already {}",
                    order.status
                )));
            }

            if let Some(order_type) = modify.order_type {
                order.order_type = order_type;
                if !order_type.is_stop() && order.status == OrderStatus::TriggerPending {
                    order.status = OrderStatus::Open;
                }
            }
            if let Some(price) = modify.price {
                order.price = price;
            }
            if let Some(trigger) = modify.trigger_price {
                order.trigger_price = trigger;
            }
            if let Some(qty) = modify.qty {
                order.qty = qty.max(order.filled_qty);
                order.pending_qty = order.qty - order.filled_qty;
            }
            order.updated_at = Some(now);
        }

        debug!(%order_id, ?modify, "Paper order modified");
        self.match_orders().await;
        Ok(())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError> {
        self.take_failure(PaperOp::Cancel).await?;
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| GatewayError::NotFound(order_id.to_string()))?;

        if !order.status.is_live() {
            return Err(GatewayError::rejected(format!(
                "order is already {}",
                order.status
            )));
        }
        order.status = OrderStatus::Cancelled;
        order.pending_qty = 0;
        order.updated_at = Some(now);
        state.cancel_count += 1;

        debug!(%order_id, "Paper order cancelled");
        Ok(())
    }

    async fn fetch_statuses(&self, known: &[String]) -> Result<OrderStatusUpdate, GatewayError> {
        self.take_failure(PaperOp::Fetch).await?;
        self.refresh_from_upstream().await;
        self.match_orders().await;

        let state = self.state.read().await;
        let mut update = OrderStatusUpdate::default();
        for id in known {
            if let Some(order) = state.orders.get(id) {
                update.updated.push(order.clone());
            }
        }
        for order in state.orders.values() {
            let is_child_of_known = order
                .parent_order_id
                .as_ref()
                .is_some_and(|parent| known.contains(parent));
            if is_child_of_known && !known.contains(&order.order_id) {
                update.discovered.push(order.clone());
            }
        }
        Ok(update)
    }
}

#[async_trait]
impl QuoteSource for PaperBroker {
    async fn quote(&self, symbol: &str, _is_derivative: bool) -> Result<Quote, GatewayError> {
        self.take_failure(PaperOp::Quote).await?;
        self.quotes
            .read()
            .await
            .get(symbol)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(symbol.to_string()))
    }

    async fn instrument(&self, symbol: &str, is_derivative: bool) -> Result<Instrument, GatewayError> {
        let lot_size = self
            .lot_sizes
            .read()
            .await
            .get(symbol)
            .copied()
            .unwrap_or(DEFAULT_LOT_SIZE);
        Ok(Instrument {
            symbol: symbol.to_string(),
            exchange: segment(is_derivative).to_string(),
            lot_size,
            tick_size: crate::utils::decimal::NSE_TICK,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SYMBOL: &str = "NIFTY24O1025000CE";

    fn request(order_type: OrderType, side: OrderSide, price: Decimal, trigger: Decimal) -> OrderRequest {
        OrderRequest {
            symbol: SYMBOL.to_string(),
            exchange: "NFO".to_string(),
            product_type: ProductType::Mis,
            order_type,
            side,
            qty: 50,
            price,
            trigger_price: trigger,
            tag: None,
        }
    }

    #[tokio::test]
    async fn test_market_order_fills_at_ltp() {
        let broker = PaperBroker::new();
        broker.set_price(SYMBOL, dec!(101.5)).await;

        let id = broker
            .place_order(&request(OrderType::Market, OrderSide::Buy, Decimal::ZERO, Decimal::ZERO))
            .await
            .unwrap();

        let order = broker.order(&id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Complete);
        assert_eq!(order.filled_qty, 50);
        assert_eq!(order.average_price, dec!(101.5));
    }

    #[tokio::test]
    async fn test_stop_order_triggers_on_cross() {
        let broker = PaperBroker::new();
        broker.set_price(SYMBOL, dec!(25)).await;

        let id = broker
            .place_order(&request(OrderType::StopLimit, OrderSide::Sell, dec!(19.8), dec!(20)))
            .await
            .unwrap();
        assert_eq!(broker.order(&id).await.unwrap().status, OrderStatus::TriggerPending);

        broker.set_price(SYMBOL, dec!(19.9)).await;
        let order = broker.order(&id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Complete);
        assert_eq!(order.average_price, dec!(19.9));
    }

    #[tokio::test]
    async fn test_limit_waits_until_marketable() {
        let broker = PaperBroker::new();
        broker.set_price(SYMBOL, dec!(30)).await;

        let id = broker
            .place_order(&request(OrderType::Limit, OrderSide::Sell, dec!(35), Decimal::ZERO))
            .await
            .unwrap();
        assert_eq!(broker.order(&id).await.unwrap().status, OrderStatus::Open);

        broker.set_price(SYMBOL, dec!(35.5)).await;
        assert_eq!(broker.order(&id).await.unwrap().status, OrderStatus::Complete);
    }

    #[tokio::test]
    async fn test_cancel_completed_order_rejected() {
        let broker = PaperBroker::new();
        broker.set_price(SYMBOL, dec!(10)).await;
        let id = broker
            .place_order(&request(OrderType::Market, OrderSide::Buy, Decimal::ZERO, Decimal::ZERO))
            .await
            .unwrap();

        let err = broker.cancel_order(&id).await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_scripted_failure_applies_once() {
        let broker = PaperBroker::new();
        broker
            .fail_next(PaperOp::Place, GatewayError::Timeout("scripted".to_string()))
            .await;

        let req = request(OrderType::Limit, OrderSide::Buy, dec!(5), Decimal::ZERO);
        assert!(broker.place_order(&req).await.unwrap_err().is_transient());
        assert!(broker.place_order(&req).await.is_ok());
    }

    #[tokio::test]
    async fn test_modification_limit_enforced() {
        let broker = PaperBroker::new();
        broker.set_matching(false);
        let id = broker
            .place_order(&request(OrderType::Limit, OrderSide::Buy, dec!(5), Decimal::ZERO))
            .await
            .unwrap();

        let modify = OrderModify {
            price: Some(dec!(5.05)),
            ..Default::default()
        };
        for _ in 0..DEFAULT_MAX_MODIFICATIONS {
            broker.modify_order(&id, &modify).await.unwrap();
        }
        let err = broker.modify_order(&id, &modify).await.unwrap_err();
        assert!(matches!(err, GatewayError::ModificationLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn test_fetch_statuses_discovers_children() {
        let broker = PaperBroker::new();
        broker.set_matching(false);
        let parent = broker
            .place_order(&request(OrderType::Limit, OrderSide::Buy, dec!(5), Decimal::ZERO))
            .await
            .unwrap();

        let mut child = broker.order(&parent).await.unwrap();
        child.order_id = "child-1".to_string();
        broker.add_child_order(&parent, child).await;

        let update = broker.fetch_statuses(&[parent.clone()]).await.unwrap();
        assert_eq!(update.updated.len(), 1);
        assert_eq!(update.discovered.len(), 1);
        assert_eq!(update.discovered[0].parent_order_id.as_deref(), Some(parent.as_str()));
    }
}
