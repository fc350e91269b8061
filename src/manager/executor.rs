//! Order execution against the gateway.
//!
//! Wraps every gateway call in the single transient retry, keeps the local order
//! copy in step with what was sent, and enforces the per-order modification budget.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::exchange::{
    with_retry, Direction, GatewayError, Order, OrderGateway, OrderModify, OrderRequest,
    OrderStatusUpdate, OrderType,
};
use crate::trade::Trade;
use crate::utils::decimal::round_to_nse_price;
use crate::utils::Clock;

/// Handles order placement, modification and cancellation for the manager.
pub struct OrderExecutor {
    gateway: Arc<dyn OrderGateway>,
    clock: Arc<dyn Clock>,
    retry_delay: Duration,
    max_modifications: u32,
}

impl OrderExecutor {
    pub fn new(
        gateway: Arc<dyn OrderGateway>,
        clock: Arc<dyn Clock>,
        retry_delay: Duration,
        max_modifications: u32,
    ) -> Self {
        Self {
            gateway,
            clock,
            retry_delay,
            max_modifications,
        }
    }

    /// Place an order; returns the local copy of the accepted order.
    pub async fn place(&self, request: &OrderRequest) -> Result<Order, GatewayError> {
        let order_id = with_retry(self.clock.as_ref(), self.retry_delay, "place_order", || {
            self.gateway.place_order(request)
        })
        .await?;

        info!(
            %order_id,
            symbol = %request.symbol,
            side = request.side.as_str(),
            order_type = request.order_type.as_str(),
            qty = request.qty,
            price = %request.price,
            trigger = %request.trigger_price,
            "Order placed"
        );
        Ok(Order::accepted(order_id, request, self.clock.now()))
    }

    /// Modify a working order.
    ///
    /// Once the modification budget is spent (locally or per the broker) the order
    /// is cancelled instead and `ModificationLimitExceeded` is returned.
    pub async fn modify(&self, order: &mut Order, modify: OrderModify) -> Result<(), GatewayError> {
        if order.modifications >= self.max_modifications {
            warn!(order_id = %order.order_id, modifications = order.modifications, "Modification budget spent, cancelling");
            self.cancel(order).await?;
            return Err(GatewayError::modification_limit(&order.order_id));
        }

        let result = with_retry(self.clock.as_ref(), self.retry_delay, "modify_order", || {
            self.gateway.modify_order(&order.order_id, &modify)
        })
        .await;

        match result {
            Ok(()) => {
                order.modifications += 1;
                if let Some(order_type) = modify.order_type {
                    order.order_type = order_type;
                }
                if let Some(price) = modify.price {
                    order.price = price;
                }
                if let Some(trigger) = modify.trigger_price {
                    order.trigger_price = trigger;
                }
                if let Some(qty) = modify.qty {
                    order.qty = qty;
                }
                order.updated_at = Some(self.clock.now());
                Ok(())
            }
            Err(e @ GatewayError::ModificationLimitExceeded { .. }) => {
                warn!(order_id = %order.order_id, "Broker modification limit reached, cancelling");
                self.cancel(order).await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Cancel a working order and mark it as cancelled by the engine.
    pub async fn cancel(&self, order: &mut Order) -> Result<(), GatewayError> {
        with_retry(self.clock.as_ref(), self.retry_delay, "cancel_order", || {
            self.gateway.cancel_order(&order.order_id)
        })
        .await?;

        order.algo_cancelled = true;
        order.updated_at = Some(self.clock.now());
        info!(order_id = %order.order_id, symbol = %order.symbol, "Order cancelled");
        Ok(())
    }

    pub async fn fetch_statuses(&self, known: &[String]) -> Result<OrderStatusUpdate, GatewayError> {
        with_retry(self.clock.as_ref(), self.retry_delay, "fetch_statuses", || {
            self.gateway.fetch_statuses(known)
        })
        .await
    }
}

/// Build an order request for `trade`.
pub fn request_for(
    trade: &Trade,
    entry: bool,
    order_type: OrderType,
    qty: u32,
    price: Decimal,
    trigger_price: Decimal,
) -> OrderRequest {
    let side = if entry {
        trade.direction.entry_side()
    } else {
        trade.direction.exit_side()
    };
    OrderRequest {
        symbol: trade.symbol.clone(),
        exchange: trade.exchange.clone(),
        product_type: trade.product_type,
        order_type,
        side,
        qty,
        price,
        trigger_price,
        tag: Some(trade.strategy.clone()),
    }
}

/// Entry order: `LIMIT` when flagged, else stop-limit triggered at the requested entry.
pub fn entry_request(trade: &Trade) -> OrderRequest {
    let order_type = if trade.place_market_order {
        OrderType::Limit
    } else {
        OrderType::StopLimit
    };
    let trigger = round_to_nse_price(trade.requested_entry);
    let price = round_to_nse_price(trade.requested_entry * toward_fill(trade.direction, true));
    request_for(trade, true, order_type, trade.qty(), price, trigger)
}

/// Stop-loss order for the filled quantity, price 1% beyond the trigger.
pub fn stop_loss_request(trade: &Trade) -> OrderRequest {
    let trigger = round_to_nse_price(trade.stop_loss());
    let price = round_to_nse_price(trade.stop_loss() * toward_fill(trade.direction, false));
    request_for(
        trade,
        false,
        OrderType::StopLimit,
        trade.filled_qty(),
        price,
        trigger,
    )
}

/// Limit exit at the target price.
pub fn target_request(trade: &Trade) -> OrderRequest {
    let price = round_to_nse_price(trade.target);
    request_for(trade, false, OrderType::Limit, trade.filled_qty(), price, Decimal::ZERO)
}

/// Market exit for the filled quantity.
pub fn market_exit_request(trade: &Trade) -> OrderRequest {
    request_for(
        trade,
        false,
        OrderType::Market,
        trade.filled_qty(),
        Decimal::ZERO,
        Decimal::ZERO,
    )
}

/// Price factor that makes an order of this leg more marketable: entries of a LONG
/// and exits of a SHORT buy (×1.01), the rest sell (×0.99).
pub fn toward_fill(direction: Direction, entry: bool) -> Decimal {
    let buying = matches!(
        (direction, entry),
        (Direction::Long, true) | (Direction::Short, false)
    );
    if buying {
        Decimal::new(101, 2)
    } else {
        Decimal::new(99, 2)
    }
}
