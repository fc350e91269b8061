//! Square-off sequencing.
//!
//! Runs in a fixed order and stops at the first failed step:
//! 1. Cancel working entry orders
//! 2. Cancel working stop-loss orders
//! 3. Convert a working target order to `MARKET`, or place one market exit
//!
//! The sequence is idempotent. Orders already terminal or already cancelled by the
//! engine are skipped, so the manager re-runs it every cycle while the trade still
//! carries an exit request.

use rust_decimal::Decimal;
use tracing::{info, warn};

use super::executor::{market_exit_request, toward_fill, OrderExecutor};
use crate::exchange::{GatewayError, Order, OrderModify, OrderType};
use crate::trade::{ExitReason, LegSummary, Trade};
use crate::utils::decimal::round_to_nse_price;

/// Record an exit request; an earlier request keeps its reason.
pub(super) fn request_exit(trade: &mut Trade, reason: ExitReason) -> bool {
    if trade.exit_requested.is_some() {
        return false;
    }
    info!(trade_id = %trade.trade_id, %reason, "🛑 [EXIT] Exit requested");
    trade.exit_requested = Some(reason);
    true
}

fn needs_cancel(order: &Order) -> bool {
    order.status.is_live() && !order.algo_cancelled
}

/// Quantity already closed through the stop-loss and target legs.
pub(super) fn exited_qty(trade: &Trade) -> u32 {
    LegSummary::of(&trade.sl_orders).filled_qty + LegSummary::of(&trade.target_orders).filled_qty
}

pub(super) async fn square_off(trade: &mut Trade, executor: &OrderExecutor) -> Result<(), GatewayError> {
    for order in trade.entry_orders.iter_mut().filter(|o| needs_cancel(o)) {
        executor.cancel(order).await?;
    }

    // A failed cancel may be racing a fill; exiting now could close the position twice.
    for order in trade.sl_orders.iter_mut().filter(|o| needs_cancel(o)) {
        if let Err(e) = executor.cancel(order).await {
            warn!(
                trade_id = %trade.trade_id,
                order_id = %order.order_id,
                error = %e,
                "Stop-loss cancel failed, square-off retried next cycle"
            );
            return Err(e);
        }
    }

    let remaining = trade.filled_qty().saturating_sub(exited_qty(trade));
    if remaining == 0 {
        return Ok(());
    }

    let market_price = round_to_nse_price(trade.cmp * toward_fill(trade.direction, false));
    let mut working_exit = false;
    for order in trade.target_orders.iter_mut().filter(|o| needs_cancel(o)) {
        working_exit = true;
        if order.order_type == OrderType::Market {
            continue;
        }
        let modify = OrderModify {
            order_type: Some(OrderType::Market),
            price: Some(market_price),
            ..Default::default()
        };
        executor.modify(order, modify).await?;
        info!(
            trade_id = %trade.trade_id,
            order_id = %order.order_id,
            price = %market_price,
            "Target converted to market exit"
        );
    }
    if working_exit {
        return Ok(());
    }

    let placed_market_exit = trade
        .target_orders
        .iter()
        .any(|o| o.order_type == OrderType::Market && !o.status.is_dead());
    if placed_market_exit {
        return Ok(());
    }

    let mut request = market_exit_request(trade);
    request.qty = remaining;
    let order = executor.place(&request).await?;
    info!(
        trade_id = %trade.trade_id,
        order_id = %order.order_id,
        qty = remaining,
        reason = ?trade.exit_requested,
        "🛑 [EXIT] Market exit placed"
    );
    trade.target_orders.push(order);
    Ok(())
}

/// Exit price used when a trade is closed outside its own exit orders.
pub(super) fn mark_price(trade: &Trade) -> Decimal {
    if trade.cmp > Decimal::ZERO {
        trade.cmp
    } else {
        trade.entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{Direction, OrderStatus, PaperBroker, PaperOp};
    use crate::manager::executor::{entry_request, stop_loss_request, target_request};
    use crate::trade::TradeState;
    use crate::utils::{Clock, ManualClock};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration;

    const SYMBOL: &str = "NIFTY24O0325000CE";

    async fn setup() -> (Arc<PaperBroker>, OrderExecutor, Trade) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 10, 3, 4, 30, 0).unwrap(),
        ));
        let broker = Arc::new(PaperBroker::with_clock(clock.clone()));
        broker.set_price(SYMBOL, dec!(100)).await;
        let executor = OrderExecutor::new(broker.clone(), clock.clone(), Duration::from_millis(10), 25);

        let now = clock.now();
        let mut trade = Trade::new("s1", SYMBOL, Direction::Long, 50, now);
        trade.requested_entry = dec!(100);
        trade.place_market_order = true;
        trade.transition(TradeState::Active, now).unwrap();
        let mut entry = executor.place(&entry_request(&trade)).await.unwrap();
        entry.status = OrderStatus::Complete;
        entry.filled_qty = 50;
        entry.average_price = dec!(100);
        trade.entry_orders.push(entry);
        trade.record_entry_fills(50, dec!(100)).unwrap();
        trade.set_initial_stop_loss(dec!(90));
        trade.cmp = dec!(100);

        let sl = executor.place(&stop_loss_request(&trade)).await.unwrap();
        trade.sl_orders.push(sl);
        (broker, executor, trade)
    }

    #[tokio::test]
    async fn test_market_exit_placed_once() {
        let (broker, executor, mut trade) = setup().await;
        request_exit(&mut trade, ExitReason::SquareOff);

        square_off(&mut trade, &executor).await.unwrap();
        assert!(trade.sl_orders[0].algo_cancelled);
        assert_eq!(trade.target_orders.len(), 1);
        assert_eq!(trade.target_orders[0].order_type, OrderType::Market);
        assert_eq!(trade.target_orders[0].qty, 50);

        // second pass before the next status pull
        square_off(&mut trade, &executor).await.unwrap();
        assert_eq!(trade.target_orders.len(), 1);
        assert_eq!(broker.order_count().await, 3);
    }

    #[tokio::test]
    async fn test_failed_stop_cancel_aborts() {
        let (broker, executor, mut trade) = setup().await;
        request_exit(&mut trade, ExitReason::SquareOff);
        broker
            .fail_next(PaperOp::Cancel, GatewayError::rejected("order is being processed"))
            .await;

        assert!(square_off(&mut trade, &executor).await.is_err());
        assert!(trade.target_orders.is_empty());
        assert_eq!(trade.state(), TradeState::Active);
    }

    #[tokio::test]
    async fn test_working_target_converted_not_duplicated() {
        let (broker, executor, mut trade) = setup().await;
        trade.target = dec!(110);
        let target = executor.place(&target_request(&trade)).await.unwrap();
        trade.target_orders.push(target);
        request_exit(&mut trade, ExitReason::StrategySlHit);

        square_off(&mut trade, &executor).await.unwrap();
        assert_eq!(trade.target_orders.len(), 1);
        assert_eq!(trade.target_orders[0].order_type, OrderType::Market);
        // 100 * 0.99
        assert_eq!(trade.target_orders[0].price, dec!(99));

        let at_broker = broker.order(&trade.target_orders[0].order_id).await.unwrap();
        assert_eq!(at_broker.status, OrderStatus::Complete);
    }

    #[test]
    fn test_first_exit_request_wins() {
        let mut trade = Trade::new("s1", SYMBOL, Direction::Short, 50, Utc::now());
        assert!(request_exit(&mut trade, ExitReason::StrategySlHit));
        assert!(!request_exit(&mut trade, ExitReason::SquareOff));
        assert_eq!(trade.exit_requested, Some(ExitReason::StrategySlHit));
    }
}
