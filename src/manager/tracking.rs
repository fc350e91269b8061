//! Per-cycle tracking of a trade's entry, target and stop-loss legs.
//!
//! Each function looks at one leg's child orders and moves the trade forward:
//! chasing working orders toward the market, placing follow-up legs once the
//! entry has filled, and completing the trade when an exit leg fills or dies.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::executor::{
    entry_request, stop_loss_request, target_request, toward_fill, OrderExecutor,
};
use super::exit::{exited_qty, mark_price, request_exit};
use crate::exchange::{Direction, GatewayError, Order, OrderModify, OrderSide, OrderStatus, OrderType};
use crate::strategy::StrategyInstance;
use crate::trade::{DisableReason, ExitReason, LegSummary, Trade, TradeState};
use crate::utils::decimal::{round_to_nse_price, shift_pct, NSE_TICK};

/// What the legs of one trade need to know about the current cycle.
pub(super) struct LegContext<'a> {
    pub executor: &'a OrderExecutor,
    /// Owning strategy, absent for restored trades of an unconfigured strategy
    pub strategy: Option<&'a StrategyInstance>,
    pub now: DateTime<Utc>,
    pub chase_pct: Decimal,
    /// Unfilled entries are cancelled after this instant
    pub stop_at: Option<DateTime<Utc>>,
}

/// Step a working price toward the market, one tick past `pct`.
pub(super) fn chase_price(side: OrderSide, price: Decimal, pct: Decimal) -> Decimal {
    match side {
        OrderSide::Buy => round_to_nse_price(shift_pct(price, pct)) + NSE_TICK,
        OrderSide::Sell => (round_to_nse_price(shift_pct(price, -pct)) - NSE_TICK).max(NSE_TICK),
    }
}

/// Whether `stop` has already been crossed by the current price.
fn stop_crossed(trade: &Trade, stop: Decimal) -> bool {
    if trade.cmp <= Decimal::ZERO {
        return false;
    }
    match trade.direction {
        Direction::Long => stop >= trade.cmp,
        Direction::Short => stop <= trade.cmp,
    }
}

fn stop_exit_reason(trade: &Trade) -> ExitReason {
    if trade.is_trailed() {
        ExitReason::TrailSlHit
    } else {
        ExitReason::SlHit
    }
}

/// Cancel whatever is still working on a leg; failures are only logged.
async fn cancel_working(orders: &mut [Order], executor: &OrderExecutor, trade_id: &str) {
    for order in orders.iter_mut().filter(|o| o.status.is_live() && !o.algo_cancelled) {
        if let Err(e) = executor.cancel(order).await {
            warn!(%trade_id, order_id = %order.order_id, error = %e, "Leg cancel failed");
        }
    }
}

/// Place the entry for a trade that passed its entry checks.
///
/// The trade goes ACTIVE before the call returns; a failed placement disables it.
pub(super) async fn place_entry(
    trade: &mut Trade,
    executor: &OrderExecutor,
    now: DateTime<Utc>,
) -> Result<()> {
    let request = entry_request(trade);
    trade.transition(TradeState::Active, now)?;

    match executor.place(&request).await {
        Ok(order) => {
            info!(
                trade_id = %trade.trade_id,
                symbol = %trade.symbol,
                direction = %trade.direction,
                qty = trade.qty(),
                trigger = %request.trigger_price,
                price = %request.price,
                "🚀 [ENTRY] Entry order placed"
            );
            trade.entry_orders.push(order);
        }
        Err(e) => {
            warn!(trade_id = %trade.trade_id, error = %e, "Entry placement failed");
            trade.disable(DisableReason::PlacementFailed, now)?;
        }
    }
    Ok(())
}

pub(super) async fn track_entry(trade: &mut Trade, ctx: &LegContext<'_>) -> Result<()> {
    let leg = LegSummary::of(&trade.entry_orders);
    if leg.is_empty() {
        return Ok(());
    }

    let entry = if leg.filled_qty > 0 {
        leg.average_price
    } else {
        trade.entry
    };
    trade.record_entry_fills(leg.filled_qty, entry)?;
    trade.update_pnl();

    if leg.is_dead() && leg.filled_qty == 0 {
        info!(trade_id = %trade.trade_id, "Entry died without fills, cancelling trade");
        trade.transition(TradeState::Cancelled, ctx.now)?;
        return Ok(());
    }
    if !leg.has_live() {
        return Ok(());
    }

    if ctx.stop_at.is_some_and(|stop_at| ctx.now > stop_at) {
        info!(trade_id = %trade.trade_id, filled = leg.filled_qty, "Entry window closed, cancelling unfilled entry");
        cancel_working(&mut trade.entry_orders, ctx.executor, &trade.trade_id).await;
        return Ok(());
    }

    for order in trade.entry_orders.iter_mut().filter(|o| {
        o.status == OrderStatus::Open && !o.order_type.is_stop() && !o.algo_cancelled
    }) {
        let price = chase_price(order.side, order.price, ctx.chase_pct);
        let modify = OrderModify {
            price: Some(price),
            ..Default::default()
        };
        match ctx.executor.modify(order, modify).await {
            Ok(()) => debug!(order_id = %order.order_id, %price, "Entry chased"),
            Err(e) => warn!(order_id = %order.order_id, error = %e, "Entry chase failed"),
        }
    }
    Ok(())
}

pub(super) async fn track_target(trade: &mut Trade, ctx: &LegContext<'_>) -> Result<()> {
    if !trade.is_active() {
        return Ok(());
    }

    if trade.target_orders.is_empty() {
        let ready = trade.target > Decimal::ZERO
            && trade.filled_qty() > 0
            && !trade.has_live_entry_orders()
            && trade.exit_requested.is_none();
        if ready {
            let order = ctx.executor.place(&target_request(trade)).await?;
            info!(trade_id = %trade.trade_id, order_id = %order.order_id, target = %trade.target, "Target placed");
            trade.target_orders.push(order);
        }
        return Ok(());
    }

    let leg = LegSummary::of(&trade.target_orders);
    let closed = exited_qty(trade) >= trade.filled_qty();
    if leg.filled_qty > 0 && !leg.has_live() && closed {
        cancel_working(&mut trade.sl_orders, ctx.executor, &trade.trade_id).await;
        trade.complete(leg.average_price, ExitReason::TargetHit, ctx.now)?;
        info!(trade_id = %trade.trade_id, exit = %trade.exit, pnl = %trade.pnl, reason = ?trade.exit_reason(), "Trade completed");
        return Ok(());
    }

    if leg.is_externally_cancelled() {
        warn!(trade_id = %trade.trade_id, "Target cancelled outside the engine");
        cancel_working(&mut trade.sl_orders, ctx.executor, &trade.trade_id).await;
        let exit = mark_price(trade);
        trade.complete(exit, ExitReason::TargetCancelled, ctx.now)?;
        return Ok(());
    }

    if trade.exit_requested.is_some() {
        for order in trade.target_orders.iter_mut().filter(|o| {
            o.status == OrderStatus::Open && o.order_type == OrderType::Limit && !o.algo_cancelled
        }) {
            let price = chase_price(order.side, order.price, ctx.chase_pct);
            let modify = OrderModify {
                price: Some(price),
                ..Default::default()
            };
            if let Err(e) = ctx.executor.modify(order, modify).await {
                warn!(order_id = %order.order_id, error = %e, "Target chase failed");
            }
        }
    }
    Ok(())
}

pub(super) async fn track_stop_loss(trade: &mut Trade, ctx: &LegContext<'_>) -> Result<()> {
    if !trade.is_active() {
        return Ok(());
    }

    if trade.stop_loss() == Decimal::ZERO {
        if let Some(strategy) = ctx.strategy {
            let candidate = strategy.trailing_stop_loss(trade, trade.cmp);
            if trade.set_initial_stop_loss(candidate) {
                info!(trade_id = %trade.trade_id, stop = %candidate, "Initial stop set");
            }
        }
        if trade.stop_loss() == Decimal::ZERO {
            return Ok(());
        }
    }

    if trade.sl_orders.is_empty() {
        if trade.filled_qty() == 0 || trade.has_live_entry_orders() || trade.exit_requested.is_some() {
            return Ok(());
        }
        if stop_crossed(trade, trade.stop_loss()) {
            warn!(trade_id = %trade.trade_id, stop = %trade.stop_loss(), cmp = %trade.cmp, "Price already through the stop");
            request_exit(trade, ExitReason::SlHit);
            return Ok(());
        }
        let order = ctx.executor.place(&stop_loss_request(trade)).await?;
        info!(
            trade_id = %trade.trade_id,
            order_id = %order.order_id,
            trigger = %order.trigger_price,
            qty = order.qty,
            "Stop-loss placed"
        );
        trade.sl_orders.push(order);
        return Ok(());
    }

    let leg = LegSummary::of(&trade.sl_orders);
    let closed = exited_qty(trade) >= trade.filled_qty();
    if leg.filled_qty > 0 && !leg.has_live() && closed {
        let reason = stop_exit_reason(trade);
        cancel_working(&mut trade.target_orders, ctx.executor, &trade.trade_id).await;
        trade.complete(leg.average_price, reason, ctx.now)?;
        info!(trade_id = %trade.trade_id, exit = %trade.exit, pnl = %trade.pnl, reason = ?trade.exit_reason(), "Trade completed");
        return Ok(());
    }

    if leg.is_externally_cancelled() {
        let target = LegSummary::of(&trade.target_orders);
        if !target.has_live() && !target.is_complete() {
            warn!(trade_id = %trade.trade_id, "Stop-loss cancelled outside the engine");
            cancel_working(&mut trade.target_orders, ctx.executor, &trade.trade_id).await;
            let exit = mark_price(trade);
            trade.complete(exit, ExitReason::SlCancelled, ctx.now)?;
        }
        return Ok(());
    }

    // square-off owns the leg from here
    if trade.exit_requested.is_some() {
        return Ok(());
    }

    // the engine gave up on every stop order, the open position leaves at market
    if leg.is_dead() {
        warn!(trade_id = %trade.trade_id, filled = leg.filled_qty, "Stop-loss leg abandoned, exiting at market");
        request_exit(trade, stop_exit_reason(trade));
        return Ok(());
    }

    if leg.open > 0 {
        return chase_triggered_stops(trade, ctx).await;
    }
    if leg.trigger_pending > 0 {
        trail_stop_loss(trade, ctx).await?;
    }
    Ok(())
}

/// Move triggered but unfilled stop orders toward the market.
async fn chase_triggered_stops(trade: &mut Trade, ctx: &LegContext<'_>) -> Result<()> {
    let mut exhausted = false;
    for order in trade
        .sl_orders
        .iter_mut()
        .filter(|o| o.status == OrderStatus::Open && !o.algo_cancelled)
    {
        let trigger = chase_price(order.side, order.price, ctx.chase_pct);
        let price = chase_price(order.side, trigger, ctx.chase_pct);
        let modify = OrderModify {
            price: Some(price),
            trigger_price: Some(trigger),
            ..Default::default()
        };
        match ctx.executor.modify(order, modify).await {
            Ok(()) => debug!(order_id = %order.order_id, %trigger, %price, "Stop-loss chased"),
            Err(GatewayError::ModificationLimitExceeded { .. }) => exhausted = true,
            Err(e) => warn!(order_id = %order.order_id, error = %e, "Stop-loss chase failed"),
        }
    }

    if exhausted {
        request_exit(trade, stop_exit_reason(trade));
    }
    Ok(())
}

async fn trail_stop_loss(trade: &mut Trade, ctx: &LegContext<'_>) -> Result<()> {
    let Some(strategy) = ctx.strategy else {
        return Ok(());
    };
    let candidate = strategy.trailing_stop_loss(trade, trade.cmp);
    if !trade.tightens(candidate) {
        return Ok(());
    }

    if stop_crossed(trade, candidate) {
        warn!(
            trade_id = %trade.trade_id,
            stop = %candidate,
            cmp = %trade.cmp,
            "Trailing stop gapped through, exiting at market"
        );
        request_exit(trade, ExitReason::SlHit);
        return Ok(());
    }

    let price = round_to_nse_price(candidate * toward_fill(trade.direction, false));
    let mut exhausted = false;
    for order in trade
        .sl_orders
        .iter_mut()
        .filter(|o| o.status == OrderStatus::TriggerPending && !o.algo_cancelled)
    {
        let modify = OrderModify {
            trigger_price: Some(candidate),
            price: Some(price),
            ..Default::default()
        };
        match ctx.executor.modify(order, modify).await {
            Ok(()) => {}
            Err(GatewayError::ModificationLimitExceeded { .. }) => exhausted = true,
            Err(e) => return Err(e.into()),
        }
    }
    if exhausted {
        warn!(trade_id = %trade.trade_id, stop = %candidate, "Stop-loss out of modifications, exiting at market");
        request_exit(trade, stop_exit_reason(trade));
        return Ok(());
    }

    let previous = trade.stop_loss();
    if trade.tighten_stop_loss(candidate) {
        info!(trade_id = %trade.trade_id, from = %previous, to = %candidate, "Stop trailed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_chase_prices() {
        // LONG entry / SHORT exit buys
        assert_eq!(chase_price(OrderSide::Buy, dec!(100), dec!(1)), dec!(101.05));
        // 20.02 * 0.99 = 19.8198 -> 19.85 - 0.05
        assert_eq!(chase_price(OrderSide::Sell, dec!(20.02), dec!(1)), dec!(19.80));
        assert_eq!(chase_price(OrderSide::Sell, dec!(0.05), dec!(1)), dec!(0.05));
    }

    #[test]
    fn test_stop_crossed_by_direction() {
        let mut long = Trade::new("s1", "X", Direction::Long, 50, Utc::now());
        long.cmp = dec!(100);
        assert!(stop_crossed(&long, dec!(100)));
        assert!(!stop_crossed(&long, dec!(95)));

        let mut short = Trade::new("s1", "X", Direction::Short, 50, Utc::now());
        short.cmp = dec!(20);
        assert!(stop_crossed(&short, dec!(19.5)));
        assert!(!stop_crossed(&short, dec!(28)));

        // unknown price never counts as crossed
        short.cmp = Decimal::ZERO;
        assert!(!stop_crossed(&short, dec!(19.5)));
    }
}
