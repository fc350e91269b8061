//! Aggregate view over the child orders of one leg.

use rust_decimal::Decimal;

use crate::exchange::{Order, OrderStatus};
use crate::utils::decimal::weighted_average;

/// Counts and fill totals of a leg's child orders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegSummary {
    pub orders: usize,
    pub complete: usize,
    /// Cancelled or rejected
    pub dead: usize,
    pub dead_by_engine: usize,
    pub open: usize,
    pub trigger_pending: usize,
    pub filled_qty: u32,
    /// Quantity-weighted average fill price
    pub average_price: Decimal,
}

impl LegSummary {
    pub fn of(orders: &[Order]) -> Self {
        let mut summary = LegSummary {
            orders: orders.len(),
            ..Default::default()
        };
        let mut fills = Vec::with_capacity(orders.len());

        for order in orders {
            match order.status {
                OrderStatus::Complete => summary.complete += 1,
                OrderStatus::Cancelled | OrderStatus::Rejected => {
                    summary.dead += 1;
                    if order.algo_cancelled {
                        summary.dead_by_engine += 1;
                    }
                }
                OrderStatus::Open => summary.open += 1,
                OrderStatus::TriggerPending => summary.trigger_pending += 1,
            }
            if order.filled_qty > 0 {
                summary.filled_qty += order.filled_qty;
                fills.push((order.average_price, Decimal::from(order.filled_qty)));
            }
        }

        summary.average_price = weighted_average(&fills);
        summary
    }

    pub fn is_empty(&self) -> bool {
        self.orders == 0
    }

    /// Every child filled.
    pub fn is_complete(&self) -> bool {
        self.orders > 0 && self.complete == self.orders
    }

    /// Every child cancelled or rejected.
    pub fn is_dead(&self) -> bool {
        self.orders > 0 && self.dead == self.orders
    }

    /// Every child died outside the engine's own cancels without filling.
    pub fn is_externally_cancelled(&self) -> bool {
        self.is_dead() && self.dead_by_engine == 0 && self.filled_qty == 0
    }

    pub fn has_live(&self) -> bool {
        self.open + self.trigger_pending > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{OrderRequest, OrderSide, OrderType, ProductType};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn order(status: OrderStatus, filled: u32, avg: Decimal) -> Order {
        let request = OrderRequest {
            symbol: "X".to_string(),
            exchange: "NFO".to_string(),
            product_type: ProductType::Mis,
            order_type: OrderType::Limit,
            side: OrderSide::Sell,
            qty: 50,
            price: dec!(10),
            trigger_price: Decimal::ZERO,
            tag: None,
        };
        let mut order = Order::accepted("1".to_string(), &request, Utc::now());
        order.status = status;
        order.filled_qty = filled;
        order.average_price = avg;
        order
    }

    #[test]
    fn test_weighted_fill_price() {
        let summary = LegSummary::of(&[
            order(OrderStatus::Complete, 25, dec!(100)),
            order(OrderStatus::Complete, 75, dec!(110)),
        ]);
        assert!(summary.is_complete());
        assert_eq!(summary.filled_qty, 100);
        assert_eq!(summary.average_price, dec!(107.5));
    }

    #[test]
    fn test_external_vs_engine_cancel() {
        let external = LegSummary::of(&[order(OrderStatus::Rejected, 0, Decimal::ZERO)]);
        assert!(external.is_externally_cancelled());

        let mut ours = order(OrderStatus::Cancelled, 0, Decimal::ZERO);
        ours.algo_cancelled = true;
        let engine = LegSummary::of(&[ours]);
        assert!(engine.is_dead());
        assert!(!engine.is_externally_cancelled());

        assert!(!LegSummary::of(&[]).is_dead());
    }

    #[test]
    fn test_live_counts() {
        let summary = LegSummary::of(&[
            order(OrderStatus::TriggerPending, 0, Decimal::ZERO),
            order(OrderStatus::Open, 10, dec!(5)),
        ]);
        assert!(summary.has_live());
        assert_eq!(summary.filled_qty, 10);
        assert!(!summary.is_complete());
    }
}
