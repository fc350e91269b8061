//! Strategy-level pnl budget with a trailing ratchet.

use rust_decimal::prelude::MathematicalOps;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use crate::trade::{ExitReason, Trade};

/// Fraction of pnl-per-lot locked in when the budget ratchets.
const RATCHET_FRACTION: Decimal = dec!(0.9);
/// Pnl-per-lot must exceed the stop by this factor before the stop trails.
const TRAIL_TRIGGER: Decimal = dec!(1.2);
const VIX_BASELINE: Decimal = dec!(16);

/// Stop and target budgets in pnl per lot.
///
/// A negative stop is a loss limit. A positive stop is a locked-in profit floor,
/// reached only through [`StrategyBudget::evaluate`] ratcheting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyBudget {
    pub stop: Decimal,
    pub target: Decimal,
}

impl StrategyBudget {
    pub fn new(stop: Decimal, target: Decimal) -> Self {
        Self { stop, target }
    }

    pub fn is_unset(&self) -> bool {
        self.stop == Decimal::ZERO && self.target == Decimal::ZERO
    }

    /// Scale both budgets by `sqrt(vix / 16)`.
    pub fn scale_for_vix(&mut self, vix: Decimal) {
        if vix <= Decimal::ZERO {
            return;
        }
        if let Some(factor) = (vix / VIX_BASELINE).sqrt() {
            self.stop *= factor;
            self.target *= factor;
            info!(%vix, %factor, stop = %self.stop, target = %self.target, "Budget scaled for VIX");
        }
    }

    /// Check aggregate pnl of `trades` against the budget.
    ///
    /// Returns the exit reason on a stop breach. A target breach or a comfortable
    /// profit trails the stop to 90% of pnl-per-lot instead.
    pub fn evaluate(&mut self, trades: &[&Trade], lots: u32) -> Option<ExitReason> {
        if self.is_unset() || lots == 0 {
            return None;
        }

        let total: Decimal = trades.iter().map(|t| t.pnl).sum();
        let lots = Decimal::from(lots);
        let per_lot = total / lots;

        if total < self.stop * lots {
            let reason = if self.stop < Decimal::ZERO {
                ExitReason::StrategySlHit
            } else {
                ExitReason::StrategyTrailSlHit
            };
            warn!(%total, stop = %self.stop, %lots, %reason, "Strategy budget breached");
            return Some(reason);
        }

        if self.target > Decimal::ZERO && total > self.target * lots {
            self.stop = RATCHET_FRACTION * per_lot;
            self.target = Decimal::ZERO;
            info!(%total, stop = %self.stop, "Strategy target reached, trailing stop");
        } else if self.stop > Decimal::ZERO && self.stop * TRAIL_TRIGGER < per_lot {
            self.stop = RATCHET_FRACTION * per_lot;
            info!(%total, stop = %self.stop, "Strategy stop trailed");
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Direction;
    use chrono::Utc;

    fn trade_with_pnl(pnl: Decimal) -> Trade {
        let mut trade = Trade::new("ps", "X", Direction::Short, 50, Utc::now());
        trade.pnl = pnl;
        trade
    }

    #[test]
    fn test_unset_budget_never_fires() {
        let mut budget = StrategyBudget::new(Decimal::ZERO, Decimal::ZERO);
        let t = trade_with_pnl(dec!(-100000));
        assert_eq!(budget.evaluate(&[&t], 2), None);
    }

    #[test]
    fn test_stop_breach() {
        let mut budget = StrategyBudget::new(dec!(-1000), dec!(3000));
        let a = trade_with_pnl(dec!(-1500));
        let b = trade_with_pnl(dec!(-600));
        assert_eq!(budget.evaluate(&[&a, &b], 2), Some(ExitReason::StrategySlHit));
        assert_eq!(budget.evaluate(&[&a], 2), None);
    }

    #[test]
    fn test_target_ratchets_then_trailing_stop_fires() {
        let mut budget = StrategyBudget::new(dec!(-1000), dec!(2000));
        let winner = trade_with_pnl(dec!(5000));
        assert_eq!(budget.evaluate(&[&winner], 2), None);
        assert_eq!(budget.stop, dec!(2250));
        assert_eq!(budget.target, Decimal::ZERO);

        // further profit trails the stop up
        let bigger = trade_with_pnl(dec!(6000));
        assert_eq!(budget.evaluate(&[&bigger], 2), None);
        assert_eq!(budget.stop, dec!(2700));

        let giveback = trade_with_pnl(dec!(5000));
        assert_eq!(
            budget.evaluate(&[&giveback], 2),
            Some(ExitReason::StrategyTrailSlHit)
        );
    }

    #[test]
    fn test_zero_lots() {
        let mut budget = StrategyBudget::new(dec!(-1000), Decimal::ZERO);
        let t = trade_with_pnl(dec!(-5000));
        assert_eq!(budget.evaluate(&[&t], 0), None);
    }

    #[test]
    fn test_vix_scaling() {
        let mut budget = StrategyBudget::new(dec!(-1000), dec!(2000));
        budget.scale_for_vix(dec!(64));
        assert_eq!(budget.stop.round_dp(6), dec!(-2000));
        assert_eq!(budget.target.round_dp(6), dec!(4000));
    }
}
