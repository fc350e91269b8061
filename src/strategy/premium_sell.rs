//! Short strangle on cheap weekly options.
//!
//! From the start time, sells one CE and one PE at the first strike whose premium
//! falls under the cap. Each side may be re-entered after its previous trade
//! finished, up to `max_per_side` trades a day. The stop is placed once the entry
//! fills, `sl_pct` above the entry price.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing::debug;

use super::{Strategy, StrategyContext};
use crate::exchange::{Direction, OptionType};
use crate::trade::{InstrumentKind, Trade, TradeState};
use crate::utils::decimal::{round_to_nse_price, shift_pct};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PremiumSellParams {
    pub max_premium: Decimal,
    pub sl_pct: Decimal,
    pub max_per_side: u32,
}

impl Default for PremiumSellParams {
    fn default() -> Self {
        Self {
            max_premium: dec!(20),
            sl_pct: dec!(40),
            max_per_side: 2,
        }
    }
}

pub struct PremiumSell {
    params: PremiumSellParams,
}

impl PremiumSell {
    pub const KIND: &'static str = "premium_sell";

    pub fn new(params: PremiumSellParams) -> Self {
        Self { params }
    }

    fn side_is_open(&self, trades: &[Trade], option_type: OptionType) -> bool {
        let side: Vec<&Trade> = trades
            .iter()
            .filter(|t| t.instrument == InstrumentKind::Option(option_type))
            .collect();
        side.len() < self.params.max_per_side as usize
            && !side
                .iter()
                .any(|t| matches!(t.state(), TradeState::Created | TradeState::Active))
    }
}

#[async_trait]
impl Strategy for PremiumSell {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    async fn process(&self, ctx: &StrategyContext) -> Result<()> {
        let now = ctx.now();
        if now < ctx.start_at() || now > ctx.stop_at() {
            return Ok(());
        }

        let trades = ctx.trades();
        for option_type in [OptionType::Call, OptionType::Put] {
            if !self.side_is_open(&trades, option_type) {
                continue;
            }

            let (strike, premium) = ctx
                .strike_search()
                .maximum_premium(option_type, self.params.max_premium)
                .await?;
            let symbol = ctx.option_symbol(strike, option_type);
            debug!(%symbol, %premium, "Selling premium");

            let trade = ctx
                .new_trade(
                    &symbol,
                    InstrumentKind::Option(option_type),
                    Direction::Short,
                    premium,
                )
                .await?;
            ctx.submit(trade).await?;
        }
        Ok(())
    }

    fn trailing_stop_loss(&self, trade: &Trade, _ltp: Decimal) -> Decimal {
        if trade.entry > Decimal::ZERO && trade.stop_loss() == Decimal::ZERO {
            return round_to_nse_price(shift_pct(trade.entry, self.params.sl_pct));
        }
        Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn trade(option_type: OptionType, state: TradeState) -> Trade {
        let now = Utc::now();
        let mut trade = Trade::new("ps", "X", Direction::Short, 25, now);
        trade.instrument = InstrumentKind::Option(option_type);
        match state {
            TradeState::Created => {}
            TradeState::Disabled => trade.disable(crate::trade::DisableReason::PlacementFailed, now).unwrap(),
            _ => trade.transition(TradeState::Active, now).unwrap(),
        }
        trade
    }

    #[test]
    fn test_one_live_trade_per_side() {
        let strategy = PremiumSell::new(PremiumSellParams::default());
        let trades = vec![trade(OptionType::Call, TradeState::Active)];
        assert!(!strategy.side_is_open(&trades, OptionType::Call));
        assert!(strategy.side_is_open(&trades, OptionType::Put));

        let finished = vec![
            trade(OptionType::Put, TradeState::Disabled),
            trade(OptionType::Put, TradeState::Disabled),
        ];
        assert!(!strategy.side_is_open(&finished, OptionType::Put));
    }

    #[test]
    fn test_stop_seeded_above_entry_once() {
        let strategy = PremiumSell::new(PremiumSellParams::default());
        let mut trade = trade(OptionType::Call, TradeState::Active);
        assert_eq!(strategy.trailing_stop_loss(&trade, dec!(18)), Decimal::ZERO);

        trade.record_entry_fills(25, dec!(18.3)).unwrap();
        // 18.3 * 1.4 = 25.62 -> 25.65
        assert_eq!(strategy.trailing_stop_loss(&trade, dec!(18)), dec!(25.65));

        trade.set_initial_stop_loss(dec!(25.65));
        assert_eq!(strategy.trailing_stop_loss(&trade, dec!(10)), Decimal::ZERO);
    }
}
