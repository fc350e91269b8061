//! Option range breakout.
//!
//! Between the start and breakout times the strategy tracks one or two options
//! and records their price range. After the breakout time it places a LONG
//! stop-limit entry just above the high of each tracked option.
//!
//! Two leg selections:
//! - `itm_call`: the CE one strike below ATM of the index, stop a fixed
//!   percentage under the entry
//! - `minimum_premium`: a CE and a PE, each the farthest OTM strike still priced
//!   at `min_premium`. The stop and target come from the range, and the stop
//!   steps up by `trail_step_pct` of the entry for every such step of profit

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveTime;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{Strategy, StrategyContext};
use crate::exchange::{Direction, OptionType};
use crate::trade::{InstrumentKind, Trade};
use crate::utils::decimal::{round_to_nse_price, shift_pct};
use crate::utils::nearest_strike;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakoutLegs {
    #[default]
    ItmCall,
    MinimumPremium,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RangeBreakoutParams {
    pub breakout_time: NaiveTime,
    pub legs: BreakoutLegs,
    pub sl_pct: Decimal,
    /// Added to the range high for the entry trigger
    pub entry_buffer: Decimal,
    pub min_premium: Decimal,
    /// Stop distance below the entry, in ranges
    pub range_stop: Decimal,
    /// Target distance above the entry, in ranges
    pub range_target: Decimal,
    pub trail_step_pct: Decimal,
}

impl Default for RangeBreakoutParams {
    fn default() -> Self {
        Self {
            breakout_time: NaiveTime::from_hms_opt(14, 56, 59).unwrap_or(NaiveTime::MIN),
            legs: BreakoutLegs::ItmCall,
            sl_pct: dec!(40),
            entry_buffer: dec!(0.5),
            min_premium: dec!(200),
            range_stop: dec!(0.5),
            range_target: dec!(2),
            trail_step_pct: dec!(10),
        }
    }
}

/// Stop and target of a breakout entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RangeExits {
    stop: Decimal,
    target: Decimal,
}

pub struct RangeBreakout {
    params: RangeBreakoutParams,
    /// Options picked for the day
    tracked: Mutex<Vec<(OptionType, String)>>,
}

impl RangeBreakout {
    pub const KIND: &'static str = "range_breakout";

    pub fn new(params: RangeBreakoutParams) -> Self {
        Self {
            params,
            tracked: Mutex::new(Vec::new()),
        }
    }

    pub async fn tracked_symbols(&self) -> Vec<String> {
        self.tracked
            .lock()
            .await
            .iter()
            .map(|(_, symbol)| symbol.clone())
            .collect()
    }

    /// Entry trigger from the range high and the current price.
    fn entry_price(&self, high: Decimal, ltp: Decimal) -> Decimal {
        let high = if ltp > high { ltp * dec!(1.01) } else { high };
        high + self.params.entry_buffer
    }

    /// Range-derived exits; none without a positive range.
    fn range_exits(&self, entry: Decimal, high: Decimal, low: Decimal) -> Option<RangeExits> {
        if self.params.legs != BreakoutLegs::MinimumPremium || low <= Decimal::ZERO {
            return None;
        }
        let range = high - low;
        if range <= Decimal::ZERO {
            return None;
        }
        let stop = round_to_nse_price(entry - self.params.range_stop * range);
        let target = round_to_nse_price(entry + self.params.range_target * range);
        (stop > Decimal::ZERO && stop < entry).then_some(RangeExits { stop, target })
    }

    /// Stop moved from the initial stop by whole profit steps; zero below one step.
    fn step_trail(&self, trade: &Trade, ltp: Decimal) -> Decimal {
        if trade.entry <= Decimal::ZERO || ltp <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let step = trade.entry * self.params.trail_step_pct / dec!(100);
        let profit = match trade.direction {
            Direction::Long => ltp - trade.entry,
            Direction::Short => trade.entry - ltp,
        }
        .trunc();
        if step <= Decimal::ZERO || profit < step {
            return Decimal::ZERO;
        }

        let shift = (profit / step).trunc() * step;
        round_to_nse_price(match trade.direction {
            Direction::Long => trade.initial_stop_loss() + shift,
            Direction::Short => trade.initial_stop_loss() - shift,
        })
    }

    async fn pick_options(&self, ctx: &StrategyContext) -> Result<Vec<(OptionType, String)>> {
        match self.params.legs {
            BreakoutLegs::ItmCall => {
                let index = ctx.calendar().index_symbol(ctx.underlying());
                let spot = ctx.ltp(&index).await?;
                let step = ctx.calendar().strike_step(ctx.underlying());
                let strike = nearest_strike(spot, step).saturating_sub(step);
                let symbol = ctx.option_symbol(strike, OptionType::Call);
                info!(%index, %spot, %symbol, "Tracking range of ITM call");
                Ok(vec![(OptionType::Call, symbol)])
            }
            BreakoutLegs::MinimumPremium => {
                let search = ctx.strike_search();
                let mut picked = Vec::with_capacity(2);
                for option_type in [OptionType::Call, OptionType::Put] {
                    let (strike, premium) = search
                        .minimum_premium(option_type, self.params.min_premium)
                        .await?;
                    let symbol = ctx.option_symbol(strike, option_type);
                    info!(%symbol, %premium, "Tracking range of minimum premium option");
                    picked.push((option_type, symbol));
                }
                Ok(picked)
            }
        }
    }
}

#[async_trait]
impl Strategy for RangeBreakout {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    async fn process(&self, ctx: &StrategyContext) -> Result<()> {
        let now = ctx.now();
        if now < ctx.start_at() {
            return Ok(());
        }

        let trades = ctx.trades();
        if trades.len() >= ctx.instance().config().max_trades_per_day as usize {
            return Ok(());
        }

        let breakout_at = ctx.calendar().at(ctx.today(), self.params.breakout_time);
        let mut tracked = self.tracked.lock().await;

        if now <= breakout_at {
            if tracked.is_empty() {
                let picked = self.pick_options(ctx).await?;
                ctx.track(picked.iter().map(|(_, s)| s.clone()).collect())
                    .await?;
                *tracked = picked;
            }
            return Ok(());
        }

        for (option_type, symbol) in tracked.iter() {
            let instrument = InstrumentKind::Option(*option_type);
            if trades.iter().any(|t| t.instrument == instrument) {
                continue;
            }

            let Some(range) = ctx.prices().get(symbol).filter(|p| p.high > Decimal::ZERO) else {
                warn!(%symbol, "No range high recorded, skipping breakout");
                continue;
            };
            let ltp = ctx.quote(symbol).await?.last_price;
            let entry = self.entry_price(range.high, ltp);

            let mut trade = ctx
                .new_trade(symbol, instrument, Direction::Long, entry)
                .await?;
            trade.place_market_order = false;
            if let Some(exits) = self.range_exits(entry, range.high, range.low) {
                trade.set_initial_stop_loss(exits.stop);
                trade.target = exits.target;
            }

            info!(
                %symbol,
                high = %range.high,
                low = %range.low,
                %ltp,
                %entry,
                stop = %trade.stop_loss(),
                target = %trade.target,
                "Placing breakout entry"
            );
            ctx.submit(trade).await?;
        }
        Ok(())
    }

    fn trailing_stop_loss(&self, trade: &Trade, ltp: Decimal) -> Decimal {
        if trade.entry <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        if trade.stop_loss() == Decimal::ZERO {
            return round_to_nse_price(shift_pct(trade.entry, -self.params.sl_pct));
        }
        match self.params.legs {
            BreakoutLegs::ItmCall => Decimal::ZERO,
            BreakoutLegs::MinimumPremium => self.step_trail(trade, ltp),
        }
    }
}
