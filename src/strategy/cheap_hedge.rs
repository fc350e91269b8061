//! Far out-of-the-money hedge pair.
//!
//! Once a day buys one CE and one PE whose premium is nearest to a small target,
//! slightly above the quoted premium. No stop is placed.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing::info;

use super::{Strategy, StrategyContext};
use crate::exchange::{Direction, OptionType};
use crate::trade::InstrumentKind;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheapHedgeParams {
    pub target_premium: Decimal,
    pub entry_buffer: Decimal,
}

impl Default for CheapHedgeParams {
    fn default() -> Self {
        Self {
            target_premium: dec!(1),
            entry_buffer: dec!(0.1),
        }
    }
}

pub struct CheapHedge {
    params: CheapHedgeParams,
}

impl CheapHedge {
    pub const KIND: &'static str = "cheap_hedge";

    pub fn new(params: CheapHedgeParams) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Strategy for CheapHedge {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    async fn process(&self, ctx: &StrategyContext) -> Result<()> {
        let now = ctx.now();
        if now < ctx.start_at() || now > ctx.stop_at() || !ctx.trades().is_empty() {
            return Ok(());
        }

        for option_type in [OptionType::Call, OptionType::Put] {
            let (strike, premium) = ctx
                .strike_search()
                .nearest_premium(option_type, self.params.target_premium)
                .await?;
            let symbol = ctx.option_symbol(strike, option_type);
            info!(%symbol, %premium, "Buying hedge");

            let trade = ctx
                .new_trade(
                    &symbol,
                    InstrumentKind::Option(option_type),
                    Direction::Long,
                    premium + self.params.entry_buffer,
                )
                .await?;
            ctx.submit(trade).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MarketConfig, StrategyConfig};
    use crate::exchange::{PaperBroker, Quote};
    use crate::manager::{ManagerCommand, ManagerHandle, PriceCache};
    use crate::strategy::StrategyInstance;
    use crate::trade::Trade;
    use crate::utils::{Clock, ManualClock, TradingCalendar};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{mpsc, watch};

    /// Accepts every trade and republishes the snapshot.
    fn accept_all(
        mut commands: mpsc::Receiver<ManagerCommand>,
        trades: watch::Sender<Arc<Vec<Trade>>>,
    ) {
        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                if let ManagerCommand::AddTrade { trade, ack } = command {
                    let mut all = trades.borrow().as_ref().clone();
                    all.push(*trade);
                    trades.send_replace(Arc::new(all));
                    let _ = ack.send(true);
                }
            }
        });
    }

    #[tokio::test]
    async fn test_buys_one_pair_per_day() {
        // Tuesday 1 Oct 2024, 10:00 IST
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 10, 1, 4, 30, 0).unwrap(),
        ));
        let calendar = Arc::new(TradingCalendar::new(&MarketConfig::default()).unwrap());
        let broker = Arc::new(PaperBroker::with_clock(clock.clone()));
        let today = calendar.local_date(clock.now());

        broker
            .set_price(&calendar.futures_symbol("NIFTY", clock.now()), dec!(25010))
            .await;
        let chain = [
            (OptionType::Call, 24950, dec!(130)),
            (OptionType::Call, 25000, dec!(80)),
            (OptionType::Call, 25050, dec!(40)),
            (OptionType::Call, 25100, dec!(10)),
            (OptionType::Call, 25150, dec!(3)),
            (OptionType::Call, 25200, dec!(1.1)),
            (OptionType::Call, 25250, dec!(0.95)),
            (OptionType::Put, 25050, dec!(130)),
            (OptionType::Put, 25000, dec!(80)),
            (OptionType::Put, 24950, dec!(40)),
            (OptionType::Put, 24900, dec!(10)),
            (OptionType::Put, 24850, dec!(3)),
            (OptionType::Put, 24800, dec!(1.4)),
            (OptionType::Put, 24750, dec!(0.8)),
        ];
        for (option_type, strike, premium) in chain {
            broker
                .set_quote(Quote {
                    symbol: calendar.weekly_option_symbol("NIFTY", strike, option_type, today),
                    last_price: premium,
                    volume: 1000,
                    buy_qty: 500,
                    sell_qty: 500,
                    ..Default::default()
                })
                .await;
        }

        let instance = Arc::new(StrategyInstance::new(
            StrategyConfig::new("hedge", CheapHedge::KIND),
            Box::new(CheapHedge::new(CheapHedgeParams::default())),
            Decimal::ONE,
            Arc::clone(&calendar),
        ));
        let (commands_tx, commands) = mpsc::channel(8);
        let (trades, trades_rx) = watch::channel(Arc::new(Vec::new()));
        accept_all(commands, trades);
        let ctx = StrategyContext::new(
            instance,
            clock.clone(),
            PriceCache::new(),
            broker,
            ManagerHandle::new(commands_tx, trades_rx),
            Duration::from_millis(10),
        );
        ctx.set_lots(2);

        CheapHedge::new(CheapHedgeParams::default())
            .process(&ctx)
            .await
            .unwrap();
        let bought = ctx.trades();
        assert_eq!(bought.len(), 2);

        let call = &bought[0];
        assert_eq!(
            call.symbol,
            calendar.weekly_option_symbol("NIFTY", 25250, OptionType::Call, today)
        );
        assert_eq!(call.direction, Direction::Long);
        assert_eq!(call.instrument, InstrumentKind::Option(OptionType::Call));
        assert_eq!(call.requested_entry, dec!(1.05));
        assert_eq!(call.qty(), 50);

        // 1.4 is 0.4 away, 0.8 only 0.2
        let put = &bought[1];
        assert_eq!(
            put.symbol,
            calendar.weekly_option_symbol("NIFTY", 24750, OptionType::Put, today)
        );
        assert_eq!(put.requested_entry, dec!(0.9));

        CheapHedge::new(CheapHedgeParams::default())
            .process(&ctx)
            .await
            .unwrap();
        assert_eq!(ctx.trades().len(), 2);
    }
}
