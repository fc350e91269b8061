//! Option strike selection by premium.
//!
//! Every search starts at the ATM strike of the underlying's monthly future, first
//! walks in-the-money until the premium reaches the threshold, then walks
//! out-of-the-money one strike step at a time. Walks are bounded by a step limit.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{debug, info};

use crate::exchange::feed::is_derivative;
use crate::exchange::{with_retry, GatewayError, OptionType, Quote, QuoteSource};
use crate::utils::{nearest_strike, Clock, TradingCalendar};

/// Pause before re-quoting a strike that showed no depth.
const REQUOTE_DELAY: Duration = Duration::from_secs(1);

pub struct StrikeSearch<'a> {
    quotes: &'a dyn QuoteSource,
    clock: &'a dyn Clock,
    calendar: &'a TradingCalendar,
    underlying: &'a str,
    retry_delay: Duration,
    max_steps: u32,
}

impl<'a> StrikeSearch<'a> {
    pub fn new(
        quotes: &'a dyn QuoteSource,
        clock: &'a dyn Clock,
        calendar: &'a TradingCalendar,
        underlying: &'a str,
        retry_delay: Duration,
        max_steps: u32,
    ) -> Self {
        Self {
            quotes,
            clock,
            calendar,
            underlying,
            retry_delay,
            max_steps: max_steps.max(1),
        }
    }

    fn step(&self) -> u32 {
        self.calendar.strike_step(self.underlying)
    }

    fn towards_itm(&self, strike: u32, option_type: OptionType) -> u32 {
        match option_type {
            OptionType::Call => strike.saturating_sub(self.step()),
            OptionType::Put => strike + self.step(),
        }
    }

    fn towards_otm(&self, strike: u32, option_type: OptionType) -> u32 {
        match option_type {
            OptionType::Call => strike + self.step(),
            OptionType::Put => strike.saturating_sub(self.step()),
        }
    }

    fn symbol(&self, strike: u32, option_type: OptionType) -> String {
        let today = self.calendar.local_date(self.clock.now());
        self.calendar
            .weekly_option_symbol(self.underlying, strike, option_type, today)
    }

    async fn quote(&self, symbol: &str) -> Result<Quote, GatewayError> {
        with_retry(self.clock, self.retry_delay, "quote", || {
            self.quotes.quote(symbol, is_derivative(symbol))
        })
        .await
    }

    /// Quote of a strike; `None` once the strike does not exist.
    async fn strike_quote(&self, strike: u32, option_type: OptionType) -> Result<Option<Quote>> {
        let symbol = self.symbol(strike, option_type);
        let mut quote = match self.quote(&symbol).await {
            Ok(quote) => quote,
            Err(GatewayError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Quote failed for {symbol}")),
        };

        if quote.buy_qty == 0 && quote.sell_qty == 0 {
            debug!(%symbol, "No depth, re-quoting");
            self.clock.sleep(REQUOTE_DELAY).await;
            quote = self
                .quote(&symbol)
                .await
                .with_context(|| format!("Quote failed for {symbol}"))?;
        }
        Ok(Some(quote))
    }

    /// ATM strike of the current monthly future.
    pub async fn atm_strike(&self) -> Result<u32> {
        let future = self.calendar.futures_symbol(self.underlying, self.clock.now());
        let quote = self
            .quote(&future)
            .await
            .with_context(|| format!("Quote failed for {future}"))?;
        anyhow::ensure!(quote.last_price > Decimal::ZERO, "No price for {future}");
        Ok(nearest_strike(quote.last_price, self.step()))
    }

    /// Walk ITM from the ATM strike until a premium reaches `threshold`; the walk
    /// out-of-the-money starts one step beyond that strike.
    async fn itm_start(&self, option_type: OptionType, threshold: Decimal) -> Result<u32> {
        let mut strike = self.atm_strike().await?;
        for _ in 0..self.max_steps {
            let premium = self
                .quote(&self.symbol(strike, option_type))
                .await
                .map(|q| q.last_price)
                .unwrap_or_default();
            strike = self.towards_itm(strike, option_type);
            if premium >= threshold {
                return Ok(strike);
            }
        }
        bail!("No {option_type} strike with premium above {threshold}")
    }

    /// First strike walking OTM whose premium is below `maximum`.
    pub async fn maximum_premium(
        &self,
        option_type: OptionType,
        maximum: Decimal,
    ) -> Result<(u32, Decimal)> {
        let mut strike = self.itm_start(option_type, maximum).await?;
        let mut last = None;
        for _ in 0..self.max_steps {
            let Some(quote) = self.strike_quote(strike, option_type).await? else {
                break;
            };
            if quote.last_price < maximum {
                info!(strike, premium = %quote.last_price, %option_type, "Selected strike under premium cap");
                return Ok((strike, quote.last_price));
            }
            last = Some((strike, quote.last_price));
            strike = self.towards_otm(strike, option_type);
        }
        last.with_context(|| format!("No {option_type} strike under {maximum}"))
    }

    /// Last strike walking OTM whose premium is still at least `minimum`.
    pub async fn minimum_premium(
        &self,
        option_type: OptionType,
        minimum: Decimal,
    ) -> Result<(u32, Decimal)> {
        let mut strike = self.itm_start(option_type, minimum).await?;
        let mut last = None;
        for _ in 0..self.max_steps {
            let Some(quote) = self.strike_quote(strike, option_type).await? else {
                break;
            };
            if quote.last_price < minimum {
                break;
            }
            last = Some((strike, quote.last_price));
            strike = self.towards_otm(strike, option_type);
        }
        last.with_context(|| format!("No {option_type} strike at or above {minimum}"))
    }

    /// Strike whose premium is closest to `target`.
    ///
    /// The first strike at or under the target only wins over its neighbour when
    /// it is closer, has traded today and shows depth on both sides.
    pub async fn nearest_premium(
        &self,
        option_type: OptionType,
        target: Decimal,
    ) -> Result<(u32, Decimal)> {
        let mut strike = self.itm_start(option_type, target).await?;
        let mut last: Option<(u32, Decimal)> = None;
        for _ in 0..self.max_steps {
            let Some(quote) = self.strike_quote(strike, option_type).await? else {
                break;
            };
            let premium = quote.last_price;
            if premium > target {
                last = Some((strike, premium));
                strike = self.towards_otm(strike, option_type);
                continue;
            }

            let closer = match last {
                Some((_, above)) => above - target > target - premium,
                None => true,
            };
            if closer && quote.volume > 0 && quote.has_depth() {
                return Ok((strike, premium));
            }
            debug!(
                strike,
                volume = quote.volume,
                buy_qty = quote.buy_qty,
                sell_qty = quote.sell_qty,
                "Keeping previous strike"
            );
            break;
        }
        last.with_context(|| format!("No {option_type} strike near {target}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarketConfig;
    use crate::exchange::PaperBroker;
    use crate::utils::ManualClock;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Chain {
        clock: Arc<ManualClock>,
        broker: PaperBroker,
        calendar: TradingCalendar,
    }

    impl Chain {
        async fn new(calls: &[(u32, Decimal)]) -> Self {
            // Tuesday 1 Oct 2024, 10:00 IST
            let clock = Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2024, 10, 1, 4, 30, 0).unwrap(),
            ));
            let broker = PaperBroker::with_clock(clock.clone());
            let calendar = TradingCalendar::new(&MarketConfig::default()).unwrap();

            let future = calendar.futures_symbol("NIFTY", clock.now());
            broker.set_price(&future, dec!(25010)).await;
            let today = calendar.local_date(clock.now());
            for (strike, premium) in calls {
                let symbol = calendar.weekly_option_symbol("NIFTY", *strike, OptionType::Call, today);
                broker
                    .set_quote(Quote {
                        symbol,
                        last_price: *premium,
                        volume: 1000,
                        buy_qty: 500,
                        sell_qty: 500,
                        ..Default::default()
                    })
                    .await;
            }
            Self {
                clock,
                broker,
                calendar,
            }
        }

        fn search(&self) -> StrikeSearch<'_> {
            StrikeSearch::new(
                &self.broker,
                self.clock.as_ref(),
                &self.calendar,
                "NIFTY",
                Duration::from_millis(10),
                20,
            )
        }
    }

    fn calls() -> Vec<(u32, Decimal)> {
        vec![
            (24950, dec!(120)),
            (25000, dec!(80)),
            (25050, dec!(45)),
            (25100, dec!(22)),
            (25150, dec!(12)),
            (25200, dec!(6)),
        ]
    }

    #[tokio::test]
    async fn test_maximum_premium() {
        let chain = Chain::new(&calls()).await;
        let search = chain.search();
        assert_eq!(search.atm_strike().await.unwrap(), 25000);
        assert_eq!(
            search.maximum_premium(OptionType::Call, dec!(20)).await.unwrap(),
            (25150, dec!(12))
        );
    }

    #[tokio::test]
    async fn test_minimum_and_nearest_premium() {
        let chain = Chain::new(&calls()).await;
        let search = chain.search();
        assert_eq!(
            search.minimum_premium(OptionType::Call, dec!(20)).await.unwrap(),
            (25100, dec!(22))
        );
        // 22 is 2 away, 12 is 8 away
        assert_eq!(
            search.nearest_premium(OptionType::Call, dec!(20)).await.unwrap(),
            (25100, dec!(22))
        );
        // 12 is 3 away, 22 is 7 away
        assert_eq!(
            search.nearest_premium(OptionType::Call, dec!(15)).await.unwrap(),
            (25150, dec!(12))
        );
    }

    #[tokio::test]
    async fn test_chain_end_returns_last_strike() {
        let chain = Chain::new(&calls()[..4]).await;
        let search = chain.search();
        assert_eq!(
            search.minimum_premium(OptionType::Call, dec!(20)).await.unwrap(),
            (25100, dec!(22))
        );
        assert!(search.maximum_premium(OptionType::Call, dec!(500)).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_book_is_requoted_after_a_second() {
        let chain = Chain::new(&calls()).await;
        let today = chain.calendar.local_date(chain.clock.now());
        let symbol = chain
            .calendar
            .weekly_option_symbol("NIFTY", 25150, OptionType::Call, today);
        chain
            .broker
            .set_quote(Quote {
                symbol,
                last_price: dec!(12),
                ..Default::default()
            })
            .await;

        let before = chain.clock.now();
        let search = chain.search();
        // thin strike cannot be chosen as nearest
        assert_eq!(
            search.nearest_premium(OptionType::Call, dec!(15)).await.unwrap(),
            (25100, dec!(22))
        );
        assert!(chain.clock.now() - before >= chrono::Duration::seconds(1));
    }
}
