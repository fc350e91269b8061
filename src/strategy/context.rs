//! Everything a strategy may use while deciding.

use anyhow::{Context as _, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::strikes::StrikeSearch;
use super::StrategyInstance;
use crate::exchange::feed::is_derivative;
use crate::exchange::traits::segment;
use crate::exchange::{with_retry, Direction, GatewayError, OptionType, Quote, QuoteSource};
use crate::manager::{ManagerHandle, PriceCache};
use crate::trade::{InstrumentKind, Trade};
use crate::utils::{Clock, TradingCalendar};

/// Per-instance view of the account, passed to [`super::Strategy::process`].
pub struct StrategyContext {
    instance: Arc<StrategyInstance>,
    clock: Arc<dyn Clock>,
    prices: PriceCache,
    quotes: Arc<dyn QuoteSource>,
    manager: ManagerHandle,
    retry_delay: Duration,
    max_strike_steps: u32,
    lots: AtomicU32,
}

impl StrategyContext {
    pub fn new(
        instance: Arc<StrategyInstance>,
        clock: Arc<dyn Clock>,
        prices: PriceCache,
        quotes: Arc<dyn QuoteSource>,
        manager: ManagerHandle,
        retry_delay: Duration,
    ) -> Self {
        Self {
            instance,
            clock,
            prices,
            quotes,
            manager,
            retry_delay,
            max_strike_steps: 20,
            lots: AtomicU32::new(0),
        }
    }

    pub fn instance(&self) -> &StrategyInstance {
        &self.instance
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn calendar(&self) -> &TradingCalendar {
        self.instance.calendar()
    }

    pub fn prices(&self) -> &PriceCache {
        &self.prices
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        self.calendar().local_date(self.now())
    }

    pub fn underlying(&self) -> &str {
        &self.instance.config().underlying
    }

    pub fn start_at(&self) -> DateTime<Utc> {
        self.instance.start_at(self.today())
    }

    pub fn stop_at(&self) -> DateTime<Utc> {
        self.instance.stop_at(self.today())
    }

    /// Lots resolved for today by the run loop.
    pub fn lots(&self) -> u32 {
        self.lots.load(Ordering::SeqCst)
    }

    pub(crate) fn set_lots(&self, lots: u32) {
        self.lots.store(lots, Ordering::SeqCst);
    }

    /// Quote with the single transient retry.
    pub async fn quote(&self, symbol: &str) -> Result<Quote, GatewayError> {
        with_retry(self.clock.as_ref(), self.retry_delay, "quote", || {
            self.quotes.quote(symbol, is_derivative(symbol))
        })
        .await
    }

    /// Cached last price, falling back to a fresh quote.
    pub async fn ltp(&self, symbol: &str) -> Result<Decimal> {
        let cached = self.prices.ltp(symbol);
        if cached > Decimal::ZERO {
            return Ok(cached);
        }
        let quote = self
            .quote(symbol)
            .await
            .with_context(|| format!("No price for {symbol}"))?;
        Ok(quote.last_price)
    }

    pub fn strike_search(&self) -> StrikeSearch<'_> {
        StrikeSearch::new(
            self.quotes.as_ref(),
            self.clock.as_ref(),
            self.calendar(),
            self.underlying(),
            self.retry_delay,
            self.max_strike_steps,
        )
    }

    pub fn option_symbol(&self, strike: u32, option_type: OptionType) -> String {
        self.calendar()
            .weekly_option_symbol(self.underlying(), strike, option_type, self.today())
    }

    /// This strategy's trades from the manager's latest snapshot.
    pub fn trades(&self) -> Vec<Trade> {
        self.manager
            .trades()
            .iter()
            .filter(|t| t.strategy == self.instance.id())
            .cloned()
            .collect()
    }

    /// Build a CREATED trade sized at `lot_size × lots`.
    pub async fn new_trade(
        &self,
        symbol: &str,
        instrument: InstrumentKind,
        direction: Direction,
        requested_entry: Decimal,
    ) -> Result<Trade> {
        let derivative = instrument.is_derivative();
        let info = with_retry(self.clock.as_ref(), self.retry_delay, "instrument", || {
            self.quotes.instrument(symbol, derivative)
        })
        .await
        .with_context(|| format!("No instrument data for {symbol}"))?;

        let config = self.instance.config();
        let today = self.today();
        let mut trade = Trade::new(
            self.instance.id(),
            symbol,
            direction,
            info.lot_size * self.lots(),
            self.now(),
        );
        trade.exchange = segment(derivative).to_string();
        trade.instrument = instrument;
        trade.product_type = config.product_type;
        trade.underlying = Some(config.underlying.clone());
        trade.requested_entry = requested_entry;
        trade.strategy_timestamp = Some(self.instance.start_at(today));
        trade.square_off_at = self.instance.square_off_at(today);
        trade.place_market_order = true;
        Ok(trade)
    }

    /// Hand a trade to the manager; false when it was dropped as a duplicate.
    pub async fn submit(&self, trade: Trade) -> Result<bool> {
        if !self.instance.is_enabled() {
            warn!(strategy = %self.instance.id(), "Strategy disabled, trade not submitted");
            return Ok(false);
        }
        info!(
            strategy = %self.instance.id(),
            symbol = %trade.symbol,
            direction = %trade.direction,
            qty = trade.qty(),
            entry = %trade.requested_entry,
            "Submitting trade"
        );
        self.manager.add_trade(trade).await
    }

    pub async fn track(&self, symbols: Vec<String>) -> Result<()> {
        self.manager.track(symbols).await
    }
}
