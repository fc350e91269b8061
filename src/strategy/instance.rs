//! Framework-owned wrapper around one configured strategy.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use super::Strategy;
use crate::config::StrategyConfig;
use crate::exchange::Tick;
use crate::risk::{LotSizer, StrategyBudget};
use crate::trade::{DisableReason, ExitReason, Trade, TradeState};
use crate::utils::TradingCalendar;

pub struct StrategyInstance {
    config: StrategyConfig,
    strategy: Box<dyn Strategy>,
    enabled: AtomicBool,
    budget: Mutex<StrategyBudget>,
    lot_sizer: LotSizer,
    calendar: Arc<TradingCalendar>,
}

impl StrategyInstance {
    pub fn new(
        config: StrategyConfig,
        strategy: Box<dyn Strategy>,
        multiplier: Decimal,
        calendar: Arc<TradingCalendar>,
    ) -> Self {
        let budget = StrategyBudget::new(config.strategy_sl, config.strategy_target);
        let lot_sizer = LotSizer::new(config.lots.clone(), multiplier);
        Self {
            enabled: AtomicBool::new(config.enabled),
            config,
            strategy,
            budget: Mutex::new(budget),
            lot_sizer,
            calendar,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn kind(&self) -> &'static str {
        self.strategy.kind()
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn strategy(&self) -> &dyn Strategy {
        self.strategy.as_ref()
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            info!(strategy = %self.config.id, enabled, "Strategy enable flag changed");
        }
    }

    pub fn disable(&self) {
        self.set_enabled(false);
    }

    pub fn start_at(&self, date: NaiveDate) -> DateTime<Utc> {
        self.calendar.at(date, self.config.start)
    }

    /// No new entries after this instant.
    pub fn stop_at(&self, date: NaiveDate) -> DateTime<Utc> {
        self.calendar.at(date, self.config.stop)
    }

    pub fn square_off_at(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        self.config
            .square_off
            .map(|time| self.calendar.at(date, time))
    }

    pub fn lots_for(&self, date: NaiveDate) -> u32 {
        self.lot_sizer
            .lots_for(&self.calendar, &self.config.underlying, date)
    }

    pub fn budget(&self) -> StrategyBudget {
        *self.budget.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn scale_budget_for_vix(&self, vix: Decimal) {
        self.budget
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .scale_for_vix(vix);
    }

    /// Entry gate for a CREATED trade on a tick of its symbol.
    ///
    /// Base rules run first and disable the trade with a specific reason on
    /// failure; the strategy veto only sees trades that passed them.
    /// `placed` is this strategy's [`trades_placed`](Self::trades_placed) count.
    pub fn should_place_trade(
        &self,
        trade: &mut Trade,
        tick: &Tick,
        placed: usize,
        now: DateTime<Utc>,
    ) -> bool {
        let date = self.calendar.local_date(now);

        let reason = if trade.qty() == 0 {
            Some(DisableReason::InvalidQuantity)
        } else if now > self.stop_at(date) {
            Some(DisableReason::NoNewTradesCutOffTimeReached)
        } else if placed >= self.config.max_trades_per_day as usize {
            Some(DisableReason::MaxTradesPerDayReached)
        } else {
            self.strategy.entry_veto(trade, tick).map(DisableReason::Veto)
        };

        let Some(reason) = reason else {
            return true;
        };

        warn!(trade_id = %trade.trade_id, %reason, "Trade disabled before entry");
        if let Err(e) = trade.disable(reason, now) {
            warn!(error = %e, "Could not disable trade");
        }
        false
    }

    /// Trades of this strategy that reached the broker.
    pub fn trades_placed(&self, all_trades: &[Trade]) -> usize {
        all_trades
            .iter()
            .filter(|t| t.strategy == self.config.id)
            .filter(|t| !matches!(t.state(), TradeState::Created | TradeState::Disabled))
            .count()
    }

    /// Aggregate budget check over this strategy's trades.
    pub fn is_target_or_sl_hit(&self, all_trades: &[Trade], date: NaiveDate) -> Option<ExitReason> {
        let mine: Vec<&Trade> = all_trades
            .iter()
            .filter(|t| t.strategy == self.config.id)
            .collect();
        let lots = self.lots_for(date);
        self.budget
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .evaluate(&mine, lots)
    }

    pub fn trailing_stop_loss(&self, trade: &Trade, ltp: Decimal) -> Decimal {
        self.strategy.trailing_stop_loss(trade, ltp)
    }
}
