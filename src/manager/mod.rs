//! Trade manager: the per-account control loop.
//!
//! One task owns every trade of the account. Each cycle it:
//! - Pulls order status deltas and reconciles local order copies
//! - Tracks the entry, target and stop-loss legs of every ACTIVE trade
//! - Squares off trades past their cutoff or with a pending exit request
//! - Checks each enabled strategy's aggregate budget
//! - Publishes a read-only trade snapshot and saves it
//!
//! Strategies talk to it through a [`ManagerHandle`]; ticks arrive on the same
//! command channel and trigger entry placement for waiting trades.

mod executor;
mod exit;
mod handle;
mod price_cache;
mod tracking;

pub use executor::OrderExecutor;
pub use handle::{ManagerCommand, ManagerHandle};
pub use price_cache::{PriceCache, PriceEntry};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::{Config, ManagerConfig};
use crate::exchange::{MarketDataFeed, Order, OrderGateway, SubscriptionMode, Tick};
use crate::persistence::PersistenceSink;
use crate::strategy::StrategyInstance;
use crate::trade::{ExitReason, Trade, TradeState};
use crate::utils::{next_aligned_delay, Clock, TradingCalendar};
use tracking::LegContext;

/// External collaborators of a [`TradeManager`].
pub struct ManagerServices {
    pub gateway: Arc<dyn OrderGateway>,
    pub feed: Arc<dyn MarketDataFeed>,
    pub sink: Arc<dyn PersistenceSink>,
    pub prices: PriceCache,
    pub calendar: Arc<TradingCalendar>,
    pub clock: Arc<dyn Clock>,
}

pub struct TradeManager {
    account_id: String,
    config: ManagerConfig,
    /// Global cutoff for trades without their own square-off time
    square_off: NaiveTime,
    trades: Vec<Trade>,
    strategies: Vec<Arc<StrategyInstance>>,
    executor: OrderExecutor,
    feed: Arc<dyn MarketDataFeed>,
    sink: Arc<dyn PersistenceSink>,
    prices: PriceCache,
    calendar: Arc<TradingCalendar>,
    clock: Arc<dyn Clock>,
    snapshot: watch::Sender<Arc<Vec<Trade>>>,
    subscribed: HashSet<String>,
}

impl TradeManager {
    pub fn new(
        config: &Config,
        strategies: Vec<Arc<StrategyInstance>>,
        services: ManagerServices,
    ) -> Self {
        let executor = OrderExecutor::new(
            services.gateway,
            Arc::clone(&services.clock),
            Duration::from_millis(config.manager.retry_delay_ms),
            config.manager.max_modifications,
        );
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            account_id: config.account.id.clone(),
            config: config.manager.clone(),
            square_off: config.market.square_off,
            trades: Vec::new(),
            strategies,
            executor,
            feed: services.feed,
            sink: services.sink,
            prices: services.prices,
            calendar: services.calendar,
            clock: services.clock,
            snapshot,
            subscribed: HashSet::new(),
        }
    }

    /// A handle for strategies plus the receiving end for [`TradeManager::run`].
    pub fn channel(&self, capacity: usize) -> (ManagerHandle, mpsc::Receiver<ManagerCommand>) {
        let (commands, receiver) = mpsc::channel(capacity);
        (ManagerHandle::new(commands, self.snapshot.subscribe()), receiver)
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn strategies(&self) -> &[Arc<StrategyInstance>] {
        &self.strategies
    }

    fn strategy(&self, id: &str) -> Option<&Arc<StrategyInstance>> {
        self.strategies.iter().find(|s| s.id() == id)
    }

    /// Reload today's trades and re-subscribe their symbols.
    pub async fn restore(&mut self) -> Result<usize> {
        let today = self.calendar.local_date(self.clock.now());
        let restored = self
            .sink
            .load_trades(&self.account_id, today)
            .await
            .context("Failed to load persisted trades")?;

        let mut added = 0;
        for trade in restored {
            if self.trades.iter().any(|t| t.trade_id == trade.trade_id) {
                continue;
            }
            debug!(%trade, "Trade restored");
            self.trades.push(trade);
            added += 1;
        }

        let symbols: Vec<String> = self.trades.iter().map(|t| t.symbol.clone()).collect();
        self.subscribe(symbols).await;
        self.publish();
        info!(account = %self.account_id, %today, restored = added, "📂 [PERSISTENCE] Trades restored");
        Ok(added)
    }

    /// Process commands and run a cycle on every cadence boundary until shutdown.
    pub async fn run(mut self, mut commands: mpsc::Receiver<ManagerCommand>) {
        info!(
            account = %self.account_id,
            strategies = self.strategies.len(),
            cycle_secs = self.config.cycle_secs,
            "🚀 Trade manager started"
        );

        let clock = Arc::clone(&self.clock);
        loop {
            let delay = next_aligned_delay(clock.now(), self.config.cycle_secs, 0);
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(ManagerCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                _ = clock.sleep(delay) => self.run_cycle().await,
            }
        }

        self.save().await;
        info!(account = %self.account_id, "🛑 Trade manager stopped");
    }

    pub async fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::AddTrade { trade, ack } => {
                let accepted = self.add_trade(*trade).await;
                // the strategy may already be gone
                let _ = ack.send(accepted);
            }
            ManagerCommand::Tick(tick) => self.on_tick(tick).await,
            ManagerCommand::Track(symbols) => self.subscribe(symbols).await,
            ManagerCommand::SetStrategyEnabled {
                strategy_id,
                enabled,
            } => match self.strategy(&strategy_id) {
                Some(instance) => instance.set_enabled(enabled),
                None => warn!(strategy = %strategy_id, "Unknown strategy, enable flag ignored"),
            },
            ManagerCommand::Shutdown => self.save().await,
        }
    }

    /// Accept a new trade unless it duplicates one already held.
    pub async fn add_trade(&mut self, trade: Trade) -> bool {
        if let Some(existing) = self.trades.iter().find(|t| t.is_duplicate_of(&trade)) {
            warn!(
                trade_id = %trade.trade_id,
                existing = %existing.trade_id,
                "Duplicate trade dropped"
            );
            return false;
        }

        info!(%trade, "Trade added");
        let symbol = trade.symbol.clone();
        self.trades.push(trade);
        self.subscribe(vec![symbol]).await;
        self.publish();
        true
    }

    /// Refresh prices of matching trades and place entries that pass their checks.
    pub async fn on_tick(&mut self, tick: Tick) {
        let now = self.clock.now();
        let mut changed = false;

        for trade in self
            .trades
            .iter_mut()
            .filter(|t| t.symbol == tick.symbol && t.is_active())
        {
            trade.cmp = tick.last_price;
            trade.update_pnl();
        }

        let waiting: Vec<usize> = self
            .trades
            .iter()
            .enumerate()
            .filter(|(_, t)| t.symbol == tick.symbol && t.state() == TradeState::Created)
            .map(|(i, _)| i)
            .collect();

        for index in waiting {
            let Some(instance) = self.strategy(&self.trades[index].strategy).cloned() else {
                continue;
            };
            if !instance.is_enabled() {
                continue;
            }

            // recounted per trade, entries placed earlier in this tick count
            let placed = instance.trades_placed(&self.trades);
            let trade = &mut self.trades[index];
            trade.cmp = tick.last_price;
            changed = true;
            if !instance.should_place_trade(trade, &tick, placed, now) {
                continue;
            }
            if let Err(e) = tracking::place_entry(trade, &self.executor, now).await {
                error!(trade_id = %trade.trade_id, error = %e, "Entry placement aborted");
            }
        }

        if changed {
            self.publish();
        }
    }

    /// One reconciliation pass over the account's trades.
    pub async fn run_cycle(&mut self) {
        let now = self.clock.now();
        if self.strategies.is_empty() || !self.calendar.is_market_open(now) {
            return;
        }

        if let Err(e) = self.reconcile().await {
            warn!(error = %e, "Order status refresh failed, tracking on last known state");
        }

        let today = self.calendar.local_date(now);
        let default_cutoff = self.calendar.at(today, self.square_off);

        for trade in self.trades.iter_mut().filter(|t| t.is_active()) {
            let strategy = self
                .strategies
                .iter()
                .find(|s| s.id() == trade.strategy)
                .map(Arc::as_ref);
            let ctx = LegContext {
                executor: &self.executor,
                strategy,
                now,
                chase_pct: self.config.chase_pct,
                stop_at: strategy.map(|s| s.stop_at(today)),
            };

            let ltp = self.prices.ltp(&trade.symbol);
            if ltp > Decimal::ZERO {
                trade.cmp = ltp;
            }

            let cutoff = trade.square_off_at.unwrap_or(default_cutoff);
            if let Err(e) = track_trade(trade, &ctx, cutoff).await {
                error!(trade_id = %trade.trade_id, error = %e, "Trade tracking failed this cycle");
            }
        }

        self.check_strategy_budgets(today).await;
        self.publish();
        self.save().await;
    }

    /// Pull fresh order statuses and fold them into the local copies.
    async fn reconcile(&mut self) -> Result<()> {
        let known: Vec<String> = self
            .trades
            .iter()
            .filter(|t| t.is_active())
            .flat_map(|t| t.order_ids().map(str::to_string))
            .collect();
        if known.is_empty() {
            return Ok(());
        }

        let update = self.executor.fetch_statuses(&known).await?;
        for trade in self.trades.iter_mut().filter(|t| t.is_active()) {
            for order in trade
                .entry_orders
                .iter_mut()
                .chain(trade.sl_orders.iter_mut())
                .chain(trade.target_orders.iter_mut())
            {
                if let Some(fresh) = update.updated.iter().find(|o| o.order_id == order.order_id) {
                    order.apply_update(fresh);
                }
            }
        }

        for child in update.discovered {
            if !attach_child(&mut self.trades, child.clone()) {
                warn!(order_id = %child.order_id, parent = ?child.parent_order_id, "Discovered order has no known parent");
            }
        }
        Ok(())
    }

    /// Square off every active trade of a strategy whose budget is breached, then disable it.
    async fn check_strategy_budgets(&mut self, today: NaiveDate) {
        for instance in self.strategies.iter().filter(|s| s.is_enabled()) {
            let Some(reason) = instance.is_target_or_sl_hit(&self.trades, today) else {
                continue;
            };
            warn!(strategy = %instance.id(), %reason, "🧠 [STRATEGY] Budget breached, squaring off");

            for trade in self
                .trades
                .iter_mut()
                .filter(|t| t.strategy == instance.id() && t.is_active())
            {
                exit::request_exit(trade, reason);
                if let Err(e) = exit::square_off(trade, &self.executor).await {
                    warn!(trade_id = %trade.trade_id, error = %e, "Square-off incomplete, retried next cycle");
                }
            }
            instance.disable();
        }
    }

    async fn subscribe(&mut self, symbols: Vec<String>) {
        let fresh: Vec<String> = symbols
            .into_iter()
            .filter(|s| !self.subscribed.contains(s))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if fresh.is_empty() {
            return;
        }

        match self.feed.subscribe(&fresh, SubscriptionMode::Quote).await {
            Ok(()) => {
                debug!(symbols = ?fresh, "Subscribed");
                self.subscribed.extend(fresh);
            }
            Err(e) => warn!(symbols = ?fresh, error = %e, "Subscription failed"),
        }
    }

    fn publish(&self) {
        self.snapshot.send_replace(Arc::new(self.trades.clone()));
    }

    async fn save(&self) {
        if self.trades.is_empty() {
            return;
        }
        let today = self.calendar.local_date(self.clock.now());
        if let Err(e) = self
            .sink
            .save_trades(&self.account_id, today, &self.trades)
            .await
        {
            error!(account = %self.account_id, error = %e, "📂 [PERSISTENCE] Snapshot save failed");
        }
    }
}

/// Legs in order, then the cutoff and any pending exit.
async fn track_trade(trade: &mut Trade, ctx: &LegContext<'_>, cutoff: DateTime<Utc>) -> Result<()> {
    tracking::track_entry(trade, ctx).await.context("entry leg")?;
    tracking::track_target(trade, ctx).await.context("target leg")?;
    tracking::track_stop_loss(trade, ctx).await.context("stop-loss leg")?;

    if !trade.is_active() {
        return Ok(());
    }
    if ctx.now >= cutoff {
        exit::request_exit(trade, ExitReason::SquareOff);
    }
    if trade.exit_requested.is_some() {
        exit::square_off(trade, ctx.executor)
            .await
            .context("square-off")?;
    }
    Ok(())
}

/// Add a broker-created child order to the leg holding its parent.
fn attach_child(trades: &mut [Trade], child: Order) -> bool {
    let Some(parent) = child.parent_order_id.as_deref() else {
        return false;
    };

    for trade in trades.iter_mut() {
        for leg in [
            &mut trade.entry_orders,
            &mut trade.sl_orders,
            &mut trade.target_orders,
        ] {
            if !leg.iter().any(|o| o.order_id == parent) {
                continue;
            }
            if !leg.iter().any(|o| o.order_id == child.order_id) {
                info!(trade_id = %trade.trade_id, order_id = %child.order_id, %parent, "Child order attached");
                leg.push(child);
            }
            return true;
        }
    }
    false
}
