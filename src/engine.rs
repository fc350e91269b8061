//! Process wiring for one trading account.
//!
//! Starts, in order:
//! 1. The quote polling feed and the tick pump that fills the [`PriceCache`]
//! 2. The trade manager, after restoring the day's persisted trades
//! 3. One run loop per configured strategy instance

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::exchange::{
    KiteClient, MarketDataFeed, OrderGateway, PaperBroker, QuotePollingFeed, QuoteSource,
    SubscriptionMode, Tick,
};
use crate::manager::{ManagerHandle, ManagerServices, PriceCache, TradeManager};
use crate::persistence::{open_sink, PersistenceSink};
use crate::strategy::{spawn_strategy, StrategyContext, StrategyRegistry};
use crate::utils::{Clock, SystemClock, TradingCalendar};

const VIX_SYMBOL: &str = "INDIA VIX";
const COMMAND_CAPACITY: usize = 256;
const TICK_CAPACITY: usize = 1024;

/// Broker side of the engine.
pub struct Connections {
    pub gateway: Arc<dyn OrderGateway>,
    pub quotes: Arc<dyn QuoteSource>,
    pub sink: Arc<dyn PersistenceSink>,
    pub clock: Arc<dyn Clock>,
}

impl Connections {
    /// Kite for live trading; the paper broker, priced from Kite when a session
    /// token is available, otherwise.
    pub fn from_config(config: &Config, access_token: &str) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let sink = open_sink(&config.manager).context("Failed to open trade store")?;

        let gateway: Arc<dyn OrderGateway>;
        let quotes: Arc<dyn QuoteSource>;
        if config.manager.paper {
            let mut paper = PaperBroker::with_clock(Arc::clone(&clock));
            if !access_token.is_empty() {
                paper = paper.with_upstream(Arc::new(KiteClient::new(&config.broker, access_token)?));
            }
            let paper = Arc::new(paper);
            gateway = paper.clone();
            quotes = paper;
        } else {
            anyhow::ensure!(!access_token.is_empty(), "live trading needs an access token");
            let kite = Arc::new(KiteClient::new(&config.broker, access_token)?);
            gateway = kite.clone();
            quotes = kite;
        }

        Ok(Self {
            gateway,
            quotes,
            sink,
            clock,
        })
    }
}

pub struct Engine {
    handle: ManagerHandle,
    feed: Arc<QuotePollingFeed>,
    manager_task: JoinHandle<()>,
    background: Vec<JoinHandle<()>>,
}

impl Engine {
    pub async fn start(config: &Config, connections: Connections) -> Result<Self> {
        let Connections {
            gateway,
            quotes,
            sink,
            clock,
        } = connections;

        let calendar = Arc::new(TradingCalendar::new(&config.market)?);
        let instances = StrategyRegistry::with_builtin()
            .build(
                &config.strategies,
                config.account.multiplier,
                Arc::clone(&calendar),
            )
            .context("Failed to build strategies")?;

        let prices = PriceCache::new();
        let (tick_tx, tick_rx) = mpsc::channel(TICK_CAPACITY);
        let feed = Arc::new(QuotePollingFeed::new(
            Arc::clone(&quotes),
            tick_tx,
            Duration::from_millis(config.manager.feed_interval_ms),
        ));

        let mut watched = calendar.index_symbols();
        watched.push(VIX_SYMBOL.to_string());
        feed.subscribe(&watched, SubscriptionMode::Quote).await?;

        let feed_dyn: Arc<dyn MarketDataFeed> = feed.clone();
        let mut manager = TradeManager::new(
            config,
            instances.clone(),
            ManagerServices {
                gateway,
                feed: feed_dyn,
                sink,
                prices: prices.clone(),
                calendar,
                clock: Arc::clone(&clock),
            },
        );
        manager.restore().await?;
        let (handle, commands) = manager.channel(COMMAND_CAPACITY);

        let mut background = vec![
            Arc::clone(&feed).spawn(Arc::clone(&clock)),
            spawn_tick_pump(tick_rx, prices.clone(), handle.clone()),
        ];
        let manager_task = tokio::spawn(manager.run(commands));

        let retry_delay = Duration::from_millis(config.manager.retry_delay_ms);
        for instance in instances {
            let ctx = Arc::new(StrategyContext::new(
                Arc::clone(&instance),
                Arc::clone(&clock),
                prices.clone(),
                Arc::clone(&quotes),
                handle.clone(),
                retry_delay,
            ));
            background.push(spawn_strategy(ctx, instance));
        }

        info!(
            account = %config.account.id,
            paper = config.manager.paper,
            strategies = config.strategies.len(),
            "🚀 Engine started"
        );
        Ok(Self {
            handle,
            feed,
            manager_task,
            background,
        })
    }

    pub fn handle(&self) -> &ManagerHandle {
        &self.handle
    }

    /// Symbols the market data feed is polling.
    pub async fn watched(&self) -> Vec<String> {
        self.feed.subscribed().await
    }

    /// Stop the manager after its final save, then the feed and strategy tasks.
    pub async fn shutdown(self) -> Result<()> {
        info!("🛑 Engine shutting down");
        if let Err(e) = self.handle.shutdown().await {
            warn!(error = %e, "Manager already stopped");
        }
        self.manager_task
            .await
            .context("Trade manager task failed")?;

        for task in self.background {
            task.abort();
        }
        Ok(())
    }
}

/// Feed ticks into the price cache first, then to the manager.
fn spawn_tick_pump(
    mut ticks: mpsc::Receiver<Tick>,
    prices: PriceCache,
    handle: ManagerHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(tick) = ticks.recv().await {
            prices.update(&tick);
            if handle.tick(tick).await.is_err() {
                debug!("Manager gone, tick pump stopping");
                break;
            }
        }
    })
}
