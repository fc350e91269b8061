//! Market data feed that polls the quote source.
//!
//! Subscribed symbols are quoted concurrently every interval and pushed as
//! [`Tick`]s into a channel consumed by the engine's tick pump.

use super::traits::{MarketDataFeed, QuoteSource};
use super::types::{SubscriptionMode, Tick};
use crate::utils::Clock;
use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cash-segment symbols; everything else is quoted on NFO.
const CASH_SYMBOLS: [&str; 4] = ["NIFTY 50", "NIFTY BANK", "INDIA VIX", "NIFTY FIN SERVICE"];

pub fn is_derivative(symbol: &str) -> bool {
    !CASH_SYMBOLS.contains(&symbol)
}

pub struct QuotePollingFeed {
    quotes: Arc<dyn QuoteSource>,
    subscriptions: Arc<RwLock<HashMap<String, SubscriptionMode>>>,
    ticks: mpsc::Sender<Tick>,
    interval: Duration,
}

impl QuotePollingFeed {
    pub fn new(quotes: Arc<dyn QuoteSource>, ticks: mpsc::Sender<Tick>, interval: Duration) -> Self {
        Self {
            quotes,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            ticks,
            interval,
        }
    }

    pub async fn subscribed(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.subscriptions.read().await.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Quote every subscribed symbol once and push the results.
    ///
    /// Returns false once the receiving side has gone away.
    pub async fn poll_once(&self) -> bool {
        let symbols: Vec<String> = self.subscriptions.read().await.keys().cloned().collect();

        let results = join_all(symbols.iter().map(|symbol| {
            let quotes = Arc::clone(&self.quotes);
            async move { (symbol, quotes.quote(symbol, is_derivative(symbol)).await) }
        }))
        .await;

        for (symbol, result) in results {
            match result {
                Ok(quote) => {
                    if self.ticks.send(quote.to_tick()).await.is_err() {
                        return false;
                    }
                }
                Err(e) => debug!(%symbol, error = %e, "Quote poll failed"),
            }
        }
        true
    }

    /// Poll until the tick receiver is dropped.
    pub fn spawn(self: Arc<Self>, clock: Arc<dyn Clock>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_ms = self.interval.as_millis() as u64, "📡 [FEED] Quote polling started");
            loop {
                if !self.poll_once().await {
                    warn!("📡 [FEED] Tick receiver dropped, stopping");
                    break;
                }
                clock.sleep(self.interval).await;
            }
        })
    }
}

#[async_trait]
impl MarketDataFeed for QuotePollingFeed {
    async fn subscribe(&self, symbols: &[String], mode: SubscriptionMode) -> anyhow::Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        for symbol in symbols {
            if subscriptions.insert(symbol.clone(), mode).is_none() {
                debug!(%symbol, ?mode, "Subscribed");
            }
        }
        Ok(())
    }
}
