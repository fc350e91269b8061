//! Last traded price cache shared by the tick pump, manager and strategies.
//!
//! Single writer (the tick pump), many readers. Readers may see a value up to one
//! tick stale.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::exchange::Tick;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PriceEntry {
    pub last_price: Decimal,
    pub buy_qty: u64,
    pub sell_qty: u64,
    /// Highest last price since the symbol was first seen
    pub high: Decimal,
    /// Lowest non-zero last price since the symbol was first seen
    pub low: Decimal,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct PriceCache {
    inner: Arc<RwLock<HashMap<String, PriceEntry>>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, tick: &Tick) {
        let mut prices = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let entry = prices.entry(tick.symbol.clone()).or_default();
        entry.last_price = tick.last_price;
        entry.buy_qty = tick.buy_qty;
        entry.sell_qty = tick.sell_qty;
        entry.high = entry.high.max(tick.last_price);
        if tick.last_price > Decimal::ZERO
            && (entry.low == Decimal::ZERO || tick.last_price < entry.low)
        {
            entry.low = tick.last_price;
        }
        entry.updated_at = tick.exchange_timestamp.or(entry.updated_at);
    }

    pub fn get(&self, symbol: &str) -> Option<PriceEntry> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .copied()
    }

    /// Last price, zero when the symbol has not ticked yet.
    pub fn ltp(&self, symbol: &str) -> Decimal {
        self.get(symbol).map(|e| e.last_price).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_tracks_last_high_and_low() {
        let cache = PriceCache::new();
        assert_eq!(cache.ltp("NIFTY 50"), Decimal::ZERO);

        cache.update(&Tick::ltp("X", dec!(100)));
        cache.update(&Tick::ltp("X", dec!(120)));
        cache.update(&Tick::ltp("X", Decimal::ZERO));
        cache.update(&Tick::ltp("X", dec!(110)));
        assert_eq!(cache.ltp("X"), dec!(110));
        let entry = cache.get("X").unwrap();
        assert_eq!(entry.high, dec!(120));
        assert_eq!(entry.low, dec!(100));
    }

    #[test]
    fn test_clones_share_state() {
        let writer = PriceCache::new();
        let reader = writer.clone();
        writer.update(&Tick::ltp("INDIA VIX", dec!(14.2)));
        assert_eq!(reader.ltp("INDIA VIX"), dec!(14.2));
        assert_eq!(reader.len(), 1);
    }
}
