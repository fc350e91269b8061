//! Per-strategy run loop.

use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{StrategyContext, StrategyInstance};
use crate::utils::next_aligned_delay;

const VIX_SYMBOL: &str = "INDIA VIX";
const PROCESS_PERIOD_SECS: u32 = 5;
const PROCESS_OFFSET_SECS: u32 = 3;

/// Why a run loop ended before its first decision pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    NotEnabled,
    InvalidBudget,
    MarketClosed,
    AbnormalRestore,
    NoLotsToday,
    VixBelowThreshold,
    /// Ran until the close or until disabled
    Finished,
}

/// Drive one strategy for the day.
pub async fn run_strategy(ctx: Arc<StrategyContext>) -> RunOutcome {
    let instance = ctx.instance();
    let id = instance.id().to_string();

    if !instance.is_enabled() {
        warn!(strategy = %id, "🧠 [STRATEGY] Not running, strategy is disabled");
        return RunOutcome::NotEnabled;
    }
    if instance.config().strategy_sl > Decimal::ZERO {
        warn!(strategy = %id, "🧠 [STRATEGY] Strategy stop must be negative");
        instance.disable();
        return RunOutcome::InvalidBudget;
    }
    if ctx.calendar().is_market_closed_for_day(ctx.now()) {
        warn!(strategy = %id, "🧠 [STRATEGY] Not running, market is closed for the day");
        return RunOutcome::MarketClosed;
    }

    let abnormal = ctx
        .trades()
        .iter()
        .filter_map(|t| t.exit_reason())
        .find(|reason| !reason.is_routine());
    if let Some(reason) = abnormal {
        warn!(strategy = %id, %reason, "🧠 [STRATEGY] Restored trade exited abnormally, not resuming");
        instance.disable();
        return RunOutcome::AbnormalRestore;
    }

    let today = ctx.today();
    ctx.clock()
        .sleep_until(ctx.calendar().market_open_at(today))
        .await;

    let lots = instance.lots_for(today);
    if lots == 0 {
        warn!(strategy = %id, "🧠 [STRATEGY] No lots configured for today");
        instance.disable();
        return RunOutcome::NoLotsToday;
    }
    ctx.set_lots(lots);

    let start = instance.start_at(today);
    if ctx.now() < start {
        info!(strategy = %id, start = %start, "🧠 [STRATEGY] Waiting for start time");
        ctx.clock().sleep_until(start).await;
    }

    let vix = match ctx.ltp(VIX_SYMBOL).await {
        Ok(vix) => vix,
        Err(e) => {
            warn!(strategy = %id, error = %e, "VIX unavailable");
            Decimal::ZERO
        }
    };
    let threshold = instance.config().vix_threshold;
    if threshold > Decimal::ZERO && vix > Decimal::ZERO && threshold > vix {
        warn!(strategy = %id, %vix, %threshold, "🧠 [STRATEGY] VIX below threshold, skipping the day");
        instance.disable();
        return RunOutcome::VixBelowThreshold;
    }
    if instance.config().vix_adjust && vix > Decimal::ZERO {
        instance.scale_budget_for_vix(vix);
    }

    info!(strategy = %id, kind = instance.kind(), lots, "🧠 [STRATEGY] Running");
    loop {
        if !instance.is_enabled() || ctx.calendar().is_market_closed_for_day(ctx.now()) {
            break;
        }

        if let Err(e) = instance.strategy().process(&ctx).await {
            error!(strategy = %id, error = %e, "🧠 [STRATEGY] Decision pass failed");
        }

        let delay = next_aligned_delay(ctx.now(), PROCESS_PERIOD_SECS, PROCESS_OFFSET_SECS);
        ctx.clock().sleep(delay).await;
    }

    info!(strategy = %id, enabled = instance.is_enabled(), "🧠 [STRATEGY] Stopped");
    RunOutcome::Finished
}

/// Spawn the run loop; a panic inside it disables only this strategy.
pub fn spawn_strategy(ctx: Arc<StrategyContext>, instance: Arc<StrategyInstance>) -> JoinHandle<()> {
    let task = tokio::spawn(run_strategy(ctx));
    tokio::spawn(async move {
        match task.await {
            Ok(outcome) => info!(strategy = %instance.id(), ?outcome, "Strategy task ended"),
            Err(e) if e.is_panic() => {
                error!(strategy = %instance.id(), "🧠 [STRATEGY] Task panicked, disabling strategy");
                instance.disable();
            }
            Err(e) => warn!(strategy = %instance.id(), error = %e, "Strategy task cancelled"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MarketConfig, StrategyConfig};
    use crate::exchange::{PaperBroker, Tick};
    use crate::manager::{ManagerCommand, ManagerHandle, PriceCache};
    use crate::strategy::{Strategy, StrategyContext};
    use crate::trade::Trade;
    use crate::utils::{Clock, ManualClock, TradingCalendar};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::{mpsc, watch};

    struct Counting {
        calls: Arc<AtomicU32>,
        disable_after: u32,
        panic: bool,
    }

    #[async_trait]
    impl Strategy for Counting {
        fn kind(&self) -> &'static str {
            "counting"
        }

        async fn process(&self, ctx: &StrategyContext) -> anyhow::Result<()> {
            if self.panic {
                panic!("decision bug");
            }
            let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if calls >= self.disable_after {
                ctx.instance().disable();
            }
            anyhow::bail!("transient decision failure")
        }
    }

    struct Harness {
        ctx: Arc<StrategyContext>,
        instance: Arc<StrategyInstance>,
        clock: Arc<ManualClock>,
        prices: PriceCache,
        _commands: mpsc::Receiver<ManagerCommand>,
        _trades: watch::Sender<Arc<Vec<Trade>>>,
    }

    fn harness(config: StrategyConfig, strategy: Counting, start: DateTime<Utc>) -> Harness {
        let clock = Arc::new(ManualClock::new(start));
        let calendar = Arc::new(TradingCalendar::new(&MarketConfig::default()).unwrap());
        let instance = Arc::new(StrategyInstance::new(
            config,
            Box::new(strategy),
            Decimal::ONE,
            calendar,
        ));
        let (commands_tx, commands) = mpsc::channel(8);
        let (trades, trades_rx) = watch::channel(Arc::new(Vec::new()));
        let prices = PriceCache::new();
        let ctx = Arc::new(StrategyContext::new(
            Arc::clone(&instance),
            clock.clone(),
            prices.clone(),
            Arc::new(PaperBroker::with_clock(clock.clone())),
            ManagerHandle::new(commands_tx, trades_rx),
            Duration::from_millis(10),
        ));
        Harness {
            ctx,
            instance,
            clock,
            prices,
            _commands: commands,
            _trades: trades,
        }
    }

    fn counting(calls: &Arc<AtomicU32>, disable_after: u32) -> Counting {
        Counting {
            calls: Arc::clone(calls),
            disable_after,
            panic: false,
        }
    }

    /// Thursday 3 Oct 2024, 08:00 IST.
    fn before_open() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 3, 2, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn test_waits_for_start_and_survives_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let h = harness(StrategyConfig::new("c", "counting"), counting(&calls, 3), before_open());
        h.prices.update(&Tick::ltp(VIX_SYMBOL, dec!(14)));

        let outcome = run_strategy(Arc::clone(&h.ctx)).await;
        assert_eq!(outcome, RunOutcome::Finished);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!h.instance.is_enabled());
        assert_eq!(h.ctx.lots(), 1);
        // default start is 09:20 IST
        assert!(h.clock.now() >= Utc.with_ymd_and_hms(2024, 10, 3, 3, 50, 0).unwrap());
    }

    #[tokio::test]
    async fn test_positive_stop_budget_refused() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut config = StrategyConfig::new("c", "counting");
        config.strategy_sl = dec!(500);
        let h = harness(config, counting(&calls, 1), before_open());

        assert_eq!(run_strategy(Arc::clone(&h.ctx)).await, RunOutcome::InvalidBudget);
        assert!(!h.instance.is_enabled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_vix_threshold_disables() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut config = StrategyConfig::new("c", "counting");
        config.vix_threshold = dec!(15);
        let h = harness(config, counting(&calls, 1), before_open());
        h.prices.update(&Tick::ltp(VIX_SYMBOL, dec!(12.5)));

        assert_eq!(
            run_strategy(Arc::clone(&h.ctx)).await,
            RunOutcome::VixBelowThreshold
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_vix_scales_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut config = StrategyConfig::new("c", "counting");
        config.strategy_sl = dec!(-1000);
        config.vix_adjust = true;
        let h = harness(config, counting(&calls, 1), before_open());
        h.prices.update(&Tick::ltp(VIX_SYMBOL, dec!(64)));

        run_strategy(Arc::clone(&h.ctx)).await;
        assert_eq!(h.instance.budget().stop.round_dp(6), dec!(-2000));
    }

    #[tokio::test]
    async fn test_closed_market_and_zero_lots() {
        let calls = Arc::new(AtomicU32::new(0));
        // Saturday
        let saturday = Utc.with_ymd_and_hms(2024, 10, 5, 4, 0, 0).unwrap();
        let h = harness(StrategyConfig::new("c", "counting"), counting(&calls, 1), saturday);
        assert_eq!(run_strategy(Arc::clone(&h.ctx)).await, RunOutcome::MarketClosed);

        let mut config = StrategyConfig::new("c", "counting");
        config.lots = vec![0; crate::config::LOT_TABLE_LEN];
        let h = harness(config, counting(&calls, 1), before_open());
        assert_eq!(run_strategy(Arc::clone(&h.ctx)).await, RunOutcome::NoLotsToday);
        assert!(!h.instance.is_enabled());
    }

    #[tokio::test]
    async fn test_panic_disables_only_that_strategy() {
        let calls = Arc::new(AtomicU32::new(0));
        let strategy = Counting {
            calls: Arc::clone(&calls),
            disable_after: 100,
            panic: true,
        };
        let h = harness(StrategyConfig::new("c", "counting"), strategy, before_open());
        h.prices.update(&Tick::ltp(VIX_SYMBOL, dec!(14)));

        spawn_strategy(Arc::clone(&h.ctx), Arc::clone(&h.instance))
            .await
            .unwrap();
        assert!(!h.instance.is_enabled());
    }
}
