//! Time source and timer abstraction.
//!
//! Every scheduled task (manager cycle, strategy loops, market-open waits) sleeps
//! through a [`Clock`] so tests can drive time with [`ManualClock`] instead of
//! waiting on the wall clock.

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Suspend the calling task for `duration`.
    async fn sleep(&self, duration: Duration);

    /// Suspend until `deadline`; returns immediately if it already passed.
    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let remaining = deadline - self.now();
        if let Ok(remaining) = remaining.to_std() {
            if !remaining.is_zero() {
                self.sleep(remaining).await;
            }
        }
    }
}

/// Wall clock backed by tokio timers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Simulated clock: sleeping advances time instantly.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = instant;
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Delay until the next `period_secs` boundary of the minute, plus `offset_secs`.
///
/// With a 5 s period the manager wakes on :00, :05, :10 ...; strategies use a 3 s
/// offset so they observe the state the manager just settled.
pub fn next_aligned_delay(now: DateTime<Utc>, period_secs: u32, offset_secs: u32) -> Duration {
    let period = period_secs.max(1);
    let whole = period - (now.second() % period) + offset_secs;
    let nanos = now.nanosecond().min(999_999_999);
    Duration::from_secs(u64::from(whole)).saturating_sub(Duration::from_nanos(u64::from(nanos)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_aligned_delay() {
        let now = Utc.with_ymd_and_hms(2024, 1, 3, 4, 0, 12).unwrap();
        assert_eq!(next_aligned_delay(now, 5, 0), Duration::from_secs(3));
        assert_eq!(next_aligned_delay(now, 5, 3), Duration::from_secs(6));

        let on_boundary = Utc.with_ymd_and_hms(2024, 1, 3, 4, 0, 15).unwrap();
        assert_eq!(next_aligned_delay(on_boundary, 5, 0), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_manual_clock_sleep_advances() {
        let start = Utc.with_ymd_and_hms(2024, 1, 3, 4, 0, 0).unwrap();
        let clock = ManualClock::new(start);

        clock.sleep(Duration::from_secs(90)).await;
        assert_eq!(clock.now(), start + chrono::Duration::seconds(90));

        clock.sleep_until(start).await;
        assert_eq!(clock.now(), start + chrono::Duration::seconds(90));

        clock.sleep_until(start + chrono::Duration::minutes(5)).await;
        assert_eq!(clock.now(), start + chrono::Duration::minutes(5));
    }
}
