//! Bounded retry for gateway calls.
//!
//! A transient failure (timeout, service unavailable, rate limit) is retried once
//! after a fixed delay. Rejections and every other error are returned as-is.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use super::error::GatewayError;
use crate::utils::Clock;

/// Run `op`, retrying once after `delay` when the first attempt fails transiently.
pub async fn with_retry<T, F, Fut>(
    clock: &dyn Clock,
    delay: Duration,
    operation: &str,
    mut op: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(e) if e.is_transient() => {
            warn!(operation, error = %e, delay_ms = delay.as_millis() as u64, "Transient gateway failure, retrying once");
            clock.sleep(delay).await;
            op().await
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::traits::{MockOrderGateway, OrderGateway};
    use crate::utils::ManualClock;
    use chrono::Utc;
    use mockall::Sequence;

    #[tokio::test]
    async fn test_retries_transient_once() {
        let clock = ManualClock::new(Utc::now());
        let start = clock.now();
        let mut gateway = MockOrderGateway::new();
        let mut seq = Sequence::new();
        gateway
            .expect_cancel_order()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(GatewayError::Timeout("read".to_string())));
        gateway
            .expect_cancel_order()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let result = with_retry(&clock, Duration::from_secs(1), "cancel", || {
            gateway.cancel_order("42")
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(clock.now() - start, chrono::Duration::seconds(1));
    }

    #[tokio::test]
    async fn test_gives_up_after_second_failure() {
        let clock = ManualClock::new(Utc::now());
        let mut gateway = MockOrderGateway::new();
        gateway
            .expect_cancel_order()
            .times(2)
            .returning(|_| Err(GatewayError::ServiceUnavailable { status_code: 503 }));

        let result = with_retry(&clock, Duration::from_secs(1), "cancel", || {
            gateway.cancel_order("42")
        })
        .await;

        assert!(matches!(result, Err(GatewayError::ServiceUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_rejection_not_retried() {
        let clock = ManualClock::new(Utc::now());
        let mut gateway = MockOrderGateway::new();
        gateway
            .expect_cancel_order()
            .times(1)
            .returning(|_| Err(GatewayError::rejected("order already complete")));

        let result = with_retry(&clock, Duration::from_secs(1), "cancel", || {
            gateway.cancel_order("42")
        })
        .await;

        assert!(matches!(result, Err(GatewayError::Rejected(_))));
    }
}
