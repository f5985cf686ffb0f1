//! Connection establishment with fixed-interval retry.

use tracing::{info, warn};

use crate::config::{ConnectionDescriptor, RetryPolicy};
use crate::database::{Database, NativeConnector};
use crate::driver::{Connect, Driver};
use crate::error::{DriverResult, Result, TxError};

/// Open a driver and ping it, retrying until it answers or the policy runs
/// out of attempts.
///
/// A driver that opened but failed its ping is closed before the next
/// attempt. The returned error carries the last underlying failure.
pub async fn establish<C: Connect>(
    connector: &C,
    descriptor: &ConnectionDescriptor,
    policy: RetryPolicy,
) -> Result<C::Driver> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match open_and_ping(connector, descriptor).await {
            Ok(driver) => {
                info!(db = %descriptor, attempt, "database connection established");
                return Ok(driver);
            }
            Err(err) if attempt < attempts => {
                warn!(
                    db = %descriptor,
                    attempt,
                    max_attempts = attempts,
                    error = %err,
                    "database not reachable yet, retrying in {:?}",
                    policy.interval
                );
                tokio::time::sleep(policy.interval).await;
                attempt += 1;
            }
            Err(err) => {
                return Err(TxError::ConnectionError {
                    host: descriptor.host().to_string(),
                    port: descriptor.port().to_string(),
                    database: descriptor.database().to_string(),
                    attempts,
                    source: err,
                });
            }
        }
    }
}

async fn open_and_ping<C: Connect>(
    connector: &C,
    descriptor: &ConnectionDescriptor,
) -> DriverResult<C::Driver> {
    let driver = connector.open(descriptor).await?;
    if let Err(err) = driver.ping().await {
        if let Err(close_err) = driver.close().await {
            warn!(error = %close_err, "failed to close unreachable driver");
        }
        return Err(err);
    }
    Ok(driver)
}

/// Connect with the native backend named by the descriptor, using the
/// default retry policy (25 attempts, 4 seconds apart).
pub async fn connect(descriptor: &ConnectionDescriptor) -> Result<Database> {
    establish(&NativeConnector, descriptor, RetryPolicy::default()).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::stub::StubConnector;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor::new("user", "secret", "5432", "app", "db.internal", "postgres").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let connector = StubConnector::new().failing_opens(2);
        let start = Instant::now();

        let driver = establish(&connector, &descriptor(), RetryPolicy::default())
            .await
            .unwrap();

        assert_eq!(connector.opens(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(8));
        assert_eq!(driver.pings(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_does_not_sleep() {
        let connector = StubConnector::new();
        let start = Instant::now();

        establish(&connector, &descriptor(), RetryPolicy::default())
            .await
            .unwrap();

        assert_eq!(connector.opens(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_all_attempts() {
        let connector = StubConnector::new().failing_opens(u32::MAX);
        let policy = RetryPolicy::default()
            .attempts(3)
            .interval(Duration::from_secs(1));

        let err = establish(&connector, &descriptor(), policy).await.unwrap_err();

        assert_eq!(connector.opens(), 3);
        match err {
            TxError::ConnectionError {
                host,
                port,
                database,
                attempts,
                source,
            } => {
                assert_eq!(host, "db.internal");
                assert_eq!(port, "5432");
                assert_eq!(database, "app");
                assert_eq!(attempts, 3);
                assert!(source.to_string().contains("connection refused"));
                assert!(!source.to_string().contains("secret"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    // Attempts count the first try and there is no sleep after the last one,
    // so the default policy gives up after 24 pauses of 4s.
    #[tokio::test(start_paused = true)]
    async fn test_default_policy_exhaustion_time() {
        let connector = StubConnector::new().failing_opens(u32::MAX);
        let start = Instant::now();

        let err = establish(&connector, &descriptor(), RetryPolicy::default())
            .await
            .unwrap_err();

        assert!(matches!(err, TxError::ConnectionError { attempts: 25, .. }));
        assert_eq!(connector.opens(), 25);
        assert_eq!(start.elapsed(), Duration::from_secs(96));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unpingable_driver_is_closed() {
        let connector = StubConnector::new().failing_pings(1);

        let driver = establish(&connector, &descriptor(), RetryPolicy::default())
            .await
            .unwrap();

        let opened = connector.opened();
        assert_eq!(opened.len(), 2);
        assert_eq!(opened[0].closes(), 1);
        assert_eq!(driver.closes(), 0);
        assert_eq!(driver.pings(), 1);
    }
}
