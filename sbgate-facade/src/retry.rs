//! Capped exponential backoff for transient broker failures

use sbgate_broker::BrokerError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op`, retrying while it fails with a transient error
    pub async fn run<T, F, Fut>(&self, operation: &str, op: F) -> Result<T, BrokerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        self.run_while(operation, op, BrokerError::is_transient).await
    }

    /// Run a call that must not take effect twice, such as a send or a
    /// create. Only failures the broker answered with a refusal are
    /// retried; a timeout or dropped connection may have been applied.
    pub async fn run_at_most_once<T, F, Fut>(&self, operation: &str, op: F) -> Result<T, BrokerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        self.run_while(operation, op, |e| matches!(e, BrokerError::ServerBusy(_)))
            .await
    }

    async fn run_while<T, F, Fut>(
        &self,
        operation: &str,
        mut op: F,
        retryable: impl Fn(&BrokerError) -> bool,
    ) -> Result<T, BrokerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if retryable(&e) && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    debug!(operation, attempt, delay = ?delay, error = %e, "Retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(operation, attempts = attempt + 1, error = %e, "Giving up");
                    }
                    return Err(e);
                }
            }
        }
    }
}
