use backoff::{Error as BackoffError, ExponentialBackoff};
use std::time::Duration;
use tracing::warn;

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Zero-delay policy for tests and tight loops.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(1),
            multiplier: 1.0,
        }
    }

    pub fn to_exponential_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            current_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            randomization_factor: 0.0,
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        }
    }

    /// Retry an async operation with exponential backoff
    pub async fn retry_async<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.retry_async_when(operation, |_| true).await
    }

    /// Retry only while `is_transient` accepts the error; anything else is returned at once.
    pub async fn retry_async_when<F, Fut, T, E, P>(
        &self,
        mut operation: F,
        is_transient: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let backoff = self.to_exponential_backoff();
        let max_retries = self.max_retries;
        let mut attempt = 0u32;
        let is_transient = &is_transient;

        let retry_operation = || {
            attempt += 1;
            let current = attempt;
            let fut = operation();
            async move {
                match fut.await {
                    Ok(result) => Ok(result),
                    Err(e) if current <= max_retries && is_transient(&e) => {
                        warn!("Operation failed (attempt {}), will retry: {}", current, e);
                        Err(BackoffError::transient(e))
                    }
                    Err(e) => Err(BackoffError::permanent(e)),
                }
            }
        };

        backoff::future::retry(backoff, retry_operation).await
    }
}
