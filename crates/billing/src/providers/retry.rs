//! Reusable retry policy for flaky provider APIs.

use std::future::Future;
use std::time::Duration;

use tokio_retry::RetryIf;

use super::ProviderError;

/// Fixed-schedule retry: `max_attempts` total tries, the delay before the
/// n-th retry is `n * base_delay`. Only transient errors are retried;
/// exhausted retries propagate the last error rather than inventing a
/// payment status.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// The schedule both card acquirers use: 3 attempts, 1s then 2s between.
    pub fn standard() -> Self {
        Self::new(3, Duration::from_secs(1))
    }

    fn delays(&self) -> impl Iterator<Item = Duration> {
        let base = self.base_delay;
        (1..self.max_attempts.max(1)).map(move |attempt| base * attempt)
    }

    pub async fn run<T, A, F>(&self, action: A) -> Result<T, ProviderError>
    where
        A: FnMut() -> F,
        F: Future<Output = Result<T, ProviderError>>,
    {
        RetryIf::spawn(self.delays(), action, |e: &ProviderError| {
            let retry = e.is_transient();
            if retry {
                tracing::warn!(error = %e, "Transient provider error, retrying");
            }
            retry
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> ProviderError {
        ProviderError::Status {
            code: 502,
            body: "bad gateway".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_up_to_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::standard()
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::standard()
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::Malformed("nonsense".to_string())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::standard()
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(transient())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
