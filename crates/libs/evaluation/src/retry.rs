use app_state::LlmSettings;
use common_types::EvaluationFailure;
use std::future::Future;
use std::time::Duration;
use tokio_retry::RetryIf;
use tracing::warn;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Bounded retries with exponential backoff for transient request failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl From<&LlmSettings> for RetryPolicy {
    fn from(settings: &LlmSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: settings.retry_base_delay,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// `base_delay * 2^attempt`, capped at one minute.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }

    /// Sleeps between attempts; one entry per retry.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
        let policy = *self;
        (0..policy.max_retries).map(move |attempt| policy.backoff(attempt))
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the retries run out.
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, EvaluationFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EvaluationFailure>>,
    {
        let mut failures = 0_u32;
        let retryable = |failure: &EvaluationFailure| {
            failures += 1;
            let retry = failure.is_retryable() && failures <= self.max_retries;
            if retry {
                warn!(
                    kind = %failure.kind,
                    status = ?failure.status_code,
                    attempt = failures,
                    "Retrying request in {:?}",
                    self.backoff(failures - 1)
                );
            }
            failure.is_retryable()
        };
        RetryIf::spawn(self.delays(), op, retryable).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_types::FailureKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn failure(kind: FailureKind, status: Option<u16>) -> EvaluationFailure {
        let f = EvaluationFailure::new(kind, "x");
        match status {
            Some(s) => f.with_status(s),
            None => f,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(20), MAX_BACKOFF);
    }

    #[test]
    fn one_delay_per_retry() {
        let delays: Vec<_> = RetryPolicy::default().delays().collect();
        assert_eq!(
            delays,
            vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
        );
        assert_eq!(RetryPolicy::none().delays().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::default()
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(failure(FailureKind::Timeout, None)) }
            })
            .await;
        assert_eq!(result.unwrap_err().kind, FailureKind::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::default()
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(failure(FailureKind::ApiError, Some(401))) }
            })
            .await;
        assert_eq!(result.unwrap_err().status_code, Some(401));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::default()
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(failure(FailureKind::ApiError, Some(429)))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.ok(), Some(2));
    }
}
