use std::{future::Future, time::Duration};
use tokio::time::sleep;

/// Why a retried operation ultimately failed.
#[derive(Debug)]
pub enum RetryFailure<E> {
    /// The classifier called the error fatal; no further attempts.
    Fatal(E),
    /// Retryable, but the attempt budget ran out.
    Exhausted { attempts: usize, last: E },
}

/// Bounded exponential backoff for adapter and state-store calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Runs `op`, retrying while `is_retryable` approves and attempts
    /// remain. Delays double per attempt up to `max_delay`.
    pub async fn run<T, E, F, Fut, C>(
        &self,
        is_retryable: C,
        mut op: F,
    ) -> Result<T, RetryFailure<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !is_retryable(&err) => return Err(RetryFailure::Fatal(err)),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(RetryFailure::Exhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }
                    sleep(self.delay_for(attempt - 1)).await;
                }
            }
        }
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let factor = 1u32 << attempt.min(16) as u32;
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2))
    }

    #[tokio::test]
    async fn returns_first_success() {
        let calls = AtomicUsize::new(0);
        let result: Result<u32, RetryFailure<&str>> = fast_policy()
            .run(
                |_| true,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(7) }
                },
            )
            .await;
        assert!(matches!(result, Ok(7)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fatal_errors_short_circuit() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = fast_policy()
            .run(
                |_: &&str| false,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("boom") }
                },
            )
            .await;
        assert!(matches!(result, Err(RetryFailure::Fatal("boom"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retryable_errors_exhaust_the_budget() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = fast_policy()
            .run(
                |_: &&str| true,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("flaky") }
                },
            )
            .await;
        assert!(matches!(
            result,
            Err(RetryFailure::Exhausted { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let result: Result<u32, RetryFailure<&str>> = fast_policy()
            .run(
                |_| true,
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move { if n < 2 { Err("flaky") } else { Ok(42) } }
                },
            )
            .await;
        assert!(matches!(result, Ok(42)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
