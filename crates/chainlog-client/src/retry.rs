//! Bounded retry of log service calls.

use std::future::Future;

use tokio::time::{timeout_at, Instant};
use tracing::warn;

use chainlog_contracts::error::LogServiceError;
use chainlog_core::config::RetryConfig;

/// How a retried call ended.
#[derive(Debug)]
pub(crate) enum RetryOutcome<T> {
    /// The call succeeded on attempt `attempts`.
    Done { value: T, attempts: u32 },
    /// The service answered with an error that will not be retried.
    ///
    /// `deadline_hit` is set when a transient error was left unretried
    /// because the backoff would have crossed the deadline.
    Failed {
        attempts: u32,
        last: LogServiceError,
        deadline_hit: bool,
    },
    /// The deadline passed. `in_flight` is set when a call had been issued
    /// and not answered, so its effect on the service is unknown.
    TimedOut { attempts: u32, in_flight: bool },
}

/// Run `call` until it succeeds, fails permanently, runs out of attempts or
/// the deadline passes.
///
/// Transient errors are retried after `retry.backoff(n)`. A retry is never
/// started when its backoff would end past the deadline. Without a deadline
/// calls are not time-bounded.
pub(crate) async fn call_with_retry<T, F, Fut>(
    retry: &RetryConfig,
    deadline: Option<Instant>,
    operation: &str,
    log_id: &str,
    mut call: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LogServiceError>>,
{
    let max_attempts = retry.max_attempts.max(1);
    let mut attempts = 0u32;

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return RetryOutcome::TimedOut {
                attempts,
                in_flight: false,
            };
        }

        attempts += 1;
        let result = match deadline {
            Some(d) => match timeout_at(d, call()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(log_id = %log_id, operation, attempt = attempts, "deadline passed with call in flight");
                    return RetryOutcome::TimedOut {
                        attempts,
                        in_flight: true,
                    };
                }
            },
            None => call().await,
        };

        let error = match result {
            Ok(value) => return RetryOutcome::Done { value, attempts },
            Err(error) => error,
        };

        if !error.is_transient() || attempts >= max_attempts {
            return RetryOutcome::Failed {
                attempts,
                last: error,
                deadline_hit: false,
            };
        }

        let backoff = retry.backoff(attempts);
        if deadline.is_some_and(|d| Instant::now() + backoff >= d) {
            warn!(
                log_id = %log_id,
                operation,
                attempt = attempts,
                error = %error,
                "not retrying: backoff would cross the deadline"
            );
            return RetryOutcome::Failed {
                attempts,
                last: error,
                deadline_hit: true,
            };
        }

        warn!(
            log_id = %log_id,
            operation,
            attempt = attempts,
            error = %error,
            backoff_ms = backoff.as_millis() as u64,
            "transient log service failure, retrying"
        );
        tokio::time::sleep(backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use tokio::time::Instant;

    use chainlog_contracts::error::LogServiceError;
    use chainlog_core::config::RetryConfig;

    use super::{call_with_retry, RetryOutcome};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            multiplier: 2.0,
        }
    }

    fn throttled() -> LogServiceError {
        LogServiceError::Throttled { reason: "busy".into() }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let outcome = call_with_retry(&fast(), None, "submit", "log-1", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(throttled())
            } else {
                Ok(7)
            }
        })
        .await;
        assert!(matches!(outcome, RetryOutcome::Done { value: 7, attempts: 3 }));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let outcome: RetryOutcome<()> = call_with_retry(&fast(), None, "submit", "log-1", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(throttled())
        })
        .await;
        assert!(matches!(
            outcome,
            RetryOutcome::Failed { attempts: 3, deadline_hit: false, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let outcome: RetryOutcome<()> = call_with_retry(&fast(), None, "submit", "log-1", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LogServiceError::Unauthorized { reason: "no".into() })
        })
        .await;
        assert!(matches!(outcome, RetryOutcome::Failed { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backoff_never_crosses_the_deadline() {
        let slow = RetryConfig {
            max_attempts: 10,
            initial_backoff_ms: 10_000,
            max_backoff_ms: 10_000,
            multiplier: 1.0,
        };
        let deadline = Instant::now() + Duration::from_millis(200);
        let outcome: RetryOutcome<()> =
            call_with_retry(&slow, Some(deadline), "submit", "log-1", || async { Err(throttled()) }).await;
        assert!(matches!(
            outcome,
            RetryOutcome::Failed { attempts: 1, deadline_hit: true, .. }
        ));
        assert!(Instant::now() < deadline);
    }

    #[tokio::test]
    async fn in_flight_call_at_deadline_is_reported() {
        let deadline = Instant::now() + Duration::from_millis(20);
        let outcome: RetryOutcome<()> = call_with_retry(&fast(), Some(deadline), "submit", "log-1", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(outcome, RetryOutcome::TimedOut { in_flight: true, attempts: 1 }));
    }

    #[tokio::test]
    async fn expired_deadline_issues_no_call() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let deadline = Instant::now() - Duration::from_millis(1);
        let outcome = call_with_retry(&fast(), Some(deadline), "submit", "log-1", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
        assert!(matches!(outcome, RetryOutcome::TimedOut { in_flight: false, attempts: 0 }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
