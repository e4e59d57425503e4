use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::RetryPolicy;
use crate::error::OrderedTreeError;

/// Run `attempt` until it succeeds, fails for a non-transient reason, or the
/// policy runs out of attempts.
///
/// Each call of `attempt` must open and finish its own transaction. Only
/// transient failures ([`OrderedTreeError::is_transient`]) trigger another
/// call, after a jittered backoff.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &'static str,
    mut attempt: F,
) -> Result<T, OrderedTreeError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, OrderedTreeError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut current = 1;

    loop {
        match attempt(current).await {
            Ok(value) => {
                if current > 1 {
                    tracing::debug!(operation = label, attempt = current, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && current < max_attempts => {
                let delay = jittered(policy, current);
                tracing::debug!(
                    operation = label,
                    attempt = current,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient write conflict, retrying"
                );
                tokio::time::sleep(delay).await;
                current += 1;
            }
            Err(err) if err.is_transient() => {
                tracing::warn!(operation = label, attempts = current, "retries exhausted");
                return Err(OrderedTreeError::RetriesExhausted { attempts: current });
            }
            Err(err) => return Err(err),
        }
    }
}

fn jittered(policy: &RetryPolicy, attempt: u32) -> Duration {
    let jitter_ms = policy.max_jitter.as_millis() as u64;
    let jitter = if jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_ms)
    };
    policy.backoff_for(attempt) + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff: Duration::from_millis(1),
            max_jitter: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn key_conflicts_are_retried_until_success() {
        let calls = Cell::new(0);
        let result = with_retry(&fast_policy(3), "test", |attempt| {
            calls.set(calls.get() + 1);
            async move {
                if attempt < 3 {
                    Err(OrderedTreeError::KeyConflict)
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn exhaustion_is_reported_with_attempt_count() {
        let result: Result<(), _> = with_retry(&fast_policy(3), "test", |_| async {
            Err(OrderedTreeError::KeyConflict)
        })
        .await;

        assert!(matches!(
            result,
            Err(OrderedTreeError::RetriesExhausted { attempts: 3 })
        ));
    }

    #[tokio::test]
    async fn domain_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(3), "test", |_| {
            calls.set(calls.get() + 1);
            async {
                Err(OrderedTreeError::Cycle {
                    node_id: 1,
                    dest_parent_id: 2,
                })
            }
        })
        .await;

        assert!(matches!(result, Err(OrderedTreeError::Cycle { .. })));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn backoff_grows_with_attempts_and_stays_bounded() {
        let policy = RetryPolicy::default();
        for attempt in 1..=3 {
            let delay = jittered(&policy, attempt);
            assert!(delay >= policy.backoff_for(attempt));
            assert!(delay <= policy.backoff_for(attempt) + policy.max_jitter);
        }
    }
}
