//! Exponential backoff with jitter for idempotent object-store calls.
//!
//! GET/HEAD/DELETE/LIST are always safe to retry. PUT is retried only when
//! the caller marks it safe — no `ifMatch`, or an `ifMatch` precondition that
//! itself makes a retried duplicate harmless.

use rand::Rng;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 4;
const BASE_DELAY_MS: u64 = 50;
const MAX_DELAY_MS: u64 = 2000;

pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(10));
    let capped = exp.min(MAX_DELAY_MS);
    let jitter = rand::thread_rng().gen_range(0..=capped / 2 + 1);
    Duration::from_millis(capped / 2 + jitter)
}

/// Runs `op` up to `MAX_ATTEMPTS` times, sleeping with backoff between
/// attempts, as long as `is_retryable` says the error is transient.
pub async fn with_retries<T, E, F, Fut, R>(mut op: F, is_retryable: R) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < MAX_ATTEMPTS && is_retryable(&err) => {
                tokio::time::sleep(backoff_delay(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_with_attempt_and_stays_capped() {
        for attempt in 0..8 {
            let d = backoff_delay(attempt);
            assert!(d.as_millis() as u64 <= MAX_DELAY_MS);
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let mut calls = 0;
        let result: Result<i32, &str> = with_retries(
            || {
                calls += 1;
                async move { if calls < 3 { Err("transient") } else { Ok(42) } }
            },
            |_| true,
        )
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn stops_immediately_on_non_retryable_error() {
        let mut calls = 0;
        let result: Result<i32, &str> = with_retries(
            || {
                calls += 1;
                async move { Err("permanent") }
            },
            |_| false,
        )
        .await;
        assert_eq!(result, Err("permanent"));
        assert_eq!(calls, 1);
    }
}
