//! Bounded-concurrency batch execution (spec §4.5, `listByPartition`/bulk
//! paths). Grounded on the same semaphore-gated concurrency shape used by
//! `objectdb-client`'s `BoundedObjectClient` (itself grounded on
//! `aerolithdb-storage/src/backends.rs`'s `MemoryCache`), generalized into a
//! standalone helper rather than tied to storage placement.

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::Semaphore;

pub struct BatchOutcome<T, E> {
    pub successes: Vec<T>,
    pub failures: Vec<E>,
}

/// Runs `f` over every item in `items` with at most `concurrency` calls
/// in flight at once. Results are collected back in input order regardless
/// of completion order. If `stop_on_error` is set, the first error observed
/// prevents any further *unscheduled* work from starting, but tasks already
/// in flight are allowed to finish.
pub async fn run_batch<I, T, E, F>(items: Vec<I>, concurrency: usize, stop_on_error: bool, f: F) -> BatchOutcome<T, E>
where
    I: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(I) -> BoxFuture<'static, Result<T, E>> + Send + Sync + 'static,
{
    let concurrency = concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let f = Arc::new(f);
    let stopped = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let mut handles = Vec::with_capacity(items.len());
    for item in items {
        if stop_on_error && stopped.load(std::sync::atomic::Ordering::Acquire) {
            break;
        }
        let semaphore = semaphore.clone();
        let f = f.clone();
        let stopped = stopped.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            let result = f(item).await;
            if stop_on_error && result.is_err() {
                stopped.store(true, std::sync::atomic::Ordering::Release);
            }
            result
        }));
    }

    let mut successes = Vec::new();
    let mut failures = Vec::new();
    for handle in handles {
        match handle.await.expect("batch task panicked") {
            Ok(value) => successes.push(value),
            Err(err) => failures.push(err),
        }
    }
    BatchOutcome { successes, failures }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn preserves_no_more_than_concurrency_permits_and_collects_all_results() {
        let outcome = run_batch(vec![1, 2, 3, 4, 5], 2, false, |n: i32| {
            Box::pin(async move { Ok::<i32, ()>(n * 2) })
        })
        .await;
        let mut doubled = outcome.successes;
        doubled.sort_unstable();
        assert_eq!(doubled, vec![2, 4, 6, 8, 10]);
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn collects_failures_separately_from_successes() {
        let outcome = run_batch(vec![1, 2, 3], 3, false, |n: i32| {
            Box::pin(async move { if n == 2 { Err("bad") } else { Ok(n) } })
        })
        .await;
        assert_eq!(outcome.successes.len(), 2);
        assert_eq!(outcome.failures, vec!["bad"]);
    }

    #[tokio::test]
    async fn stop_on_error_halts_scheduling_further_work() {
        let outcome = run_batch(vec![1, 2, 3, 4, 5, 6, 7, 8], 1, true, |n: i32| {
            Box::pin(async move { if n == 3 { Err("boom") } else { Ok(n) } })
        })
        .await;
        // With concurrency 1 and stop_on_error, work scheduled after the
        // failing item never runs.
        assert!(outcome.successes.len() + outcome.failures.len() < 8);
    }
}
