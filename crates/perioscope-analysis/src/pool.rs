//! Bounded worker pool for external calls.
//!
//! One abstraction for chunk analysis and literature search; each owner
//! builds its own pool with its own limit. Work beyond the limit waits for a
//! permit. Completion order is not submission order.

use std::future::Future;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct BoundedPool {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl BoundedPool {
    /// A limit of zero is treated as one.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self { permits: Arc::new(Semaphore::new(limit)), limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_flight(&self) -> usize {
        self.limit - self.permits.available_permits()
    }

    /// Runs `work` once a permit is free. The future is not polled before that.
    pub async fn run<F: Future>(&self, work: F) -> F::Output {
        // The semaphore is never closed, so acquire only fails if that changes.
        let _permit = self.permits.acquire().await.ok();
        work.await
    }

    /// Runs `f` over every item under the pool and collects outputs in
    /// completion order.
    pub async fn map_unordered<I, F, Fut>(&self, items: I, f: F) -> Vec<Fut::Output>
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future,
    {
        let mut pending: FuturesUnordered<_> = items.into_iter().map(|item| self.run(f(item))).collect();
        let mut out = Vec::with_capacity(pending.len());
        while let Some(result) = pending.next().await {
            out.push(result);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_never_exceeds_limit() {
        let pool = BoundedPool::new(2);
        let current = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let out = pool
            .map_unordered(0..8, |i| {
                let (current, peak) = (&current, &peak);
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    i
                }
            })
            .await;

        assert_eq!(out.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_zero_limit_is_one() {
        assert_eq!(BoundedPool::new(0).limit(), 1);
    }
}
