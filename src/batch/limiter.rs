//! Bounded-concurrency fan-out for independent submissions
//!
//! Jobs run as futures on the calling task; a semaphore caps how many are
//! in flight. Results come back in input order.

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Default number of submissions in flight at once
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyLimiter {
    /// Limiter allowing `capacity` jobs at once (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Run every job, at most `capacity` at a time
    pub async fn run_all<I, Fut, T>(&self, jobs: I) -> Vec<T>
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = T>,
    {
        let gated = jobs.into_iter().map(|job| {
            let semaphore = Arc::clone(&self.semaphore);
            async move {
                // The semaphore is never closed
                let _permit = semaphore.acquire_owned().await.ok();
                job.await
            }
        });
        join_all(gated).await
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_never_exceeds_capacity() {
        let limiter = ConcurrencyLimiter::new(3);
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let results = limiter
            .run_all((0..20).map(|i| {
                let in_flight = &in_flight;
                let peak = &peak;
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10 + (i % 4) as u64)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    i * 2
                }
            }))
            .await;

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(results, (0..20).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(ConcurrencyLimiter::new(0).capacity(), 1);
    }
}
