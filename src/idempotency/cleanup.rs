use std::sync::Arc;
use std::time::Duration;

use super::IdempotencyCache;

/// Background sweep that evicts expired idempotency records.
pub struct IdempotencyCleanupJob {
    cache: Arc<IdempotencyCache>,
    interval: Duration,
}

impl IdempotencyCleanupJob {
    pub fn new(cache: Arc<IdempotencyCache>, interval: Duration) -> Self {
        Self { cache, interval }
    }

    /// Runs the sweep once and returns the number of evicted records.
    pub fn run_once(&self) -> usize {
        self.cache.purge_expired()
    }

    /// Starts the sweep in a background task. Abort the handle to stop it.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                let count = self.run_once();
                if count > 0 {
                    tracing::info!("Cleaned up {} expired idempotency records", count);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::IdempotencyConfig;
    use axum::body::Bytes;
    use http::StatusCode;

    #[test]
    fn test_run_once_evicts_expired() {
        let cache = Arc::new(IdempotencyCache::new(
            IdempotencyConfig::default().with_retention(Duration::ZERO),
        ));
        cache.record("a", StatusCode::CREATED, Bytes::new());

        let job = IdempotencyCleanupJob::new(Arc::clone(&cache), Duration::from_secs(60));
        assert_eq!(job.run_once(), 1);
        assert!(cache.is_empty());
        assert_eq!(job.run_once(), 0);
    }

    #[tokio::test]
    async fn test_background_sweep_runs() {
        let cache = Arc::new(IdempotencyCache::new(
            IdempotencyConfig::default().with_retention(Duration::from_millis(10)),
        ));
        cache.record("a", StatusCode::CREATED, Bytes::new());

        let handle =
            IdempotencyCleanupJob::new(Arc::clone(&cache), Duration::from_millis(20)).start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(cache.is_empty());
        assert_eq!(cache.metrics().snapshot().evicted_records, 1);
    }
}
