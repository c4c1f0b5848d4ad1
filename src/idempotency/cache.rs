use axum::body::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderValue, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

use super::metrics::IdempotencyMetrics;
use crate::observability::{get_metrics, mask_sensitive};

/// Retention window applied when none is configured.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for the idempotency cache.
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// How long a recorded response stays replayable.
    pub retention: Duration,
    /// Upper bound on completed records kept in memory. `None` is unbounded.
    pub max_entries: Option<usize>,
    /// Largest response body the layer will buffer and record.
    pub max_body_bytes: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            max_entries: None,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl IdempotencyConfig {
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries.max(1));
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}

/// Response recorded for the first execution of an idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    pub key: String,
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    fn new(
        key: String,
        status: StatusCode,
        content_type: Option<HeaderValue>,
        body: Bytes,
        retention: Duration,
    ) -> Self {
        let now = Utc::now();
        let retention = chrono::Duration::from_std(retention)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        Self {
            key,
            status,
            content_type,
            body,
            created_at: now,
            expires_at: now + retention,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

type RecordSlot = Option<Arc<IdempotencyRecord>>;

enum Slot {
    /// First request for the key is still running.
    Pending {
        id: u64,
        ready: watch::Receiver<RecordSlot>,
    },
    Completed(Arc<IdempotencyRecord>),
}

/// Outcome of claiming an idempotency key.
pub enum Claim {
    /// A response was already recorded; replay it.
    Replay(Arc<IdempotencyRecord>),
    /// Another request owns the key; wait for its outcome.
    Wait(PendingWait),
    /// This caller owns the key and must execute the handler.
    Execute(PendingGuard),
}

/// Process-local cache of responses keyed by idempotency token.
///
/// Each key moves from vacant to pending (one owner executing) to completed
/// (response recorded). Requests that find a pending key wait for the owner
/// instead of executing a second time. Expired records are dropped on sight
/// and by [`IdempotencyCache::purge_expired`].
pub struct IdempotencyCache {
    config: IdempotencyConfig,
    slots: Mutex<HashMap<String, Slot>>,
    next_id: AtomicU64,
    metrics: Arc<IdempotencyMetrics>,
}

impl IdempotencyCache {
    pub fn new(config: IdempotencyConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            metrics: Arc::new(IdempotencyMetrics::new()),
        }
    }

    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<IdempotencyMetrics> {
        Arc::clone(&self.metrics)
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every eviction path reports here, lazy expiry and capacity included.
    fn note_evicted(&self, count: u64) {
        self.metrics.record_evicted(count);
        get_metrics().record_idempotency_evictions(count);
    }

    /// Returns the recorded response for `key`, or `None` if unseen, pending
    /// or expired.
    pub fn lookup(&self, key: &str) -> Option<Arc<IdempotencyRecord>> {
        let mut slots = self.slots();
        let expired = match slots.get(key) {
            Some(Slot::Completed(record)) if !record.is_expired() => {
                return Some(Arc::clone(record));
            }
            Some(Slot::Completed(_)) => true,
            _ => false,
        };
        if expired {
            slots.remove(key);
            self.note_evicted(1);
        }
        None
    }

    /// Stores a response for `key` directly.
    ///
    /// If an unexpired record already exists the first one is kept.
    pub fn record(&self, key: &str, status: StatusCode, body: Bytes) -> Arc<IdempotencyRecord> {
        let record = Arc::new(IdempotencyRecord::new(
            key.to_string(),
            status,
            None,
            body,
            self.config.retention,
        ));
        let mut slots = self.slots();
        self.store_completed(&mut slots, record, None)
    }

    /// Atomically claims `key`.
    pub fn begin(self: &Arc<Self>, key: &str) -> Claim {
        let mut slots = self.slots();

        let expired = match slots.get(key) {
            Some(Slot::Completed(record)) if !record.is_expired() => {
                return Claim::Replay(Arc::clone(record));
            }
            Some(Slot::Pending { ready, .. }) => {
                return Claim::Wait(PendingWait {
                    ready: ready.clone(),
                });
            }
            Some(Slot::Completed(_)) => true,
            None => false,
        };
        if expired {
            slots.remove(key);
            self.note_evicted(1);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, ready) = watch::channel(None);
        slots.insert(key.to_string(), Slot::Pending { id, ready });

        Claim::Execute(PendingGuard {
            cache: Arc::clone(self),
            key: key.to_string(),
            id,
            sender,
            completed: false,
        })
    }

    /// Removes every expired completed record. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::Completed(record) => !record.is_expired_at(now),
            Slot::Pending { .. } => true,
        });
        let removed = before - slots.len();
        if removed > 0 {
            self.note_evicted(removed as u64);
        }
        removed
    }

    /// Number of keys held, pending or completed.
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }

    /// Inserts a completed record unless an unexpired one already exists.
    /// `owner` is the pending id allowed to be replaced.
    fn store_completed(
        &self,
        slots: &mut HashMap<String, Slot>,
        record: Arc<IdempotencyRecord>,
        owner: Option<u64>,
    ) -> Arc<IdempotencyRecord> {
        match slots.get(&record.key) {
            Some(Slot::Completed(existing)) if !existing.is_expired() => {
                tracing::warn!(
                    key = %mask_sensitive(&record.key, 4),
                    "Idempotency key already recorded, keeping first response"
                );
                return Arc::clone(existing);
            }
            Some(Slot::Pending { id, .. }) if Some(*id) != owner => {
                tracing::warn!(
                    key = %mask_sensitive(&record.key, 4),
                    "Recording over a pending idempotency key"
                );
            }
            _ => {}
        }

        slots.insert(record.key.clone(), Slot::Completed(Arc::clone(&record)));
        self.metrics.record_completed();
        self.enforce_capacity(slots);
        record
    }

    fn enforce_capacity(&self, slots: &mut HashMap<String, Slot>) {
        let Some(max_entries) = self.config.max_entries else {
            return;
        };

        if completed_count(slots) <= max_entries {
            return;
        }

        let now = Utc::now();
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::Completed(record) => !record.is_expired_at(now),
            Slot::Pending { .. } => true,
        });
        let mut evicted = (before - slots.len()) as u64;

        let mut excess = completed_count(slots).saturating_sub(max_entries);
        while excess > 0 {
            let oldest = slots
                .iter()
                .filter_map(|(key, slot)| match slot {
                    Slot::Completed(record) => Some((record.expires_at, key.clone())),
                    Slot::Pending { .. } => None,
                })
                .min();
            match oldest {
                Some((_, key)) => {
                    slots.remove(&key);
                    evicted += 1;
                    excess -= 1;
                }
                None => break,
            }
        }

        if evicted > 0 {
            self.note_evicted(evicted);
            tracing::debug!(evicted, "Idempotency cache over capacity");
        }
    }
}

fn completed_count(slots: &HashMap<String, Slot>) -> usize {
    slots
        .values()
        .filter(|slot| matches!(slot, Slot::Completed(_)))
        .count()
}

/// Handle for a request waiting on a pending key.
pub struct PendingWait {
    ready: watch::Receiver<RecordSlot>,
}

impl PendingWait {
    /// Resolves to the owner's recorded response, or `None` if the owner
    /// finished without recording one.
    pub async fn wait(mut self) -> Option<Arc<IdempotencyRecord>> {
        match self.ready.wait_for(|slot| slot.is_some()).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        }
    }
}

/// Ownership of a pending key.
///
/// Dropping the guard without calling [`PendingGuard::complete`] releases the
/// key so that waiting requests can claim it again.
pub struct PendingGuard {
    cache: Arc<IdempotencyCache>,
    key: String,
    id: u64,
    sender: watch::Sender<RecordSlot>,
    completed: bool,
}

impl PendingGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Records the response and wakes every waiter with it.
    pub fn complete(
        mut self,
        status: StatusCode,
        content_type: Option<HeaderValue>,
        body: Bytes,
    ) -> Arc<IdempotencyRecord> {
        let record = Arc::new(IdempotencyRecord::new(
            self.key.clone(),
            status,
            content_type,
            body,
            self.cache.config.retention,
        ));

        let stored = {
            let mut slots = self.cache.slots();
            self.cache.store_completed(&mut slots, record, Some(self.id))
        };

        self.completed = true;
        self.sender.send_replace(Some(Arc::clone(&stored)));
        stored
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }

        let mut slots = self.cache.slots();
        if matches!(slots.get(&self.key), Some(Slot::Pending { id, .. }) if *id == self.id) {
            slots.remove(&self.key);
        }
        drop(slots);

        self.cache.metrics.record_released();
        tracing::debug!(
            key = %mask_sensitive(&self.key, 4),
            "Released idempotency key without recording"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with(config: IdempotencyConfig) -> Arc<IdempotencyCache> {
        Arc::new(IdempotencyCache::new(config))
    }

    fn execute(claim: Claim) -> PendingGuard {
        match claim {
            Claim::Execute(guard) => guard,
            _ => panic!("expected to own the key"),
        }
    }

    #[test]
    fn test_lookup_unseen_key() {
        let cache = cache_with(IdempotencyConfig::default());
        assert!(cache.lookup("missing").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_record_then_lookup() {
        let cache = cache_with(IdempotencyConfig::default());
        cache.record("k1", StatusCode::CREATED, Bytes::from_static(b"{\"ok\":1}"));

        let record = cache.lookup("k1").unwrap();
        assert_eq!(record.status, StatusCode::CREATED);
        assert_eq!(record.body, Bytes::from_static(b"{\"ok\":1}"));
        assert!(record.expires_at > record.created_at);
    }

    #[test]
    fn test_second_record_keeps_first() {
        let cache = cache_with(IdempotencyConfig::default());
        cache.record("k1", StatusCode::CREATED, Bytes::from_static(b"first"));
        let kept = cache.record("k1", StatusCode::OK, Bytes::from_static(b"second"));

        assert_eq!(kept.body, Bytes::from_static(b"first"));
        assert_eq!(cache.lookup("k1").unwrap().status, StatusCode::CREATED);
    }

    #[test]
    fn test_begin_claims_then_replays() {
        let cache = cache_with(IdempotencyConfig::default());

        let guard = execute(cache.begin("k1"));
        assert_eq!(guard.key(), "k1");
        assert!(cache.lookup("k1").is_none(), "pending keys are not replayable");

        guard.complete(StatusCode::CREATED, None, Bytes::from_static(b"body"));

        match cache.begin("k1") {
            Claim::Replay(record) => assert_eq!(record.body, Bytes::from_static(b"body")),
            _ => panic!("expected replay"),
        }
    }

    #[test]
    fn test_dropped_guard_releases_key() {
        let cache = cache_with(IdempotencyConfig::default());
        drop(execute(cache.begin("k1")));

        assert!(cache.is_empty());
        assert_eq!(cache.metrics().snapshot().released_requests, 1);
        assert!(matches!(cache.begin("k1"), Claim::Execute(_)));
    }

    #[test]
    fn test_expired_record_is_treated_as_new() {
        let cache = cache_with(IdempotencyConfig::default().with_retention(Duration::ZERO));
        cache.record("k1", StatusCode::CREATED, Bytes::new());

        assert!(cache.lookup("k1").is_none());
        assert!(matches!(cache.begin("k1"), Claim::Execute(_)));
    }

    #[test]
    fn test_purge_expired_keeps_pending() {
        let cache = cache_with(IdempotencyConfig::default().with_retention(Duration::ZERO));
        cache.record("a", StatusCode::CREATED, Bytes::new());
        cache.record("b", StatusCode::CREATED, Bytes::new());
        let _guard = execute(cache.begin("c"));

        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_earliest_expiring() {
        let cache = cache_with(IdempotencyConfig::default().with_max_entries(2));
        cache.record("a", StatusCode::CREATED, Bytes::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        cache.record("b", StatusCode::CREATED, Bytes::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        cache.record("c", StatusCode::CREATED, Bytes::new());

        assert_eq!(cache.len(), 2);
        assert!(cache.lookup("a").is_none());
        assert!(cache.lookup("b").is_some());
        assert!(cache.lookup("c").is_some());
    }

    #[tokio::test]
    async fn test_waiter_receives_owner_response() {
        let cache = cache_with(IdempotencyConfig::default());
        let guard = execute(cache.begin("k1"));

        let waiter = match cache.begin("k1") {
            Claim::Wait(wait) => tokio::spawn(wait.wait()),
            _ => panic!("expected to wait"),
        };

        guard.complete(StatusCode::CREATED, None, Bytes::from_static(b"done"));

        let record = waiter.await.unwrap().expect("owner recorded a response");
        assert_eq!(record.body, Bytes::from_static(b"done"));
    }

    #[tokio::test]
    async fn test_waiter_woken_when_owner_releases() {
        let cache = cache_with(IdempotencyConfig::default());
        let guard = execute(cache.begin("k1"));

        let wait = match cache.begin("k1") {
            Claim::Wait(wait) => wait,
            _ => panic!("expected to wait"),
        };
        drop(guard);

        assert!(wait.wait().await.is_none());
        assert!(matches!(cache.begin("k1"), Claim::Execute(_)));
    }

    #[test]
    fn test_lazy_and_capacity_evictions_reach_exporter() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            let expiring = cache_with(IdempotencyConfig::default().with_retention(Duration::ZERO));
            expiring.record("a", StatusCode::CREATED, Bytes::new());
            assert!(expiring.lookup("a").is_none());

            let bounded = cache_with(IdempotencyConfig::default().with_max_entries(1));
            bounded.record("x", StatusCode::CREATED, Bytes::new());
            bounded.record("y", StatusCode::CREATED, Bytes::new());

            assert_eq!(expiring.metrics().snapshot().evicted_records, 1);
            assert_eq!(bounded.metrics().snapshot().evicted_records, 1);
        });

        assert!(handle
            .render()
            .contains("idempotency_records_evicted_total 2"));
    }
}
