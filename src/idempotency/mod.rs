pub mod cache;
pub mod cleanup;
pub mod metrics;
pub mod middleware;

pub use cache::{
    Claim, IdempotencyCache, IdempotencyConfig, IdempotencyRecord, PendingGuard, PendingWait,
    DEFAULT_RETENTION,
};
pub use cleanup::IdempotencyCleanupJob;
pub use metrics::{IdempotencyMetrics, MetricsSnapshot};
pub use middleware::{extract_key, idempotency_layer, IDEMPOTENCY_KEY_HEADER};
