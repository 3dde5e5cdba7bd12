//! Per-credential request rate limiting.
//!
//! Every API key gets one token bucket per [`Bucket`] kind. Buckets live in a [`DashMap`], so
//! requests for different keys never contend on the same lock. Tokens refill continuously at
//! `capacity / period`.
//!
//! Buckets that have refilled completely carry no state worth keeping; [`RateLimiter::prune`]
//! drops them and [`spawn_pruner`] runs it periodically.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::{BucketConfig, RateLimitsConfig};
use crate::errors::{Error, Result};
use crate::metrics;
use crate::types::ApiKeyId;

/// Which budget a request draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Ingest,
    Query,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Ingest => "ingest",
            Bucket::Query => "query",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    updated_at: Instant,
}

impl TokenBucket {
    fn full(config: &BucketConfig, now: Instant) -> Self {
        Self {
            tokens: f64::from(config.capacity),
            updated_at: now,
        }
    }

    fn refill(&mut self, config: &BucketConfig, now: Instant) {
        let elapsed = now.saturating_duration_since(self.updated_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.refill_per_sec()).min(f64::from(config.capacity));
        self.updated_at = now;
    }

    /// Take one token, or return how long until one is available.
    fn take(&mut self, config: &BucketConfig, now: Instant) -> std::result::Result<(), Duration> {
        self.refill(config, now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / config.refill_per_sec()))
        }
    }

    fn is_full(&self, config: &BucketConfig, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.updated_at).as_secs_f64();
        self.tokens + elapsed * config.refill_per_sec() >= f64::from(config.capacity)
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    ingest: BucketConfig,
    query: BucketConfig,
    buckets: DashMap<(ApiKeyId, Bucket), TokenBucket>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitsConfig) -> Self {
        Self {
            ingest: config.ingest,
            query: config.query,
            buckets: DashMap::new(),
        }
    }

    fn config(&self, bucket: Bucket) -> &BucketConfig {
        match bucket {
            Bucket::Ingest => &self.ingest,
            Bucket::Query => &self.query,
        }
    }

    fn take(&self, key: ApiKeyId, bucket: Bucket) -> std::result::Result<(), Duration> {
        let config = self.config(bucket);
        let now = Instant::now();
        self.buckets
            .entry((key, bucket))
            .or_insert_with(|| TokenBucket::full(config, now))
            .take(config, now)
    }

    /// Consume one token if available.
    pub fn allow(&self, key: ApiKeyId, bucket: Bucket) -> bool {
        self.take(key, bucket).is_ok()
    }

    /// Like [`allow`](Self::allow), but produces the 429 error carrying a `Retry-After` hint.
    pub fn check(&self, key: ApiKeyId, bucket: Bucket) -> Result<()> {
        self.take(key, bucket).map_err(|wait| {
            trace!(%key, %bucket, ?wait, "Rate limit exceeded");
            metrics::record_rate_limited(bucket);
            Error::RateLimited {
                bucket: bucket.as_str(),
                retry_after_secs: wait.as_secs_f64().ceil().max(1.0) as u64,
            }
        })
    }

    /// Drop buckets that have refilled completely. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|(_, bucket), state| !state.is_full(self.config(*bucket), now));
        before.saturating_sub(self.buckets.len())
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Periodically prune idle buckets until `shutdown` is cancelled.
pub fn spawn_pruner(limiter: Arc<RateLimiter>, every: Duration, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let removed = limiter.prune();
                    if removed > 0 {
                        debug!(removed, remaining = limiter.len(), "Pruned idle rate limit buckets");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn limiter(capacity: u32, period_secs: u64) -> RateLimiter {
        let bucket = BucketConfig {
            capacity,
            period: Duration::from_secs(period_secs),
        };
        RateLimiter::new(&RateLimitsConfig {
            ingest: bucket,
            query: bucket,
            prune_interval: Duration::from_secs(300),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_then_reject() {
        let limiter = limiter(3, 60);
        let key = Uuid::new_v4();

        assert!(limiter.allow(key, Bucket::Ingest));
        assert!(limiter.allow(key, Bucket::Ingest));
        assert!(limiter.allow(key, Bucket::Ingest));
        assert!(!limiter.allow(key, Bucket::Ingest));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refills_continuously() {
        let limiter = limiter(3, 60);
        let key = Uuid::new_v4();
        for _ in 0..3 {
            assert!(limiter.allow(key, Bucket::Ingest));
        }
        assert!(!limiter.allow(key, Bucket::Ingest));

        // One token every 20 seconds
        tokio::time::advance(Duration::from_secs(19)).await;
        assert!(!limiter.allow(key, Bucket::Ingest));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(limiter.allow(key, Bucket::Ingest));
        assert!(!limiter.allow(key, Bucket::Ingest));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_and_buckets_are_independent() {
        let limiter = limiter(1, 60);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(limiter.allow(a, Bucket::Ingest));
        assert!(!limiter.allow(a, Bucket::Ingest));
        assert!(limiter.allow(a, Bucket::Query));
        assert!(limiter.allow(b, Bucket::Ingest));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_reports_retry_after() {
        let limiter = limiter(1, 60);
        let key = Uuid::new_v4();
        limiter.check(key, Bucket::Query).unwrap();

        match limiter.check(key, Bucket::Query) {
            Err(Error::RateLimited { bucket, retry_after_secs }) => {
                assert_eq!(bucket, "query");
                assert!((60..=61).contains(&retry_after_secs), "{retry_after_secs}");
            }
            other => panic!("expected rate limit error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_drops_only_full_buckets() {
        let limiter = limiter(2, 60);
        let idle = Uuid::new_v4();
        let busy = Uuid::new_v4();

        assert!(limiter.allow(idle, Bucket::Ingest));
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(limiter.allow(busy, Bucket::Ingest));
        assert!(limiter.allow(busy, Bucket::Ingest));
        assert_eq!(limiter.len(), 2);

        // idle has refilled its one token; busy is still missing most of two
        assert_eq!(limiter.prune(), 1);
        assert_eq!(limiter.len(), 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.prune(), 1);
        assert!(limiter.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pruner_stops_on_cancel() {
        let limiter = Arc::new(limiter(1, 1));
        limiter.allow(Uuid::new_v4(), Bucket::Ingest);

        let shutdown = CancellationToken::new();
        let handle = spawn_pruner(limiter.clone(), Duration::from_secs(5), shutdown.clone());
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(limiter.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
