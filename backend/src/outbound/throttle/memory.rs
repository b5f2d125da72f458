//! Token buckets held in process memory.
//!
//! Each key owns a bucket of `quota.limit` tokens refilling continuously at
//! `limit / period`. Buckets that would be full again are dropped once the
//! table grows past [`PRUNE_THRESHOLD`] keys.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::Clock;
use tracing::trace;

use crate::domain::ports::{Quota, ThrottleDecision, ThrottleStore, ThrottleStoreError};

const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    refilled_at: DateTime<Utc>,
    full_at: DateTime<Utc>,
}

pub struct InMemoryThrottleStore {
    buckets: Mutex<HashMap<String, Bucket>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl InMemoryThrottleStore {
    pub fn new(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

impl std::fmt::Debug for InMemoryThrottleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryThrottleStore").finish_non_exhaustive()
    }
}

fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).to_std().unwrap_or_default().as_secs_f64()
}

#[async_trait]
impl ThrottleStore for InMemoryThrottleStore {
    async fn acquire(
        &self,
        key: &str,
        quota: Quota,
        cost: u32,
    ) -> Result<ThrottleDecision, ThrottleStoreError> {
        if quota.limit == 0 || quota.period.is_zero() {
            return Ok(ThrottleDecision {
                limited: true,
                remaining: 0,
                retry_after: quota.period,
            });
        }

        let now = self.clock.utc();
        let capacity = f64::from(quota.limit);
        let rate = capacity / quota.period.as_secs_f64();
        let cost = f64::from(cost);

        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        if buckets.len() > PRUNE_THRESHOLD {
            buckets.retain(|_, bucket| bucket.full_at > now);
        }
        let bucket = buckets.entry(key.to_owned()).or_insert(Bucket {
            tokens: capacity,
            refilled_at: now,
            full_at: now,
        });

        bucket.tokens =
            (bucket.tokens + elapsed_secs(bucket.refilled_at, now) * rate).min(capacity);
        bucket.refilled_at = now;

        let decision = if bucket.tokens >= cost {
            bucket.tokens -= cost;
            ThrottleDecision {
                limited: false,
                remaining: bucket.tokens.floor() as u32,
                retry_after: Duration::ZERO,
            }
        } else {
            ThrottleDecision {
                limited: true,
                remaining: bucket.tokens.floor() as u32,
                retry_after: Duration::from_secs_f64((cost - bucket.tokens) / rate),
            }
        };
        let refill = Duration::from_secs_f64((capacity - bucket.tokens) / rate);
        bucket.full_at = now + chrono::Duration::from_std(refill).unwrap_or_default();

        trace!(
            key,
            limited = decision.limited,
            remaining = decision.remaining,
            "throttle bucket charged"
        );
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MutableClock;
    use rstest::{fixture, rstest};

    #[fixture]
    fn clock() -> Arc<MutableClock> {
        Arc::new(MutableClock::at(1_700_000_000))
    }

    async fn charge(store: &InMemoryThrottleStore, key: &str, quota: Quota) -> ThrottleDecision {
        store.acquire(key, quota, 1).await.expect("store never fails")
    }

    #[rstest]
    #[tokio::test]
    async fn bucket_drains_then_limits(clock: Arc<MutableClock>) {
        let store = InMemoryThrottleStore::new(clock);
        let quota = Quota::per_min(3);

        for expected in [2, 1, 0] {
            let decision = charge(&store, "k", quota).await;
            assert!(!decision.limited);
            assert_eq!(decision.remaining, expected);
        }
        let decision = charge(&store, "k", quota).await;
        assert!(decision.limited);
        assert_eq!(decision.retry_after.as_secs_f64().round(), 20.0);
    }

    #[rstest]
    #[tokio::test]
    async fn tokens_refill_over_time(clock: Arc<MutableClock>) {
        let store = InMemoryThrottleStore::new(Arc::clone(&clock) as Arc<dyn Clock + Send + Sync>);
        let quota = Quota::per_min(2);
        charge(&store, "k", quota).await;
        charge(&store, "k", quota).await;
        assert!(charge(&store, "k", quota).await.limited);

        clock.advance(chrono::Duration::seconds(31));
        assert!(!charge(&store, "k", quota).await.limited);
        assert!(charge(&store, "k", quota).await.limited);

        clock.advance(chrono::Duration::minutes(10));
        let decision = charge(&store, "k", quota).await;
        assert_eq!(decision.remaining, 1, "refill is capped at the quota");
    }

    #[rstest]
    #[tokio::test]
    async fn keys_are_independent(clock: Arc<MutableClock>) {
        let store = InMemoryThrottleStore::new(clock);
        let quota = Quota::per_min(1);
        assert!(!charge(&store, "a", quota).await.limited);
        assert!(charge(&store, "a", quota).await.limited);
        assert!(!charge(&store, "b", quota).await.limited);
    }

    #[rstest]
    #[tokio::test]
    async fn zero_quota_always_limits(clock: Arc<MutableClock>) {
        let store = InMemoryThrottleStore::new(clock);
        assert!(charge(&store, "k", Quota::per_min(0)).await.limited);
    }
}
