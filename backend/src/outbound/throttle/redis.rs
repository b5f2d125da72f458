//! Token buckets shared through Redis.
//!
//! A bucket lives in a hash under `throttle:<key>` holding the remaining
//! tokens and the time of the last refill. Refill and charge run in one Lua
//! script so concurrent instances never interleave on a bucket. The hash
//! expires once the bucket would be full again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::RedisConnectionManager;
use bb8_redis::bb8::Pool;
use bb8_redis::redis;
use mockable::Clock;
use tracing::{debug, trace};

use crate::domain::ports::{Quota, ThrottleDecision, ThrottleStore, ThrottleStoreError};

const KEY_PREFIX: &str = "throttle:";

/// Refill then charge one bucket.
///
/// `ARGV`: capacity, period in milliseconds, cost, now in milliseconds.
/// Returns `{allowed, remaining, retry_after_ms}`.
const ACQUIRE_SCRIPT: &str = r"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local period_ms = tonumber(ARGV[2])
local cost = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local rate = capacity / period_ms

local state = redis.call('HMGET', key, 'tokens', 'ts')
local tokens = tonumber(state[1])
local ts = tonumber(state[2])
if tokens == nil or ts == nil then
    tokens = capacity
    ts = now
end
tokens = math.min(capacity, tokens + math.max(0, now - ts) * rate)

local allowed = 0
local retry_ms = 0
if tokens >= cost then
    tokens = tokens - cost
    allowed = 1
else
    retry_ms = math.ceil((cost - tokens) / rate)
end

redis.call('HSET', key, 'tokens', tostring(tokens), 'ts', tostring(now))
redis.call('PEXPIRE', key, math.max(1, math.ceil((capacity - tokens) / rate)))
return {allowed, math.floor(tokens), retry_ms}
";

/// Connection settings for [`RedisThrottleStore`].
#[derive(Clone)]
pub struct RedisThrottleConfig {
    url: String,
    max_size: u32,
    connection_timeout: Duration,
}

impl RedisThrottleConfig {
    /// Defaults to 8 connections and a 5 second checkout timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_size: 8,
            connection_timeout: Duration::from_secs(5),
        }
    }

    /// Cap the number of open connections.
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    /// How long a checkout waits before the request is charged as failed.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for RedisThrottleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisThrottleConfig")
            .field("url", &"<redacted>")
            .field("max_size", &self.max_size)
            .field("connection_timeout", &self.connection_timeout)
            .finish()
    }
}

/// Token buckets stored in Redis, shared by every process using the same
/// server.
pub struct RedisThrottleStore {
    pool: Pool<RedisConnectionManager>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl RedisThrottleStore {
    /// Build the connection pool for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottleStoreError::Backend`] when the URL is invalid or the
    /// server cannot be reached.
    pub async fn connect(
        config: RedisThrottleConfig,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Result<Self, ThrottleStoreError> {
        let manager = RedisConnectionManager::new(config.url.as_str())
            .map_err(|err| ThrottleStoreError::backend(err.to_string()))?;
        let pool = Pool::builder()
            .max_size(config.max_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|err| ThrottleStoreError::backend(err.to_string()))?;
        debug!(max_size = config.max_size, "redis throttle pool ready");
        Ok(Self { pool, clock })
    }
}

impl std::fmt::Debug for RedisThrottleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisThrottleStore").finish_non_exhaustive()
    }
}

fn bucket_key(key: &str) -> String {
    format!("{KEY_PREFIX}{key}")
}

fn period_millis(quota: Quota) -> u64 {
    u64::try_from(quota.period.as_millis()).unwrap_or(u64::MAX)
}

fn decision(reply: (i64, i64, i64)) -> ThrottleDecision {
    let (allowed, remaining, retry_ms) = reply;
    ThrottleDecision {
        limited: allowed == 0,
        remaining: u32::try_from(remaining.max(0)).unwrap_or(u32::MAX),
        retry_after: Duration::from_millis(u64::try_from(retry_ms.max(0)).unwrap_or(0)),
    }
}

#[async_trait]
impl ThrottleStore for RedisThrottleStore {
    async fn acquire(
        &self,
        key: &str,
        quota: Quota,
        cost: u32,
    ) -> Result<ThrottleDecision, ThrottleStoreError> {
        if quota.limit == 0 || period_millis(quota) == 0 {
            return Ok(ThrottleDecision {
                limited: true,
                remaining: 0,
                retry_after: quota.period,
            });
        }

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| ThrottleStoreError::backend(err.to_string()))?;
        let reply: (i64, i64, i64) = redis::cmd("EVAL")
            .arg(ACQUIRE_SCRIPT)
            .arg(1)
            .arg(bucket_key(key))
            .arg(quota.limit)
            .arg(period_millis(quota))
            .arg(cost)
            .arg(self.clock.utc().timestamp_millis())
            .query_async(&mut *conn)
            .await
            .map_err(|err| ThrottleStoreError::backend(err.to_string()))?;

        let decision = decision(reply);
        trace!(
            key,
            limited = decision.limited,
            remaining = decision.remaining,
            "throttle bucket charged"
        );
        Ok(decision)
    }
}
