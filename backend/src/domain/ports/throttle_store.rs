//! Port for rate-limit bookkeeping.
//!
//! The store implements a token bucket per key: each key holds up to
//! `quota.limit` tokens that refill continuously over `quota.period`.

use std::time::Duration;

use async_trait::async_trait;

use super::define_port_error;

define_port_error! {
    pub enum ThrottleStoreError {
        Backend { message: String } => "throttle store failed: {message}",
    }
}

/// Requests allowed per period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: u32,
    pub period: Duration,
}

impl Quota {
    pub fn per_sec(limit: u32) -> Self {
        Self {
            limit,
            period: Duration::from_secs(1),
        }
    }

    pub fn per_min(limit: u32) -> Self {
        Self {
            limit,
            period: Duration::from_secs(60),
        }
    }

    pub fn per_hour(limit: u32) -> Self {
        Self {
            limit,
            period: Duration::from_secs(3600),
        }
    }
}

/// Result of charging a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleDecision {
    pub limited: bool,
    pub remaining: u32,
    /// How long until enough tokens are available again.
    pub retry_after: Duration,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ThrottleStore: Send + Sync {
    /// Take `cost` tokens from the bucket behind `key`.
    async fn acquire(
        &self,
        key: &str,
        quota: Quota,
        cost: u32,
    ) -> Result<ThrottleDecision, ThrottleStoreError>;
}
