//! Token-bucket stores behind the [`ThrottleStore`] port.
//!
//! [`InMemoryThrottleStore`] keeps buckets per process. [`RedisThrottleStore`]
//! keeps them in Redis so every instance charges the same bucket; the
//! container picks it whenever `REDIS_URL` is set.
//!
//! [`ThrottleStore`]: crate::domain::ports::ThrottleStore

mod memory;
mod redis;

pub use memory::InMemoryThrottleStore;
pub use redis::{RedisThrottleConfig, RedisThrottleStore};
