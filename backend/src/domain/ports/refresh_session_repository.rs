//! Port for refresh session storage.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::RefreshSession;

use super::define_port_error;

define_port_error! {
    /// Persistence errors raised by refresh session adapters.
    pub enum RefreshSessionPersistenceError {
        Connection { message: String } => "refresh session repository connection failed: {message}",
        Query { message: String } => "refresh session repository query failed: {message}",
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RefreshSessionRepository: Send + Sync {
    async fn insert(&self, session: &RefreshSession) -> Result<(), RefreshSessionPersistenceError>;

    /// Look up a session by token fingerprint.
    ///
    /// SQL adapters lock the row for the rest of the ambient transaction so
    /// that concurrent rotations of one token serialise.
    async fn find_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshSession>, RefreshSessionPersistenceError>;

    async fn revoke(
        &self,
        id: Uuid,
        revoked_at: DateTime<Utc>,
    ) -> Result<(), RefreshSessionPersistenceError>;
}
