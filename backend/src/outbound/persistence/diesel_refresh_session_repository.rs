//! PostgreSQL-backed `RefreshSessionRepository`.
//!
//! Lookups by token fingerprint take a row lock (`FOR UPDATE`) that lasts
//! until the ambient transaction settles, so two requests rotating the same
//! refresh token cannot both succeed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::domain::RefreshSession;
use crate::domain::ports::{RefreshSessionPersistenceError, RefreshSessionRepository};

use super::diesel_error_mapping::{map_diesel_error, map_pool_error};
use super::models::RefreshSessionRow;
use super::pool::DbPool;
use super::schema::refresh_sessions;

#[derive(Debug, Clone)]
pub struct DieselRefreshSessionRepository {
    pool: DbPool,
}

impl DieselRefreshSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_error(error: diesel::result::Error) -> RefreshSessionPersistenceError {
    map_diesel_error(
        error,
        RefreshSessionPersistenceError::query,
        RefreshSessionPersistenceError::connection,
    )
}

#[async_trait]
impl RefreshSessionRepository for DieselRefreshSessionRepository {
    async fn insert(&self, session: &RefreshSession) -> Result<(), RefreshSessionPersistenceError> {
        let mut conn = self
            .pool
            .connection()
            .await
            .map_err(|err| map_pool_error(err, RefreshSessionPersistenceError::connection))?;

        diesel::insert_into(refresh_sessions::table)
            .values(RefreshSessionRow::from(session))
            .execute(&mut *conn)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn find_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshSession>, RefreshSessionPersistenceError> {
        let mut conn = self
            .pool
            .connection()
            .await
            .map_err(|err| map_pool_error(err, RefreshSessionPersistenceError::connection))?;

        let row = refresh_sessions::table
            .filter(refresh_sessions::token_hash.eq(token_hash))
            .select(RefreshSessionRow::as_select())
            .for_update()
            .first(&mut *conn)
            .await
            .optional()
            .map_err(map_error)?;
        Ok(row.map(RefreshSession::from))
    }

    async fn revoke(
        &self,
        id: Uuid,
        revoked_at: DateTime<Utc>,
    ) -> Result<(), RefreshSessionPersistenceError> {
        let mut conn = self
            .pool
            .connection()
            .await
            .map_err(|err| map_pool_error(err, RefreshSessionPersistenceError::connection))?;

        diesel::update(
            refresh_sessions::table
                .find(id)
                .filter(refresh_sessions::revoked_at.is_null()),
        )
        .set(refresh_sessions::revoked_at.eq(revoked_at))
        .execute(&mut *conn)
        .await
        .map_err(map_error)?;
        Ok(())
    }
}
