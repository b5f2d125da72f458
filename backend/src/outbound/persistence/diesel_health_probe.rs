//! Database reachability check backing the health endpoint.

use async_trait::async_trait;
use diesel_async::RunQueryDsl;

use crate::domain::ports::{HealthProbe, HealthProbeError};

use super::pool::DbPool;

/// Runs `SELECT 1` on a pooled connection.
#[derive(Debug, Clone)]
pub struct DieselHealthProbe {
    pool: DbPool,
}

impl DieselHealthProbe {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthProbe for DieselHealthProbe {
    async fn check(&self) -> Result<(), HealthProbeError> {
        let mut conn = self
            .pool
            .connection()
            .await
            .map_err(|err| HealthProbeError::unavailable(err.message()))?;
        diesel::sql_query("SELECT 1")
            .execute(&mut *conn)
            .await
            .map_err(|err| HealthProbeError::unavailable(err.to_string()))?;
        Ok(())
    }
}
