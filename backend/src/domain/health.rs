//! Readiness checks for backing services.

use std::sync::Arc;

use super::ports::{HealthProbe, HealthProbeError};

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("database is unavailable")]
    Database(#[source] HealthProbeError),
}

#[derive(Clone)]
pub struct HealthService {
    database: Arc<dyn HealthProbe>,
}

impl HealthService {
    pub fn new(database: Arc<dyn HealthProbe>) -> Self {
        Self { database }
    }

    pub async fn check(&self) -> Result<(), HealthError> {
        self.database.check().await.map_err(HealthError::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::MockHealthProbe;
    use rstest::rstest;

    #[rstest]
    #[tokio::test]
    async fn failing_health_check_reports_database() {
        let mut health = MockHealthProbe::new();
        health
            .expect_check()
            .returning(|| Err(HealthProbeError::unavailable("timeout")));

        let err = HealthService::new(Arc::new(health))
            .check()
            .await
            .expect_err("check fails");
        assert!(matches!(err, HealthError::Database(_)));
    }
}
