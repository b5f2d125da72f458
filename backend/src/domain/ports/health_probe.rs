//! Port used by the health service to check backing stores.
use async_trait::async_trait;

use super::define_port_error;

define_port_error! {
    pub enum HealthProbeError {
        Unavailable { message: String } => "dependency unavailable: {message}",
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Succeeds when the dependency answers a trivial query.
    async fn check(&self) -> Result<(), HealthProbeError>;
}

/// Health check for process-local stores that are always reachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysHealthy;

#[async_trait]
impl HealthProbe for AlwaysHealthy {
    async fn check(&self) -> Result<(), HealthProbeError> {
        Ok(())
    }
}
