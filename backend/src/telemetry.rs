//! Process-wide tracing subscriber setup.
//!
//! Deployed environments log JSON; local, test and CI runs get the compact
//! human-readable format. `RUST_LOG` drives the filter, falling back to
//! `info`.

use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::Environment;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("tracing subscriber already initialised: {message}")]
    AlreadyInitialised { message: String },
}

/// Installs the global subscriber for one service.
#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryConfigurator;

impl TelemetryConfigurator {
    pub fn new() -> Self {
        Self
    }

    pub fn configure(
        &self,
        service_name: &str,
        service_version: &str,
        environment: Environment,
    ) -> Result<(), TelemetryError> {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let installed = if environment.is_deployed() {
            fmt().with_env_filter(filter).json().try_init()
        } else {
            fmt().with_env_filter(filter).compact().try_init()
        };
        installed.map_err(|err| TelemetryError::AlreadyInitialised {
            message: err.to_string(),
        })?;
        info!(
            service.name = service_name,
            service.version = service_version,
            environment = %environment,
            "telemetry configured"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn second_configuration_is_rejected() {
        let configurator = TelemetryConfigurator::new();
        // Another test may already own the global subscriber.
        let _ = configurator.configure("test", "0.0.0", Environment::Test);

        let err = configurator
            .configure("test", "0.0.0", Environment::Test)
            .expect_err("already initialised");
        assert!(matches!(err, TelemetryError::AlreadyInitialised { .. }));
    }
}
