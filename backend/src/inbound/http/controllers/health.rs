//! Liveness and readiness endpoint.

use std::sync::Arc;

use actix_web::web;
use serde::Serialize;
use tracing::warn;

use crate::domain::{Error, HealthService};
use crate::inbound::controller::{
    Controller, Operation, OperationWrapper, ReadyController, RegistrationError,
};

use super::super::error::HttpError;
use super::super::routes::{Route, RouteTable};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

pub struct HealthController {
    health: Arc<HealthService>,
}

impl HealthController {
    pub fn new(health: Arc<HealthService>) -> Self {
        Self { health }
    }
}

pub struct HealthOperations {
    pub health_check: Operation<(), web::Json<HealthStatus>, HttpError>,
}

impl Controller for HealthController {
    type Error = HttpError;
    type Registry = RouteTable;
    type Operations = HealthOperations;

    fn operations(wrap: &OperationWrapper<Self>) -> HealthOperations {
        HealthOperations {
            health_check: wrap.wrap("health_check", |this: Arc<Self>, (): ()| async move {
                this.health.check().await?;
                Ok(web::Json(HealthStatus { status: "ok" }))
            }),
        }
    }

    fn register(
        ready: &ReadyController<Self>,
        routes: &mut RouteTable,
    ) -> Result<(), RegistrationError> {
        routes.add_route(Route::get("/v1/health"), &ready.operations().health_check)
    }

    fn handle_error(&self, error: HttpError) -> HttpError {
        match error {
            HttpError::Health(err) => {
                warn!(error = %err, "health check failed");
                Error::service_unavailable("Service unavailable").into()
            }
            other => other,
        }
    }
}
