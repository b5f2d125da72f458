//! Task controllers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Environment;
use crate::inbound::controller::{
    Controller, Operation, OperationWrapper, ReadyController, RegistrationError,
};
use crate::telemetry::TelemetryConfigurator;

use super::registry::{TaskError, TaskName, TaskRegistry};

/// Service name reported by worker telemetry.
pub const WORKER_SERVICE_NAME: &str = "task-worker";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResult {
    pub result: String,
}

/// Liveness task: answers `pong`.
#[derive(Debug, Default)]
pub struct PingController;

pub struct PingOperations {
    pub ping: Operation<(), PingResult, TaskError>,
}

impl Controller for PingController {
    type Error = TaskError;
    type Registry = TaskRegistry;
    type Operations = PingOperations;

    fn operations(wrap: &OperationWrapper<Self>) -> PingOperations {
        PingOperations {
            ping: wrap.wrap("ping", |_: Arc<Self>, (): ()| async {
                Ok(PingResult {
                    result: "pong".into(),
                })
            }),
        }
    }

    fn register(
        ready: &ReadyController<Self>,
        tasks: &mut TaskRegistry,
    ) -> Result<(), RegistrationError> {
        tasks.add_task(TaskName::Ping.as_str(), &ready.operations().ping)
    }
}

/// Worker lifecycle hooks.
pub struct WorkerEvents {
    telemetry: TelemetryConfigurator,
    version: String,
    environment: Environment,
}

impl WorkerEvents {
    pub fn new(
        telemetry: TelemetryConfigurator,
        version: impl Into<String>,
        environment: Environment,
    ) -> Self {
        Self {
            telemetry,
            version: version.into(),
            environment,
        }
    }
}

pub struct WorkerEventOperations {
    pub worker_init: Operation<(), (), TaskError>,
}

impl Controller for WorkerEvents {
    type Error = TaskError;
    type Registry = TaskRegistry;
    type Operations = WorkerEventOperations;

    fn operations(wrap: &OperationWrapper<Self>) -> WorkerEventOperations {
        WorkerEventOperations {
            worker_init: wrap.wrap("worker_init", |this: Arc<Self>, (): ()| async move {
                if let Err(err) =
                    this.telemetry
                        .configure(WORKER_SERVICE_NAME, &this.version, this.environment)
                {
                    debug!(error = %err, "keeping the existing tracing subscriber");
                }
                Ok(())
            }),
        }
    }

    fn register(
        ready: &ReadyController<Self>,
        tasks: &mut TaskRegistry,
    ) -> Result<(), RegistrationError> {
        tasks.on_worker_init(&ready.operations().worker_init)
    }
}
