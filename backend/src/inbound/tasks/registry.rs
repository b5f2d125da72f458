//! Task registry: the delivery registry for background task controllers.
//!
//! Tasks are addressed by name and exchange JSON payloads. Worker lifecycle
//! hooks share the namespace, so a task cannot be registered under a hook
//! name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::inbound::controller::{Operation, RegistrationError};

/// Names reserved for worker lifecycle hooks.
pub const WORKER_INIT: &str = "worker_init";

const RESERVED: &[&str] = &[WORKER_INIT];

/// Tasks known to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskName {
    Ping,
}

impl TaskName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
        }
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("no task registered as `{name}`")]
    UnknownTask { name: String },
    #[error("invalid payload for `{name}`: {message}")]
    Payload { name: String, message: String },
    #[error("task `{name}` failed: {message}")]
    Failed { name: String, message: String },
    #[error("task queue is closed")]
    QueueClosed,
    #[error("task `{name}` was dropped before replying")]
    NoReply { name: String },
}

type TaskHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, TaskError>> + Send + Sync>;
type Hook = Arc<dyn Fn() -> BoxFuture<'static, Result<(), TaskError>> + Send + Sync>;

/// Handlers by task name plus worker hooks, in registration order.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<&'static str, TaskHandler>,
    worker_init: Vec<(&'static str, Hook)>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `operation` as the task `name` (see [`TaskName::as_str`]).
    ///
    /// The payload is decoded into the operation's argument type and its
    /// result encoded back to JSON.
    pub fn add_task<A, T, E>(
        &mut self,
        name: &'static str,
        operation: &Operation<A, T, E>,
    ) -> Result<(), RegistrationError>
    where
        A: DeserializeOwned + Send + 'static,
        T: Serialize + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        if RESERVED.contains(&name) {
            return Err(RegistrationError::Reserved { name: name.into() });
        }
        if self.tasks.contains_key(name) {
            return Err(RegistrationError::Duplicate { name: name.into() });
        }
        debug!(task = name, operation = operation.name(), "task attached");

        let operation = operation.clone();
        let handler = move |payload: Value| -> BoxFuture<'static, Result<Value, TaskError>> {
            let args = match serde_json::from_value::<A>(payload) {
                Ok(args) => args,
                Err(err) => {
                    return Box::pin(futures_util::future::ready(Err(TaskError::Payload {
                        name: name.into(),
                        message: err.to_string(),
                    })));
                }
            };
            let call = operation.call(args);
            Box::pin(async move {
                let value = call.await.map_err(|err| TaskError::Failed {
                    name: name.into(),
                    message: err.to_string(),
                })?;
                serde_json::to_value(value).map_err(|err| TaskError::Payload {
                    name: name.into(),
                    message: err.to_string(),
                })
            })
        };
        self.tasks.insert(name, Arc::new(handler));
        Ok(())
    }

    /// Run `operation` once when a worker starts, before it takes tasks.
    pub fn on_worker_init<E>(
        &mut self,
        operation: &Operation<(), (), E>,
    ) -> Result<(), RegistrationError>
    where
        E: fmt::Display + Send + 'static,
    {
        let name = operation.name();
        if self.worker_init.iter().any(|(existing, _)| *existing == name) {
            return Err(RegistrationError::Duplicate {
                name: format!("{WORKER_INIT}:{name}"),
            });
        }
        let operation = operation.clone();
        let hook = move || -> BoxFuture<'static, Result<(), TaskError>> {
            let call = operation.call(());
            Box::pin(async move {
                call.await.map_err(|err| TaskError::Failed {
                    name: name.into(),
                    message: err.to_string(),
                })
            })
        };
        self.worker_init.push((name, Arc::new(hook)));
        Ok(())
    }

    /// Whether a task is registered as `name`. Worker hooks are not tasks.
    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Number of registered tasks, excluding worker hooks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run the task `name` with a JSON payload.
    pub async fn dispatch(&self, name: &str, payload: Value) -> Result<Value, TaskError> {
        let handler = self
            .tasks
            .get(name)
            .cloned()
            .ok_or_else(|| TaskError::UnknownTask { name: name.into() })?;
        handler(payload).await
    }

    /// Run every worker init hook in registration order, stopping at the
    /// first failure.
    pub async fn run_worker_init(&self) -> Result<(), TaskError> {
        for (name, hook) in &self.worker_init {
            debug!(hook = *name, "running worker init hook");
            hook().await?;
        }
        Ok(())
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tasks: Vec<_> = self.tasks.keys().collect();
        tasks.sort();
        f.debug_struct("TaskRegistry")
            .field("tasks", &tasks)
            .field("worker_init", &self.worker_init.len())
            .finish()
    }
}
