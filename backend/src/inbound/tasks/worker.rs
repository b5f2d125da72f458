//! Task worker: drains a [`TaskReceiver`] with bounded concurrency.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::domain::TraceId;

use super::queue::{TaskMessage, TaskReceiver};
use super::registry::{TaskError, TaskRegistry};

/// Runs registered tasks from one queue.
pub struct Worker {
    registry: Arc<TaskRegistry>,
    concurrency: usize,
}

impl Worker {
    /// A worker running at most `concurrency` tasks at once; zero is
    /// treated as one.
    pub fn new(registry: Arc<TaskRegistry>, concurrency: usize) -> Self {
        Self {
            registry,
            concurrency: concurrency.max(1),
        }
    }

    /// Run the init hooks, then process messages until every
    /// [`TaskQueue`](super::TaskQueue) handle is dropped.
    ///
    /// In-flight tasks are awaited before returning.
    pub async fn run(self, mut tasks: TaskReceiver) -> Result<(), TaskError> {
        self.registry.run_worker_init().await?;
        info!(concurrency = self.concurrency, "task worker started");

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut running = JoinSet::new();
        while let Some(message) = tasks.receiver.recv().await {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let registry = Arc::clone(&self.registry);
            running.spawn(async move {
                process(&registry, message).await;
                drop(permit);
            });
            while let Some(outcome) = running.try_join_next() {
                report(outcome);
            }
        }
        while let Some(outcome) = running.join_next().await {
            report(outcome);
        }
        info!("task worker stopped");
        Ok(())
    }
}

fn report(outcome: Result<(), JoinError>) {
    if let Err(err) = outcome {
        error!(error = %err, "task panicked");
    }
}

async fn process(registry: &TaskRegistry, message: TaskMessage) {
    let TaskMessage {
        name,
        payload,
        trace_id,
        reply,
    } = message;
    let trace_id = trace_id.unwrap_or_else(TraceId::generate);
    let span = info_span!("task", task = name, trace_id = %trace_id);

    let outcome = TraceId::scope(trace_id, registry.dispatch(name, payload))
        .instrument(span)
        .await;
    match &outcome {
        Ok(_) => debug!(task = name, %trace_id, "task completed"),
        Err(err) => warn!(task = name, %trace_id, error = %err, "task failed"),
    }
    if let Some(reply) = reply {
        if reply.send(outcome).is_err() {
            debug!(task = name, "caller stopped waiting for the result");
        }
    }
}
