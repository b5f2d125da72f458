//! In-process task queue.
//!
//! A [`TaskQueue`] is created once at startup and cloned into every producer;
//! the matching [`TaskReceiver`] is handed to a single
//! [`Worker`](super::Worker). Messages carry the producer's trace id so the
//! worker can restore it while the task runs.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::domain::TraceId;

use super::controllers::PingResult;
use super::registry::{TaskError, TaskName};

pub(crate) type Reply = oneshot::Sender<Result<Value, TaskError>>;

/// One queued task invocation.
#[derive(Debug)]
pub struct TaskMessage {
    pub name: &'static str,
    pub payload: Value,
    pub trace_id: Option<TraceId>,
    pub(crate) reply: Option<Reply>,
}

/// Producer handle; cheap to clone.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    sender: mpsc::Sender<TaskMessage>,
}

/// Consumer end of a [`TaskQueue`].
#[derive(Debug)]
pub struct TaskReceiver {
    pub(crate) receiver: mpsc::Receiver<TaskMessage>,
}

impl TaskQueue {
    /// Queue holding at most `capacity` pending messages; producers wait
    /// for space when it is full.
    pub fn bounded(capacity: usize) -> (Self, TaskReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, TaskReceiver { receiver })
    }

    fn message(
        name: &'static str,
        payload: impl Serialize,
        reply: Option<Reply>,
    ) -> Result<TaskMessage, TaskError> {
        let payload = serde_json::to_value(payload).map_err(|err| TaskError::Payload {
            name: name.into(),
            message: err.to_string(),
        })?;
        Ok(TaskMessage {
            name,
            payload,
            trace_id: TraceId::current(),
            reply,
        })
    }

    /// Fire and forget.
    pub async fn enqueue(
        &self,
        name: &'static str,
        payload: impl Serialize,
    ) -> Result<(), TaskError> {
        let message = Self::message(name, payload, None)?;
        self.sender
            .send(message)
            .await
            .map_err(|_| TaskError::QueueClosed)?;
        debug!(task = name, "task enqueued");
        Ok(())
    }

    /// Enqueue and wait for the task's result.
    pub async fn call<R: DeserializeOwned>(
        &self,
        name: &'static str,
        payload: impl Serialize,
    ) -> Result<R, TaskError> {
        let (reply, response) = oneshot::channel();
        let message = Self::message(name, payload, Some(reply))?;
        self.sender
            .send(message)
            .await
            .map_err(|_| TaskError::QueueClosed)?;
        let value = response.await.map_err(|_| TaskError::NoReply {
            name: name.into(),
        })??;
        serde_json::from_value(value).map_err(|err| TaskError::Payload {
            name: name.into(),
            message: err.to_string(),
        })
    }
}

/// Typed accessors for the registered tasks.
#[derive(Debug, Clone)]
pub struct TasksClient {
    queue: TaskQueue,
}

impl TasksClient {
    pub fn new(queue: TaskQueue) -> Self {
        Self { queue }
    }

    /// Round trip through the worker; answers `pong` once it is serving.
    pub async fn ping(&self) -> Result<PingResult, TaskError> {
        self.queue.call(TaskName::Ping.as_str(), ()).await
    }

    /// The underlying queue, for tasks without a typed accessor.
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }
}
