//! Task delivery: controllers exposed as named background tasks.
//!
//! ```text
//! TasksClient::ping -> TaskQueue -> Worker -> TaskRegistry -> PingController
//! ```

pub mod controllers;
pub mod queue;
pub mod registry;
pub mod worker;

pub use controllers::{PingController, PingResult, WorkerEvents};
pub use queue::{TaskMessage, TaskQueue, TaskReceiver, TasksClient};
pub use registry::{TaskError, TaskName, TaskRegistry};
pub use worker::Worker;
