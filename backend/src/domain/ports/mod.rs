//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod health_probe;
mod refresh_session_repository;
mod throttle_store;
mod todo_repository;
mod transaction;
mod user_repository;

#[cfg(test)]
pub use health_probe::MockHealthProbe;
pub use health_probe::{AlwaysHealthy, HealthProbe, HealthProbeError};
#[cfg(test)]
pub use refresh_session_repository::MockRefreshSessionRepository;
pub use refresh_session_repository::{RefreshSessionPersistenceError, RefreshSessionRepository};
#[cfg(test)]
pub use throttle_store::MockThrottleStore;
pub use throttle_store::{Quota, ThrottleDecision, ThrottleStore, ThrottleStoreError};
#[cfg(test)]
pub use todo_repository::MockTodoRepository;
pub use todo_repository::{TodoPersistenceError, TodoRepository};
pub use transaction::{Transaction, TransactionContext, TransactionError, TransactionScope};
#[cfg(test)]
pub use user_repository::MockUserRepository;
pub use user_repository::{UserPersistenceError, UserRepository};
