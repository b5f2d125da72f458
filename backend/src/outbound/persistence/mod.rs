//! PostgreSQL persistence adapters using Diesel ORM.
//!
//! Repository implementations translate between Diesel rows and domain
//! types and keep no business logic. Row structs (`models.rs`) and table
//! definitions (`schema.rs`) stay private to this module.
//!
//! Every adapter sharing a [`DbPool`] joins the transaction opened by a
//! [`DieselTransactionScope`] on that pool while it is ambient.
//!
//! # Example
//!
//! ```no_run
//! use scaffold::outbound::persistence::{DbPool, DieselUserRepository, PoolConfig};
//!
//! # async fn build() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = DbPool::new(PoolConfig::new("postgres://localhost/mydb")).await?;
//! let users = DieselUserRepository::new(pool);
//! # Ok(())
//! # }
//! ```

mod diesel_error_mapping;
mod diesel_health_probe;
mod diesel_refresh_session_repository;
mod diesel_todo_repository;
mod diesel_user_repository;
mod migrations;
mod models;
mod pool;
mod schema;
mod transaction;

pub use diesel_health_probe::DieselHealthProbe;
pub use diesel_refresh_session_repository::DieselRefreshSessionRepository;
pub use diesel_todo_repository::DieselTodoRepository;
pub use diesel_user_repository::DieselUserRepository;
pub use migrations::{MigrationError, run_migrations};
pub use pool::{DbConnection, DbPool, PoolConfig, PoolError};
pub use transaction::{DieselTransactionScope, TransactionConnection};
