//! Domain primitives, services, and the ports they depend on.
//!
//! Purpose: keep business rules independent of delivery (HTTP, tasks) and of
//! storage (Diesel, memory). Services receive their collaborators as trait
//! objects defined under [`ports`].
//!
//! Public surface:
//! - Error / ErrorCode: transport error payload produced by controllers.
//! - TraceId: task-local correlation identifier.
//! - User, Todo: aggregates and their validated value types.
//! - UserService, JwtService, RefreshSessionService, TodoService,
//!   HealthService: business operations invoked by controllers.

pub mod error;
pub mod health;
pub mod jwt;
pub mod password;
pub mod ports;
pub mod refresh_session;
pub mod todo;
pub mod todo_service;
pub mod trace_id;
pub mod user;
pub mod user_service;

pub use self::error::{Error, ErrorCode, ErrorValidationError, TRACE_ID_HEADER};
pub use self::health::{HealthError, HealthService};
pub use self::jwt::{AccessClaims, JwtError, JwtService};
pub use self::password::{PasswordHasher, PasswordPolicy};
pub use self::refresh_session::{
    IssuedRefreshSession, RefreshSession, RefreshSessionError, RefreshSessionService,
    RefreshTokenError,
};
pub use self::todo::{NewTodo, Todo, TodoChanges, TodoId, TodoValidationError};
pub use self::todo_service::{TodoService, TodoServiceError};
pub use self::trace_id::TraceId;
pub use self::user::{EmailAddress, NewUser, User, UserId, UserValidationError, Username};
pub use self::user_service::{CreateUser, UserService, UserServiceError};

/// Convenient result alias for operations that fail with a transport error.
///
/// # Examples
/// ```
/// use scaffold::domain::{ApiResult, Error};
///
/// fn handler() -> ApiResult<()> {
///     Err(Error::forbidden("nope"))
/// }
/// ```
pub type ApiResult<T> = Result<T, Error>;
