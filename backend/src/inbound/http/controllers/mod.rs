//! HTTP controllers.
//!
//! Each controller owns its collaborators and route dependencies, lists its
//! operations once and attaches them to a [`RouteTable`](super::RouteTable).
//! Service failures travel as [`HttpError`](super::HttpError) and are
//! translated to client payloads by the controller's `handle_error`.

pub mod health;
pub mod todos;
pub mod user_tokens;
pub mod users;

pub use health::HealthController;
pub use todos::TodoController;
pub use user_tokens::UserTokenController;
pub use users::UserController;
