//! HTTP delivery: controllers, route dependencies and app assembly.
//!
//! Controllers attach their wrapped operations to a [`RouteTable`]; the
//! [`ApiFactory`](factory::ApiFactory) mounts the table into an Actix `App`
//! behind the trace middleware.

pub mod auth;
pub mod controllers;
pub mod error;
pub mod factory;
pub mod request_info;
pub mod routes;
#[cfg(test)]
pub mod test_utils;
pub mod throttle;
pub mod trace;

pub use error::{ApiResult, HttpError};
pub use factory::ApiFactory;
pub use routes::{Route, RouteDependency, RouteTable};
