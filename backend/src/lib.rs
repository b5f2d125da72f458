//! Layered backend: HTTP and task controllers over domain services and
//! Diesel-backed persistence.
//!
//! Controllers live under [`inbound`], business rules under [`domain`], and
//! adapters for PostgreSQL and in-memory storage under [`outbound`]. The
//! [`ioc::Container`] wires them together once per process.

pub mod config;
pub mod domain;
pub mod inbound;
pub mod ioc;
pub mod outbound;
pub mod telemetry;
#[cfg(test)]
pub(crate) mod test_support;

/// Request-scoped trace identifier shared by HTTP requests and task runs.
pub use domain::TraceId;
/// Tracing middleware stamping every HTTP response with a trace identifier.
pub use inbound::http::trace::Trace;
