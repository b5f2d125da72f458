//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! - **persistence**: PostgreSQL-backed repositories and transactions using
//!   Diesel ORM
//! - **memory**: process-local repositories with the same transactional
//!   behaviour, used when no database is configured and in tests
//! - **throttle**: token buckets for request rate limiting, held in process
//!   or shared through Redis
//!
//! Adapters are thin translators that convert between domain types and
//! infrastructure-specific representations. They contain no business logic.

pub mod memory;
pub mod persistence;
pub mod throttle;
