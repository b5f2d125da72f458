//! Process-local adapters used when no database is configured and in tests.
//!
//! They honour the same transaction semantics as the Diesel adapters: reads
//! and writes made inside a transaction see its private working copy and
//! only become visible to others on commit.

mod repositories;
mod store;

pub use repositories::{MemoryRefreshSessionRepository, MemoryTodoRepository, MemoryUserRepository};
pub use store::{MemoryStore, MemoryTransactionScope};
