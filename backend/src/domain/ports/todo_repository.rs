//! Port for todo storage.
use async_trait::async_trait;

use crate::domain::{NewTodo, Todo, TodoId, UserId};

use super::define_port_error;

define_port_error! {
    /// Persistence errors raised by todo adapters.
    pub enum TodoPersistenceError {
        Connection { message: String } => "todo repository connection failed: {message}",
        Query { message: String } => "todo repository query failed: {message}",
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TodoRepository: Send + Sync {
    /// Todos owned by `owner`, oldest first.
    async fn list_for_owner(&self, owner: UserId) -> Result<Vec<Todo>, TodoPersistenceError>;

    async fn insert(&self, todo: NewTodo) -> Result<Todo, TodoPersistenceError>;

    async fn find(&self, id: TodoId) -> Result<Option<Todo>, TodoPersistenceError>;

    async fn update(&self, todo: &Todo) -> Result<(), TodoPersistenceError>;

    /// Returns `false` when nothing was deleted.
    async fn delete(&self, id: TodoId) -> Result<bool, TodoPersistenceError>;
}
