//! Owner-scoped todo operations.

use std::sync::Arc;

use mockable::Clock;

use super::ports::{TodoPersistenceError, TodoRepository};
use super::todo::validate_title;
use super::{NewTodo, Todo, TodoChanges, TodoId, TodoValidationError, UserId};

#[derive(Debug, thiserror::Error)]
pub enum TodoServiceError {
    /// Missing, or owned by another user.
    #[error("todo {id} not found")]
    NotFound { id: TodoId },
    #[error(transparent)]
    Validation(#[from] TodoValidationError),
    #[error(transparent)]
    Persistence(#[from] TodoPersistenceError),
}

#[derive(Clone)]
pub struct TodoService {
    todos: Arc<dyn TodoRepository>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl TodoService {
    pub fn new(todos: Arc<dyn TodoRepository>, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self { todos, clock }
    }

    pub async fn list(&self, owner: UserId) -> Result<Vec<Todo>, TodoServiceError> {
        Ok(self.todos.list_for_owner(owner).await?)
    }

    pub async fn create(
        &self,
        owner: UserId,
        title: String,
        description: String,
    ) -> Result<Todo, TodoServiceError> {
        validate_title(&title)?;
        let todo = self
            .todos
            .insert(NewTodo {
                owner,
                title,
                description,
                created_at: self.clock.utc(),
            })
            .await?;
        Ok(todo)
    }

    pub async fn get(&self, owner: UserId, id: TodoId) -> Result<Todo, TodoServiceError> {
        self.todos
            .find(id)
            .await?
            .filter(|todo| todo.owner == owner)
            .ok_or(TodoServiceError::NotFound { id })
    }

    pub async fn update(
        &self,
        owner: UserId,
        id: TodoId,
        changes: TodoChanges,
    ) -> Result<Todo, TodoServiceError> {
        if let Some(title) = changes.title.as_deref() {
            validate_title(title)?;
        }
        let mut todo = self.get(owner, id).await?;
        if changes.is_empty() {
            return Ok(todo);
        }
        changes.apply(&mut todo, self.clock.utc());
        self.todos.update(&todo).await?;
        Ok(todo)
    }

    pub async fn delete(&self, owner: UserId, id: TodoId) -> Result<(), TodoServiceError> {
        let todo = self.get(owner, id).await?;
        if self.todos.delete(todo.id).await? {
            Ok(())
        } else {
            Err(TodoServiceError::NotFound { id })
        }
    }
}
