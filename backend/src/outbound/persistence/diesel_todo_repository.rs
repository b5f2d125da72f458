//! PostgreSQL-backed `TodoRepository`.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::domain::ports::{TodoPersistenceError, TodoRepository};
use crate::domain::{NewTodo, Todo, TodoId, UserId};

use super::diesel_error_mapping::{map_diesel_error, map_pool_error};
use super::models::{NewTodoRow, TodoRow, TodoUpdate};
use super::pool::{DbConnection, DbPool};
use super::schema::todos;

#[derive(Debug, Clone)]
pub struct DieselTodoRepository {
    pool: DbPool,
}

impl DieselTodoRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn connection(&self) -> Result<DbConnection, TodoPersistenceError> {
        self.pool
            .connection()
            .await
            .map_err(|err| map_pool_error(err, TodoPersistenceError::connection))
    }
}

fn map_error(error: diesel::result::Error) -> TodoPersistenceError {
    map_diesel_error(
        error,
        TodoPersistenceError::query,
        TodoPersistenceError::connection,
    )
}

#[async_trait]
impl TodoRepository for DieselTodoRepository {
    async fn list_for_owner(&self, owner: UserId) -> Result<Vec<Todo>, TodoPersistenceError> {
        let mut conn = self.connection().await?;
        let rows: Vec<TodoRow> = todos::table
            .filter(todos::owner_id.eq(owner.get()))
            .order(todos::id)
            .select(TodoRow::as_select())
            .load(&mut *conn)
            .await
            .map_err(map_error)?;
        Ok(rows.into_iter().map(Todo::from).collect())
    }

    async fn insert(&self, todo: NewTodo) -> Result<Todo, TodoPersistenceError> {
        let mut conn = self.connection().await?;
        let row: TodoRow = diesel::insert_into(todos::table)
            .values(NewTodoRow::from(&todo))
            .returning(TodoRow::as_returning())
            .get_result(&mut *conn)
            .await
            .map_err(map_error)?;
        Ok(row.into())
    }

    async fn find(&self, id: TodoId) -> Result<Option<Todo>, TodoPersistenceError> {
        let mut conn = self.connection().await?;
        let row = todos::table
            .find(id.get())
            .select(TodoRow::as_select())
            .first(&mut *conn)
            .await
            .optional()
            .map_err(map_error)?;
        Ok(row.map(Todo::from))
    }

    async fn update(&self, todo: &Todo) -> Result<(), TodoPersistenceError> {
        let mut conn = self.connection().await?;
        diesel::update(todos::table.find(todo.id.get()))
            .set(TodoUpdate::from(todo))
            .execute(&mut *conn)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn delete(&self, id: TodoId) -> Result<bool, TodoPersistenceError> {
        let mut conn = self.connection().await?;
        let deleted = diesel::delete(todos::table.find(id.get()))
            .execute(&mut *conn)
            .await
            .map_err(map_error)?;
        Ok(deleted > 0)
    }
}
