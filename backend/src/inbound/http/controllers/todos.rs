//! Owner-scoped todo endpoints. Every route requires an access token.

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::web;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Error, Todo, TodoChanges, TodoId, TodoService, TodoServiceError};
use crate::inbound::controller::{
    Controller, Operation, OperationWrapper, ReadyController, RegistrationError,
};

use super::super::auth::{AuthenticatedUser, JwtAuth, JwtAuthFactory};
use super::super::error::HttpError;
use super::super::routes::{Route, RouteTable};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateTodoRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoSchema {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Todo> for TodoSchema {
    fn from(todo: Todo) -> Self {
        Self {
            id: todo.id.get(),
            title: todo.title,
            description: todo.description,
            completed: todo.completed,
            created_at: todo.created_at,
            updated_at: todo.updated_at,
        }
    }
}

type Owned<T> = (AuthenticatedUser, T);

pub struct TodoController {
    todos: Arc<TodoService>,
    auth: Arc<JwtAuth>,
}

impl TodoController {
    pub fn new(todos: Arc<TodoService>, auth: &JwtAuthFactory) -> Self {
        Self {
            todos,
            auth: auth.authenticate(),
        }
    }
}

pub struct TodoOperations {
    pub list_todos: Operation<AuthenticatedUser, web::Json<Vec<TodoSchema>>, HttpError>,
    pub create_todo: Operation<
        Owned<web::Json<CreateTodoRequest>>,
        (web::Json<TodoSchema>, StatusCode),
        HttpError,
    >,
    pub get_todo: Operation<Owned<web::Path<i64>>, web::Json<TodoSchema>, HttpError>,
    pub update_todo: Operation<
        Owned<(web::Path<i64>, web::Json<TodoChanges>)>,
        web::Json<TodoSchema>,
        HttpError,
    >,
    pub delete_todo: Operation<Owned<web::Path<i64>>, StatusCode, HttpError>,
}

impl Controller for TodoController {
    type Error = HttpError;
    type Registry = RouteTable;
    type Operations = TodoOperations;

    fn operations(wrap: &OperationWrapper<Self>) -> TodoOperations {
        TodoOperations {
            list_todos: wrap.wrap(
                "list_todos",
                |this: Arc<Self>, user: AuthenticatedUser| async move {
                    let todos = this.todos.list(user.0.id).await?;
                    Ok(web::Json(todos.into_iter().map(TodoSchema::from).collect()))
                },
            ),
            create_todo: wrap.wrap(
                "create_todo",
                |this: Arc<Self>, (user, web::Json(body)): Owned<web::Json<CreateTodoRequest>>| async move {
                    let todo = this
                        .todos
                        .create(user.0.id, body.title, body.description)
                        .await?;
                    Ok((web::Json(TodoSchema::from(todo)), StatusCode::CREATED))
                },
            ),
            get_todo: wrap.wrap(
                "get_todo",
                |this: Arc<Self>, (user, id): Owned<web::Path<i64>>| async move {
                    let todo = this
                        .todos
                        .get(user.0.id, TodoId::new(id.into_inner()))
                        .await?;
                    Ok(web::Json(TodoSchema::from(todo)))
                },
            ),
            update_todo: wrap.wrap(
                "update_todo",
                |this: Arc<Self>,
                 (user, (id, web::Json(changes))): Owned<(
                    web::Path<i64>,
                    web::Json<TodoChanges>,
                )>| async move {
                    let todo = this
                        .todos
                        .update(user.0.id, TodoId::new(id.into_inner()), changes)
                        .await?;
                    Ok(web::Json(TodoSchema::from(todo)))
                },
            ),
            delete_todo: wrap.wrap(
                "delete_todo",
                |this: Arc<Self>, (user, id): Owned<web::Path<i64>>| async move {
                    this.todos
                        .delete(user.0.id, TodoId::new(id.into_inner()))
                        .await?;
                    Ok(StatusCode::NO_CONTENT)
                },
            ),
        }
    }

    fn register(
        ready: &ReadyController<Self>,
        routes: &mut RouteTable,
    ) -> Result<(), RegistrationError> {
        let auth = &ready.controller().auth;
        let operations = ready.operations();
        let route = |route: Route| route.depends_on(auth.clone());
        routes.add_route(route(Route::get("/v1/todos/")), &operations.list_todos)?;
        routes.add_route(route(Route::post("/v1/todos/")), &operations.create_todo)?;
        routes.add_route(route(Route::get("/v1/todos/{todo_id}")), &operations.get_todo)?;
        routes.add_route(
            route(Route::patch("/v1/todos/{todo_id}")),
            &operations.update_todo,
        )?;
        routes.add_route(
            route(Route::delete("/v1/todos/{todo_id}")),
            &operations.delete_todo,
        )
    }

    fn handle_error(&self, error: HttpError) -> HttpError {
        match error {
            HttpError::Todos(TodoServiceError::NotFound { .. }) => {
                Error::not_found("Todo not found").into()
            }
            HttpError::Todos(TodoServiceError::Validation(err)) => {
                Error::invalid_request(err.to_string()).into()
            }
            other => other,
        }
    }
}
