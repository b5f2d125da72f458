//! Internal Diesel row structs for database operations.
//!
//! These types are implementation details of the persistence layer and must
//! never be exposed to the domain. Conversions back into domain types
//! revalidate stored values and report failures as plain messages.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use super::schema::{refresh_sessions, todos, users};
use crate::domain::{
    EmailAddress, NewTodo, NewUser, RefreshSession, Todo, TodoId, User, UserId, Username,
};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub is_active: bool,
    pub date_joined: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = String;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let username = Username::new(row.username)
            .map_err(|err| format!("stored username for user {} is invalid: {err}", row.id))?;
        let email = EmailAddress::new(&row.email)
            .map_err(|err| format!("stored email for user {} is invalid: {err}", row.id))?;
        Ok(User {
            id: UserId::new(row.id),
            username,
            email,
            first_name: row.first_name,
            last_name: row.last_name,
            password_hash: row.password,
            is_staff: row.is_staff,
            is_superuser: row.is_superuser,
            is_active: row.is_active,
            date_joined: row.date_joined,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub(crate) struct NewUserRow<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub password: &'a str,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub is_active: bool,
    pub date_joined: DateTime<Utc>,
}

impl<'a> From<&'a NewUser> for NewUserRow<'a> {
    fn from(user: &'a NewUser) -> Self {
        Self {
            username: user.username.as_str(),
            email: user.email.as_str(),
            first_name: &user.first_name,
            last_name: &user.last_name,
            password: &user.password_hash,
            is_staff: user.is_staff,
            is_superuser: user.is_superuser,
            is_active: true,
            date_joined: user.date_joined,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = refresh_sessions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct RefreshSessionRow {
    pub id: Uuid,
    pub user_id: i64,
    pub token_hash: String,
    pub user_agent: String,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl From<RefreshSessionRow> for RefreshSession {
    fn from(row: RefreshSessionRow) -> Self {
        Self {
            id: row.id,
            user_id: UserId::new(row.user_id),
            token_hash: row.token_hash,
            user_agent: row.user_agent,
            ip_address: row.ip_address,
            created_at: row.created_at,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
        }
    }
}

impl From<&RefreshSession> for RefreshSessionRow {
    fn from(session: &RefreshSession) -> Self {
        Self {
            id: session.id,
            user_id: session.user_id.get(),
            token_hash: session.token_hash.clone(),
            user_agent: session.user_agent.clone(),
            ip_address: session.ip_address.clone(),
            created_at: session.created_at,
            expires_at: session.expires_at,
            revoked_at: session.revoked_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = todos)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct TodoRow {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TodoRow> for Todo {
    fn from(row: TodoRow) -> Self {
        Self {
            id: TodoId::new(row.id),
            owner: UserId::new(row.owner_id),
            title: row.title,
            description: row.description,
            completed: row.completed,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = todos)]
pub(crate) struct NewTodoRow<'a> {
    pub owner_id: i64,
    pub title: &'a str,
    pub description: &'a str,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'a> From<&'a NewTodo> for NewTodoRow<'a> {
    fn from(todo: &'a NewTodo) -> Self {
        Self {
            owner_id: todo.owner.get(),
            title: &todo.title,
            description: &todo.description,
            completed: false,
            created_at: todo.created_at,
            updated_at: todo.created_at,
        }
    }
}

/// Columns a todo update may touch.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = todos)]
pub(crate) struct TodoUpdate<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

impl<'a> From<&'a Todo> for TodoUpdate<'a> {
    fn from(todo: &'a Todo) -> Self {
        Self {
            title: &todo.title,
            description: &todo.description,
            completed: todo.completed,
            updated_at: todo.updated_at,
        }
    }
}
