//! PostgreSQL-backed `UserRepository` implementation using Diesel ORM.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::domain::ports::{UserPersistenceError, UserRepository};
use crate::domain::{NewUser, User, UserId};

use super::diesel_error_mapping::{DieselFailure, classify, map_pool_error};
use super::models::{NewUserRow, UserRow};
use super::pool::DbPool;
use super::schema::users;

diesel::expression::functions::define_sql_function! {
    fn lower(value: diesel::sql_types::Text) -> diesel::sql_types::Text;
}

/// Diesel-backed implementation of the `UserRepository` port.
#[derive(Debug, Clone)]
pub struct DieselUserRepository {
    pool: DbPool,
}

impl DieselUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_diesel_error(error: diesel::result::Error) -> UserPersistenceError {
    match classify(&error) {
        DieselFailure::Connection(message) => UserPersistenceError::connection(message),
        DieselFailure::UniqueViolation => {
            UserPersistenceError::conflict("username or email already taken")
        }
        DieselFailure::Query(message) => UserPersistenceError::query(message),
    }
}

fn to_user(row: Option<UserRow>) -> Result<Option<User>, UserPersistenceError> {
    row.map(User::try_from)
        .transpose()
        .map_err(UserPersistenceError::query)
}

#[async_trait]
impl UserRepository for DieselUserRepository {
    async fn create(&self, user: NewUser) -> Result<User, UserPersistenceError> {
        let mut conn = self
            .pool
            .connection()
            .await
            .map_err(|err| map_pool_error(err, UserPersistenceError::connection))?;

        let row: UserRow = diesel::insert_into(users::table)
            .values(NewUserRow::from(&user))
            .returning(UserRow::as_returning())
            .get_result(&mut *conn)
            .await
            .map_err(map_diesel_error)?;
        User::try_from(row).map_err(UserPersistenceError::query)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, UserPersistenceError> {
        let mut conn = self
            .pool
            .connection()
            .await
            .map_err(|err| map_pool_error(err, UserPersistenceError::connection))?;

        let row = users::table
            .find(id.get())
            .select(UserRow::as_select())
            .first(&mut *conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;
        to_user(row)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, UserPersistenceError> {
        let mut conn = self
            .pool
            .connection()
            .await
            .map_err(|err| map_pool_error(err, UserPersistenceError::connection))?;

        let row = users::table
            .filter(users::username.eq(username))
            .select(UserRow::as_select())
            .first(&mut *conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;
        to_user(row)
    }

    async fn find_by_username_or_email(
        &self,
        username: &str,
        email: &str,
    ) -> Result<Option<User>, UserPersistenceError> {
        let mut conn = self
            .pool
            .connection()
            .await
            .map_err(|err| map_pool_error(err, UserPersistenceError::connection))?;

        let email = email.to_lowercase();
        let row = users::table
            .filter(
                users::username
                    .eq(username)
                    .or(lower(users::email).eq(email)),
            )
            .order(users::id)
            .select(UserRow::as_select())
            .first(&mut *conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;
        to_user(row)
    }
}
