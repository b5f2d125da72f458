//! Account sign-up and lookup endpoints.

use std::sync::Arc;

use actix_web::web;
use serde::{Deserialize, Serialize};

use crate::domain::ports::UserPersistenceError;
use crate::domain::user::validate_name;
use crate::domain::{
    CreateUser, EmailAddress, Error, User, UserId, UserService, UserServiceError,
    UserValidationError, Username,
};
use crate::inbound::controller::{
    Controller, Operation, OperationWrapper, ReadyController, RegistrationError,
};

use super::super::auth::{AuthenticatedUser, JwtAuth, JwtAuthFactory};
use super::super::error::HttpError;
use super::super::routes::{Route, RouteTable};

const MAX_PASSWORD_LENGTH: usize = 128;
const USER_EXISTS: &str = "A user with the given username or email already exists";

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

impl CreateUserRequest {
    fn validate(&self) -> Result<(), UserValidationError> {
        Username::new(self.username.as_str())?;
        EmailAddress::new(&self.email)?;
        validate_name("first_name", &self.first_name)?;
        validate_name("last_name", &self.last_name)
    }
}

/// Public view of an account; never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSchema {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_staff: bool,
    pub is_superuser: bool,
}

impl From<&User> for UserSchema {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.get(),
            username: user.username.as_str().to_owned(),
            email: user.email.as_str().to_owned(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            is_staff: user.is_staff,
            is_superuser: user.is_superuser,
        }
    }
}

pub struct UserController {
    users: Arc<UserService>,
    auth: Arc<JwtAuth>,
    staff_auth: Arc<JwtAuth>,
}

impl UserController {
    pub fn new(users: Arc<UserService>, auth: &JwtAuthFactory) -> Self {
        Self {
            users,
            auth: auth.authenticate(),
            staff_auth: auth.require_staff(),
        }
    }

    async fn create(&self, body: CreateUserRequest) -> Result<User, HttpError> {
        body.validate().map_err(UserServiceError::from)?;
        if body.password.chars().count() > MAX_PASSWORD_LENGTH {
            return Err(Error::invalid_request(format!(
                "Password must be at most {MAX_PASSWORD_LENGTH} characters"
            ))
            .into());
        }
        let strong = self.users.is_valid_password(
            &body.password,
            &body.username,
            &body.email,
            &body.first_name,
            &body.last_name,
        );
        if !strong {
            return Err(
                Error::invalid_request("Password does not meet the strength requirements").into(),
            );
        }

        let existing = self
            .users
            .get_user_by_username_or_email(&body.username, &body.email)
            .await?;
        if existing.is_some() {
            return Err(Error::conflict(USER_EXISTS).into());
        }

        let user = self
            .users
            .create_user(CreateUser {
                username: body.username,
                email: body.email,
                first_name: body.first_name,
                last_name: body.last_name,
                password: body.password,
                is_staff: false,
            })
            .await?;
        Ok(user)
    }
}

pub struct UserOperations {
    pub create_user: Operation<web::Json<CreateUserRequest>, web::Json<UserSchema>, HttpError>,
    pub get_current_user: Operation<AuthenticatedUser, web::Json<UserSchema>, HttpError>,
    pub get_user_by_id: Operation<web::Path<i64>, web::Json<UserSchema>, HttpError>,
}

impl Controller for UserController {
    type Error = HttpError;
    type Registry = RouteTable;
    type Operations = UserOperations;

    fn operations(wrap: &OperationWrapper<Self>) -> UserOperations {
        UserOperations {
            create_user: wrap.wrap(
                "create_user",
                |this: Arc<Self>, web::Json(body): web::Json<CreateUserRequest>| async move {
                    let user = this.create(body).await?;
                    Ok(web::Json(UserSchema::from(&user)))
                },
            ),
            get_current_user: wrap.wrap(
                "get_current_user",
                |_: Arc<Self>, user: AuthenticatedUser| async move {
                    Ok(web::Json(UserSchema::from(&user.0)))
                },
            ),
            get_user_by_id: wrap.wrap(
                "get_user_by_id",
                |this: Arc<Self>, user_id: web::Path<i64>| async move {
                    let user = this
                        .users
                        .get_user_by_id(UserId::new(user_id.into_inner()))
                        .await?
                        .ok_or_else(|| Error::not_found("User not found"))?;
                    Ok(web::Json(UserSchema::from(&user)))
                },
            ),
        }
    }

    fn register(
        ready: &ReadyController<Self>,
        routes: &mut RouteTable,
    ) -> Result<(), RegistrationError> {
        let this = ready.controller();
        let operations = ready.operations();
        routes.add_route(Route::post("/v1/users/"), &operations.create_user)?;
        // Before `{user_id}` so `me` is not parsed as an id.
        routes.add_route(
            Route::get("/v1/users/me").depends_on(this.auth.clone()),
            &operations.get_current_user,
        )?;
        routes.add_route(
            Route::get("/v1/users/{user_id}").depends_on(this.staff_auth.clone()),
            &operations.get_user_by_id,
        )
    }

    fn handle_error(&self, error: HttpError) -> HttpError {
        match error {
            HttpError::Users(UserServiceError::Validation(err)) => {
                Error::invalid_request(err.to_string()).into()
            }
            HttpError::Users(UserServiceError::Persistence(UserPersistenceError::Conflict {
                ..
            })) => Error::conflict(USER_EXISTS).into(),
            other => other,
        }
    }
}
