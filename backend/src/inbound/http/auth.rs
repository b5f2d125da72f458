//! Bearer token authentication for routes.
//!
//! [`JwtAuth`] runs as a route dependency: it decodes the access token from
//! the `Authorization` header, loads the user it names and stores it in the
//! request extensions, where operations pick it up through the
//! [`AuthenticatedUser`] extractor.

use std::sync::Arc;

use actix_web::dev::Payload;
use actix_web::http::header::AUTHORIZATION;
use actix_web::{FromRequest, HttpMessage, HttpRequest};
use async_trait::async_trait;
use futures_util::future::{Ready, ready};
use tracing::{debug, error};

use crate::domain::{Error, JwtService, User, UserService};

use super::routes::RouteDependency;

const MISSING_CREDENTIALS: &str = "Authentication credentials were not provided";
const INVALID_TOKEN: &str = "Invalid access token";
const UNKNOWN_USER: &str = "User not found or inactive";
const STAFF_REQUIRED: &str = "Staff privileges required";

/// The user resolved by [`JwtAuth`] for the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub User);

impl AuthenticatedUser {
    pub fn into_inner(self) -> User {
        self.0
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let user = req.extensions().get::<AuthenticatedUser>().cloned();
        ready(user.ok_or_else(|| Error::unauthorized(MISSING_CREDENTIALS)))
    }
}

/// Builds [`JwtAuth`] dependencies sharing one token service and user lookup.
#[derive(Clone)]
pub struct JwtAuthFactory {
    jwt: Arc<JwtService>,
    users: Arc<UserService>,
}

impl JwtAuthFactory {
    pub fn new(jwt: Arc<JwtService>, users: Arc<UserService>) -> Self {
        Self { jwt, users }
    }

    /// Any active user.
    pub fn authenticate(&self) -> Arc<JwtAuth> {
        self.build(false)
    }

    /// Active staff users only; others get `403 Forbidden`.
    pub fn require_staff(&self) -> Arc<JwtAuth> {
        self.build(true)
    }

    fn build(&self, require_staff: bool) -> Arc<JwtAuth> {
        Arc::new(JwtAuth {
            jwt: Arc::clone(&self.jwt),
            users: Arc::clone(&self.users),
            require_staff,
        })
    }
}

pub struct JwtAuth {
    jwt: Arc<JwtService>,
    users: Arc<UserService>,
    require_staff: bool,
}

fn bearer_token(request: &HttpRequest) -> Option<&str> {
    let value = request.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

impl JwtAuth {
    async fn resolve(&self, request: &HttpRequest) -> Result<User, Error> {
        let token = bearer_token(request).ok_or_else(|| Error::unauthorized(MISSING_CREDENTIALS))?;
        let user_id = self
            .jwt
            .decode_access_token(token)
            .and_then(|claims| claims.user_id())
            .map_err(|err| {
                debug!(error = %err, "access token rejected");
                Error::unauthorized(INVALID_TOKEN)
            })?;

        let user = self.users.get_user_by_id(user_id).await.map_err(|err| {
            error!(error = %err, "failed to load authenticated user");
            Error::internal("Internal server error")
        })?;
        match user {
            Some(user) if user.is_active => Ok(user),
            _ => Err(Error::unauthorized(UNKNOWN_USER)),
        }
    }
}

#[async_trait(?Send)]
impl RouteDependency for JwtAuth {
    async fn check(&self, request: &HttpRequest) -> Result<(), Error> {
        let user = self.resolve(request).await?;
        if self.require_staff && !user.is_staff {
            return Err(Error::forbidden(STAFF_REQUIRED));
        }
        request.extensions_mut().insert(AuthenticatedUser(user));
        Ok(())
    }
}
