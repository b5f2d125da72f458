//! Access and refresh token endpoints.
//!
//! ```text
//! POST /v1/users/me/token          credentials   -> access + refresh token
//! POST /v1/users/me/token/refresh  refresh token -> rotated pair
//! POST /v1/users/me/token/revoke   refresh token -> 200, session revoked
//! ```

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::web;
use serde::{Deserialize, Serialize};

use crate::domain::ports::Quota;
use crate::domain::{
    Error, JwtService, RefreshSessionError, RefreshSessionService, RefreshTokenError, UserService,
};
use crate::inbound::controller::{
    Controller, Operation, OperationWrapper, ReadyController, RegistrationError,
};

use super::super::auth::{AuthenticatedUser, JwtAuth, JwtAuthFactory};
use super::super::error::HttpError;
use super::super::request_info::ClientInfo;
use super::super::routes::{Route, RouteTable};
use super::super::throttle::{IpThrottlerFactory, Throttler, UserThrottlerFactory};

#[derive(Debug, Clone, Deserialize)]
pub struct IssueTokenRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
}

pub struct UserTokenController {
    jwt: Arc<JwtService>,
    users: Arc<UserService>,
    refresh_sessions: Arc<RefreshSessionService>,
    auth: Arc<JwtAuth>,
    issue_throttle: Arc<Throttler>,
    refresh_throttle: Arc<Throttler>,
    revoke_ip_throttle: Arc<Throttler>,
    revoke_user_throttle: Arc<Throttler>,
}

impl UserTokenController {
    pub fn new(
        jwt: Arc<JwtService>,
        users: Arc<UserService>,
        refresh_sessions: Arc<RefreshSessionService>,
        auth: &JwtAuthFactory,
        ip_throttler: &IpThrottlerFactory,
        user_throttler: &UserThrottlerFactory,
    ) -> Self {
        Self {
            jwt,
            users,
            refresh_sessions,
            auth: auth.authenticate(),
            issue_throttle: ip_throttler.build(Quota::per_min(10)),
            refresh_throttle: ip_throttler.build(Quota::per_min(10)),
            revoke_ip_throttle: ip_throttler.build(Quota::per_min(10)),
            revoke_user_throttle: user_throttler.build(Quota::per_min(10)),
        }
    }
}

pub struct UserTokenOperations {
    pub issue_user_token:
        Operation<(ClientInfo, web::Json<IssueTokenRequest>), web::Json<TokenResponse>, HttpError>,
    pub refresh_user_token:
        Operation<web::Json<RefreshTokenRequest>, web::Json<TokenResponse>, HttpError>,
    pub revoke_refresh_token:
        Operation<(AuthenticatedUser, web::Json<RefreshTokenRequest>), StatusCode, HttpError>,
}

impl Controller for UserTokenController {
    type Error = HttpError;
    type Registry = RouteTable;
    type Operations = UserTokenOperations;

    fn operations(wrap: &OperationWrapper<Self>) -> UserTokenOperations {
        UserTokenOperations {
            issue_user_token: wrap.wrap(
                "issue_user_token",
                |this: Arc<Self>, (client, web::Json(body)): (ClientInfo, web::Json<IssueTokenRequest>)| async move {
                    let user = this
                        .users
                        .get_user_by_username_and_password(&body.username, &body.password)
                        .await?
                        .ok_or_else(|| Error::unauthorized("Invalid username or password"))?;

                    let access_token = this.jwt.issue_access_token(user.id)?;
                    let issued = this
                        .refresh_sessions
                        .create_refresh_session(&user, &client.user_agent, client.ip.as_deref())
                        .await?;
                    Ok(web::Json(TokenResponse {
                        access_token,
                        refresh_token: issued.refresh_token,
                    }))
                },
            ),
            refresh_user_token: wrap.wrap(
                "refresh_user_token",
                |this: Arc<Self>, web::Json(body): web::Json<RefreshTokenRequest>| async move {
                    let rotated = this
                        .refresh_sessions
                        .rotate_refresh_token(&body.refresh_token)
                        .await?;
                    let access_token = this.jwt.issue_access_token(rotated.session.user_id)?;
                    Ok(web::Json(TokenResponse {
                        access_token,
                        refresh_token: rotated.refresh_token,
                    }))
                },
            ),
            revoke_refresh_token: wrap.wrap(
                "revoke_refresh_token",
                |this: Arc<Self>,
                 (user, web::Json(body)): (AuthenticatedUser, web::Json<RefreshTokenRequest>)| async move {
                    this.refresh_sessions
                        .revoke_refresh_token(&body.refresh_token, &user.0)
                        .await?;
                    Ok(StatusCode::OK)
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
        routes.add_route(
            Route::post("/v1/users/me/token").depends_on(this.issue_throttle.clone()),
            &operations.issue_user_token,
        )?;
        routes.add_route(
            Route::post("/v1/users/me/token/refresh").depends_on(this.refresh_throttle.clone()),
            &operations.refresh_user_token,
        )?;
        routes.add_route(
            Route::post("/v1/users/me/token/revoke")
                .depends_on(this.auth.clone())
                .depends_on(this.revoke_ip_throttle.clone())
                .depends_on(this.revoke_user_throttle.clone()),
            &operations.revoke_refresh_token,
        )
    }

    fn handle_error(&self, error: HttpError) -> HttpError {
        match error {
            HttpError::RefreshSessions(RefreshSessionError::Token(token)) => {
                let message = match token {
                    RefreshTokenError::Invalid => "Invalid refresh token",
                    RefreshTokenError::Expired => "Refresh token expired or revoked",
                    RefreshTokenError::InactiveUser => "Refresh token error",
                };
                Error::unauthorized(message).into()
            }
            other => other,
        }
    }
}
