//! HTTP adapter mapping for controller errors.
//!
//! Purpose: keep the domain error type HTTP-agnostic while allowing Actix
//! handlers to turn controller failures into consistent JSON responses and
//! status codes. Controllers translate the failures they understand into
//! [`Error`]; everything else is logged and reaches the client as a redacted
//! internal error.

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use tracing::error;

use crate::domain::ports::TransactionError;
use crate::domain::{
    Error, ErrorCode, HealthError, JwtError, RefreshSessionError, TRACE_ID_HEADER,
    TodoServiceError, UserServiceError,
};

/// Convenient result alias for HTTP handlers.
pub type ApiResult<T> = Result<T, Error>;

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn redact_if_internal(error: &Error) -> Error {
    if matches!(error.code(), ErrorCode::InternalError) {
        let mut redacted = Error::internal("Internal server error");
        if let Some(id) = error.trace_id() {
            redacted = redacted.with_trace_id(id.to_owned());
        }
        redacted
    } else {
        error.clone()
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        status_for(self.code())
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        if let Some(id) = self.trace_id() {
            builder.insert_header((TRACE_ID_HEADER, id.to_owned()));
        }

        builder.json(redact_if_internal(self))
    }
}

/// Error type shared by HTTP controllers.
///
/// Raw operation bodies propagate service failures with `?`; the
/// controller's `handle_error` rewrites the ones it understands into
/// [`HttpError::Response`].
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// A failure already expressed as a client-facing payload.
    #[error(transparent)]
    Response(#[from] Error),
    #[error(transparent)]
    Users(#[from] UserServiceError),
    #[error(transparent)]
    RefreshSessions(#[from] RefreshSessionError),
    #[error(transparent)]
    Todos(#[from] TodoServiceError),
    #[error(transparent)]
    Health(#[from] HealthError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl HttpError {
    /// The payload sent to the client.
    pub fn to_response_error(&self) -> Error {
        match self {
            Self::Response(error) => error.clone(),
            other => {
                error!(error = %other, "unhandled controller error");
                Error::internal("Internal server error")
            }
        }
    }
}

impl ResponseError for HttpError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Response(error) => error.status_code(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        self.to_response_error().error_response()
    }
}
