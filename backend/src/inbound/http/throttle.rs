//! Rate limiting route dependencies.
//!
//! Throttlers charge a token bucket keyed by method, path and either the
//! client address or the authenticated user:
//!
//! ```text
//! throttler:post:/v1/users/me/token:203.0.113.7
//! throttler:post:/v1/users/me/token/revoke:42
//! ```
//!
//! User throttlers must run after [`JwtAuth`](super::auth::JwtAuth) on the
//! same route.

use std::sync::Arc;

use actix_web::{HttpMessage, HttpRequest};
use async_trait::async_trait;
use tracing::{debug, error};

use crate::domain::Error;
use crate::domain::ports::{Quota, ThrottleStore};

use super::auth::AuthenticatedUser;
use super::request_info::RequestInfoService;
use super::routes::RouteDependency;

const TOO_MANY_REQUESTS: &str = "Too many requests";

/// Identity a throttler buckets requests by.
enum Subject {
    Ip(RequestInfoService),
    User,
}

pub struct Throttler {
    store: Arc<dyn ThrottleStore>,
    quota: Quota,
    cost: u32,
    subject: Subject,
}

impl Throttler {
    fn key(&self, request: &HttpRequest) -> Result<String, Error> {
        let subject = match &self.subject {
            Subject::Ip(info) => info.user_ip(request).unwrap_or_else(|| "none".to_owned()),
            Subject::User => request
                .extensions()
                .get::<AuthenticatedUser>()
                .map(|user| user.0.id.to_string())
                .ok_or_else(|| {
                    error!("user throttler ran before authentication");
                    Error::internal("Internal server error")
                })?,
        };
        Ok(throttle_key(request.method().as_str(), request.path(), &subject))
    }
}

/// `throttler:{method}:{path}:{subject}`, lowercased.
pub fn throttle_key(method: &str, path: &str, subject: &str) -> String {
    format!("throttler:{method}:{path}:{subject}").to_lowercase()
}

#[async_trait(?Send)]
impl RouteDependency for Throttler {
    async fn check(&self, request: &HttpRequest) -> Result<(), Error> {
        let key = self.key(request)?;
        let decision = self
            .store
            .acquire(&key, self.quota, self.cost)
            .await
            .map_err(|err| {
                error!(error = %err, "throttle store failed");
                Error::internal("Internal server error")
            })?;
        if decision.limited {
            debug!(%key, "request throttled");
            return Err(Error::too_many_requests(TOO_MANY_REQUESTS));
        }
        debug!(%key, remaining = decision.remaining, "request not throttled");
        Ok(())
    }
}

/// Throttlers keyed by client address.
#[derive(Clone)]
pub struct IpThrottlerFactory {
    store: Arc<dyn ThrottleStore>,
    request_info: RequestInfoService,
}

impl IpThrottlerFactory {
    pub fn new(store: Arc<dyn ThrottleStore>, request_info: RequestInfoService) -> Self {
        Self {
            store,
            request_info,
        }
    }

    pub fn build(&self, quota: Quota) -> Arc<Throttler> {
        self.build_with_cost(quota, 1)
    }

    pub fn build_with_cost(&self, quota: Quota, cost: u32) -> Arc<Throttler> {
        Arc::new(Throttler {
            store: Arc::clone(&self.store),
            quota,
            cost,
            subject: Subject::Ip(self.request_info.clone()),
        })
    }
}

/// Throttlers keyed by the authenticated user id.
#[derive(Clone)]
pub struct UserThrottlerFactory {
    store: Arc<dyn ThrottleStore>,
}

impl UserThrottlerFactory {
    pub fn new(store: Arc<dyn ThrottleStore>) -> Self {
        Self { store }
    }

    pub fn build(&self, quota: Quota) -> Arc<Throttler> {
        self.build_with_cost(quota, 1)
    }

    pub fn build_with_cost(&self, quota: Quota, cost: u32) -> Arc<Throttler> {
        Arc::new(Throttler {
            store: Arc::clone(&self.store),
            quota,
            cost,
            subject: Subject::User,
        })
    }
}
