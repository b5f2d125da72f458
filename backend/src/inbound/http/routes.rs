//! Route table: the HTTP registry controllers attach their operations to.
//!
//! Each entry binds one wrapped operation to a method and path plus an
//! ordered list of [`RouteDependency`] checks. The operation's argument type
//! is a tuple of Actix extractors, so request parsing and validation are
//! driven by the operation signature; dependencies run first and can reject
//! the request before any extraction happens.
//!
//! ```text
//! POST /v1/users/me/token   -> [ip throttle]          -> issue_user_token
//! GET  /v1/users/me         -> [jwt]                  -> get_current_user
//! ```

use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::Method;
use actix_web::{FromRequest, HttpRequest, Responder, ResponseError, guard, web};
use async_trait::async_trait;
use futures_util::future::{LocalBoxFuture, Ready, ready};
use tracing::debug;

use crate::domain::Error;
use crate::inbound::controller::{Operation, RegistrationError};

/// A check evaluated before a route's operation runs.
///
/// Dependencies may stash values in the request extensions for later
/// extractors, e.g. the authenticated user.
#[async_trait(?Send)]
pub trait RouteDependency: Send + Sync {
    async fn check(&self, request: &HttpRequest) -> Result<(), Error>;
}

/// Method, path and dependencies for one route.
#[derive(Clone)]
pub struct Route {
    method: Method,
    path: String,
    dependencies: Vec<Arc<dyn RouteDependency>>,
}

impl Route {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            dependencies: Vec::new(),
        }
    }

    /// A `GET` route for `path`.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// A `POST` route for `path`.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// A `PATCH` route for `path`.
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    /// A `DELETE` route for `path`.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a dependency; dependencies run in the order they were added.
    pub fn depends_on(mut self, dependency: Arc<dyn RouteDependency>) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("dependencies", &self.dependencies.len())
            .finish()
    }
}

type Mount = Arc<dyn Fn(&mut web::ServiceConfig) + Send + Sync>;

/// Registry of HTTP routes, mounted into every Actix worker's `App`.
#[derive(Default)]
pub struct RouteTable {
    seen: HashSet<(Method, String)>,
    mounts: Vec<Mount>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `operation` under `route`.
    ///
    /// Fails with [`RegistrationError::Duplicate`] when the same method and
    /// path were attached before.
    pub fn add_route<A, T, E>(
        &mut self,
        route: Route,
        operation: &Operation<A, T, E>,
    ) -> Result<(), RegistrationError>
    where
        A: FromRequest + Send + 'static,
        T: Responder + Send + 'static,
        E: ResponseError + Send + 'static,
    {
        let key = (route.method.clone(), route.path.clone());
        if self.seen.contains(&key) {
            return Err(RegistrationError::Duplicate {
                name: format!("{} {}", route.method, route.path),
            });
        }
        debug!(
            method = %route.method,
            path = %route.path,
            operation = operation.name(),
            "route attached"
        );
        self.seen.insert(key);

        let operation = operation.clone();
        let Route {
            method,
            path,
            dependencies,
        } = route;
        let dependencies: Arc<[Arc<dyn RouteDependency>]> = dependencies.into();
        self.mounts.push(Arc::new(move |cfg: &mut web::ServiceConfig| {
            let operation = operation.clone();
            let handler = move |args: A| operation.call(args);
            cfg.service(
                web::resource(path.as_str())
                    .guard(guard::Method(method.clone()))
                    .wrap(DependencyGate::new(Arc::clone(&dependencies)))
                    .route(web::route().to(handler)),
            );
        }));
        Ok(())
    }

    /// Mount every attached route, in registration order.
    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        for mount in &self.mounts {
            mount(cfg);
        }
    }

    /// Number of attached routes.
    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    /// Whether `method` and `path` were attached, compared literally
    /// against the registered pattern.
    pub fn contains(&self, method: &Method, path: &str) -> bool {
        self.seen.contains(&(method.clone(), path.to_owned()))
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("routes", &self.mounts.len())
            .finish()
    }
}

/// Resource middleware running a route's dependencies in order.
struct DependencyGate {
    dependencies: Arc<[Arc<dyn RouteDependency>]>,
}

impl DependencyGate {
    fn new(dependencies: Arc<[Arc<dyn RouteDependency>]>) -> Self {
        Self { dependencies }
    }
}

impl<S, B> Transform<S, ServiceRequest> for DependencyGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type InitError = ();
    type Transform = DependencyGateMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(DependencyGateMiddleware {
            service: Rc::new(service),
            dependencies: Arc::clone(&self.dependencies),
        }))
    }
}

struct DependencyGateMiddleware<S> {
    service: Rc<S>,
    dependencies: Arc<[Arc<dyn RouteDependency>]>,
}

impl<S, B> Service<ServiceRequest> for DependencyGateMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let dependencies = Arc::clone(&self.dependencies);
        Box::pin(async move {
            for dependency in dependencies.iter() {
                let outcome = dependency.check(req.request()).await;
                if let Err(error) = outcome {
                    let response = error.error_response();
                    return Ok(req.into_response(response).map_into_right_body());
                }
            }
            let response = service.call(req).await?;
            Ok(response.map_into_left_body())
        })
    }
}
