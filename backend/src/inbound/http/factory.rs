//! Actix application assembly.
//!
//! [`ApiFactory`] turns a populated [`RouteTable`] into an `App`: trace
//! middleware outermost, then the trusted host check, then the routes. Body
//! and path extraction failures are reported as `invalid_request` payloads
//! rather than Actix's plain-text defaults.

use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix_web::body::{BoxBody, MessageBody};
use actix_web::dev::{Service, ServiceFactory, ServiceRequest, ServiceResponse, Transform};
use actix_web::{App, HttpRequest, ResponseError, web};
use futures_util::future::{LocalBoxFuture, Ready, ready};
use serde_json::json;
use tracing::debug;

use crate::domain::Error;

use super::request_info::RequestInfoService;
use super::routes::RouteTable;
use super::trace::Trace;

const INVALID_HOST: &str = "Invalid host header";

/// Builds one `App` per Actix worker from shared, immutable parts.
#[derive(Clone)]
pub struct ApiFactory {
    routes: Arc<RouteTable>,
    request_info: web::Data<RequestInfoService>,
    allowed_hosts: TrustedHosts,
}

impl ApiFactory {
    pub fn new(routes: RouteTable, request_info: RequestInfoService) -> Self {
        Self {
            routes: Arc::new(routes),
            request_info: web::Data::new(request_info),
            allowed_hosts: TrustedHosts::any(),
        }
    }

    /// Restrict the accepted `Host` values; `*` accepts any host.
    pub fn with_allowed_hosts(mut self, hosts: Vec<String>) -> Self {
        self.allowed_hosts = TrustedHosts::new(hosts);
        self
    }

    pub fn build(
        &self,
    ) -> App<
        impl ServiceFactory<
            ServiceRequest,
            Config = (),
            Response = ServiceResponse,
            Error = actix_web::Error,
            InitError = (),
        >,
    > {
        let routes = Arc::clone(&self.routes);
        App::new()
            .app_data(self.request_info.clone())
            .app_data(json_config())
            .app_data(path_config())
            .configure(move |cfg| routes.configure(cfg))
            .default_service(web::to(not_found))
            .wrap(self.allowed_hosts.clone())
            .wrap(Trace)
    }
}

async fn not_found() -> Result<&'static str, Error> {
    Err(Error::not_found("Not found"))
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req: &HttpRequest| {
        debug!(error = %err, "rejected request body");
        Error::invalid_request("Invalid request body")
            .with_details(json!({ "reason": err.to_string() }))
            .into()
    })
}

fn path_config() -> web::PathConfig {
    web::PathConfig::default().error_handler(|err, _req: &HttpRequest| {
        debug!(error = %err, "rejected path parameters");
        Error::invalid_request("Invalid path parameters")
            .with_details(json!({ "reason": err.to_string() }))
            .into()
    })
}

/// Middleware rejecting requests whose `Host` is not allowed.
#[derive(Debug, Clone)]
pub struct TrustedHosts {
    hosts: Option<Arc<[String]>>,
}

impl TrustedHosts {
    pub fn any() -> Self {
        Self { hosts: None }
    }

    pub fn new(hosts: Vec<String>) -> Self {
        if hosts.iter().any(|host| host == "*") {
            return Self::any();
        }
        let hosts: Vec<String> = hosts.into_iter().map(|host| host.to_lowercase()).collect();
        Self {
            hosts: Some(hosts.into()),
        }
    }

    /// Whether `host` (optionally carrying a port) is accepted.
    pub fn allows(&self, host: &str) -> bool {
        let Some(hosts) = &self.hosts else {
            return true;
        };
        let name = strip_port(host).to_lowercase();
        hosts.iter().any(|allowed| match allowed.strip_prefix("*.") {
            Some(suffix) => name.ends_with(&format!(".{suffix}")),
            None => *allowed == name,
        })
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.split_once(']').map_or(host, |(ip, _)| &ip[1..]);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

impl<S, B> Transform<S, ServiceRequest> for TrustedHosts
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = actix_web::Error;
    type InitError = ();
    type Transform = TrustedHostsMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(TrustedHostsMiddleware {
            service: Rc::new(service),
            hosts: self.clone(),
        }))
    }
}

pub struct TrustedHostsMiddleware<S> {
    service: Rc<S>,
    hosts: TrustedHosts,
}

impl<S, B> Service<ServiceRequest> for TrustedHostsMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let host = req.connection_info().host().to_owned();
        if !self.hosts.allows(&host) {
            debug!(%host, "rejected untrusted host");
            let response = Error::invalid_request(INVALID_HOST).error_response();
            return Box::pin(ready(Ok(req.into_response(response))));
        }
        let service = Rc::clone(&self.service);
        Box::pin(async move {
            let response = service.call(req).await?;
            Ok(response.map_into_boxed_body())
        })
    }
}
