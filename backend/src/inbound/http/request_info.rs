//! Client details derived from request headers and the peer address.
//!
//! Behind `number_of_proxies` reverse proxies the client address is read from
//! the forwarded-for header, counting entries from the right; otherwise the
//! socket peer address is used.

use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpRequest, web};
use futures_util::future::{Ready, ready};
use tracing::warn;

use crate::domain::Error;

/// Header names and proxy depth used by [`RequestInfoService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfoSettings {
    pub number_of_proxies: usize,
    pub ip_header: String,
    pub user_agent_header: String,
}

impl Default for RequestInfoSettings {
    fn default() -> Self {
        Self {
            number_of_proxies: 0,
            ip_header: "x-forwarded-for".into(),
            user_agent_header: "user-agent".into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestInfoService {
    settings: RequestInfoSettings,
}

impl RequestInfoService {
    pub fn new(settings: RequestInfoSettings) -> Self {
        Self { settings }
    }

    /// The configured user agent header, or an empty string.
    pub fn user_agent(&self, request: &HttpRequest) -> String {
        request
            .headers()
            .get(self.settings.user_agent_header.as_str())
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned()
    }

    /// Best guess at the client address.
    ///
    /// # Examples
    /// ```
    /// use actix_web::test::TestRequest;
    /// use scaffold::inbound::http::request_info::{RequestInfoService, RequestInfoSettings};
    ///
    /// let service = RequestInfoService::new(RequestInfoSettings {
    ///     number_of_proxies: 1,
    ///     ..RequestInfoSettings::default()
    /// });
    /// let request = TestRequest::default()
    ///     .insert_header(("x-forwarded-for", "203.0.113.9, 10.0.0.1"))
    ///     .to_http_request();
    /// assert_eq!(service.user_ip(&request).as_deref(), Some("10.0.0.1"));
    /// ```
    pub fn user_ip(&self, request: &HttpRequest) -> Option<String> {
        let forwarded = request
            .headers()
            .get(self.settings.ip_header.as_str())
            .and_then(|value| value.to_str().ok());

        match forwarded {
            Some(forwarded) if self.settings.number_of_proxies > 0 => {
                let addresses: Vec<&str> = forwarded.split(',').collect();
                let offset = self.settings.number_of_proxies.min(addresses.len());
                addresses
                    .get(addresses.len() - offset)
                    .map(|address| address.trim().to_owned())
            }
            _ => {
                let peer = request.peer_addr().map(|addr| addr.ip());
                match peer {
                    Some(ip) => Some(ip.to_string()),
                    None => {
                        warn!("remote address is not a valid IP");
                        None
                    }
                }
            }
        }
    }
}

/// User agent and client address of the current request.
///
/// Reads the [`RequestInfoService`] registered as app data and falls back to
/// the defaults when none is registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub user_agent: String,
    pub ip: Option<String>,
}

impl FromRequest for ClientInfo {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let info = match req.app_data::<web::Data<RequestInfoService>>() {
            Some(service) => ClientInfo {
                user_agent: service.user_agent(req),
                ip: service.user_ip(req),
            },
            None => {
                let service = RequestInfoService::default();
                ClientInfo {
                    user_agent: service.user_agent(req),
                    ip: service.user_ip(req),
                }
            }
        };
        ready(Ok(info))
    }
}
