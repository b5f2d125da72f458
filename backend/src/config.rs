//! Process settings loaded via OrthoConfig.
//!
//! Each concern has its own settings struct and environment prefix:
//!
//! | Struct                | Prefix          |
//! |-----------------------|-----------------|
//! | `ApplicationSettings` | `APP_`          |
//! | `DatabaseSettings`    | `DATABASE_`     |
//! | `HttpSettings`        | `HTTP_`         |
//! | `JwtSettings`         | `JWT_`          |
//! | `RequestInfoConfig`   | `REQUEST_INFO_` |
//! | `PasswordSettings`    | `PASSWORD_`     |
//! | `WorkerSettings`      | `WORKER_`       |
//! | `RedisSettings`       | `REDIS_`        |
//!
//! Fields hold raw values; accessor methods apply defaults and parse them.
//! Sections carrying credentials redact them from their `Debug` output.

use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use ortho_config::OrthoConfig;
use rand::RngCore;
use serde::Deserialize;
use tracing::warn;
use zeroize::Zeroizing;

use crate::domain::PasswordHasher;
use crate::inbound::http::request_info::RequestInfoSettings;
use crate::outbound::persistence::PoolConfig;
use crate::outbound::throttle::RedisThrottleConfig;

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8000";
const DEFAULT_ACCESS_TTL_SECS: u64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECS: u64 = 30 * 24 * 60 * 60;
const MAX_TTL_SECS: i64 = 100 * 365 * 24 * 60 * 60;
const DEFAULT_HASH_ITERATIONS: u32 = 720_000;
const DEFAULT_POOL_SIZE: u32 = 10;
const DEFAULT_POOL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_WORKER_CONCURRENCY: usize = 4;
const DEFAULT_QUEUE_CAPACITY: usize = 128;
const DEFAULT_REDIS_POOL_SIZE: u32 = 8;
const DEFAULT_REDIS_TIMEOUT_SECS: u64 = 5;
const REDACTED: &str = "<redacted>";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load {section} settings: {message}")]
    Load {
        section: &'static str,
        message: String,
    },
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
    #[error("{key} must be set in the {environment} environment")]
    Missing {
        key: &'static str,
        environment: Environment,
    },
}

/// Deployment environment the process runs in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Environment {
    #[default]
    Local,
    Development,
    Staging,
    Production,
    Test,
    Ci,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
            Self::Test => "test",
            Self::Ci => "ci",
        }
    }

    /// Shared environments get JSON logs and must not invent secrets.
    pub fn is_deployed(self) -> bool {
        matches!(self, Self::Development | Self::Staging | Self::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "development" | "dev" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            "ci" => Ok(Self::Ci),
            other => Err(ConfigError::Invalid {
                key: "APP_ENVIRONMENT",
                message: format!("unknown environment `{other}`"),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "APP")]
pub struct ApplicationSettings {
    /// One of local, development, staging, production, test or ci.
    pub environment: Option<String>,
    /// Reported by telemetry; defaults to the crate version.
    #[ortho_config(skip_cli)]
    pub version: Option<String>,
    pub time_zone: Option<String>,
}

impl ApplicationSettings {
    pub fn environment(&self) -> Result<Environment, ConfigError> {
        self.environment
            .as_deref()
            .map_or(Ok(Environment::default()), str::parse)
    }

    pub fn version(&self) -> &str {
        self.version
            .as_deref()
            .unwrap_or(env!("CARGO_PKG_VERSION"))
    }

    pub fn time_zone(&self) -> &str {
        self.time_zone.as_deref().unwrap_or("UTC")
    }
}

#[derive(Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "DATABASE")]
pub struct DatabaseSettings {
    /// PostgreSQL URL; in-memory adapters are used when unset.
    pub url: Option<String>,
    pub pool_size: Option<u32>,
    pub timeout_secs: Option<u64>,
}

impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("url", &redacted(self.url.as_ref()))
            .field("pool_size", &self.pool_size)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl DatabaseSettings {
    /// Pool settings, or `None` when no database is configured.
    pub fn pool_config(&self) -> Option<PoolConfig> {
        let url = self.url.as_deref().filter(|url| !url.trim().is_empty())?;
        Some(
            PoolConfig::new(url)
                .with_max_size(self.pool_size.unwrap_or(DEFAULT_POOL_SIZE))
                .with_connection_timeout(Duration::from_secs(
                    self.timeout_secs.unwrap_or(DEFAULT_POOL_TIMEOUT_SECS),
                )),
        )
    }
}

#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "HTTP")]
pub struct HttpSettings {
    pub bind_address: Option<String>,
    /// Comma separated; `*` allows any host.
    pub allowed_hosts: Option<String>,
}

impl HttpSettings {
    pub fn bind_address(&self) -> &str {
        self.bind_address.as_deref().unwrap_or(DEFAULT_BIND_ADDRESS)
    }

    pub fn allowed_hosts(&self) -> Vec<String> {
        match self.allowed_hosts.as_deref() {
            Some(hosts) => hosts
                .split(',')
                .map(str::trim)
                .filter(|host| !host.is_empty())
                .map(str::to_owned)
                .collect(),
            None => vec!["*".to_owned()],
        }
    }
}

#[derive(Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "JWT")]
pub struct JwtSettings {
    pub secret_key: Option<String>,
    pub access_token_ttl_secs: Option<u64>,
    pub refresh_token_ttl_secs: Option<u64>,
}

impl fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtSettings")
            .field("secret_key", &redacted(self.secret_key.as_ref()))
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("refresh_token_ttl_secs", &self.refresh_token_ttl_secs)
            .finish()
    }
}

impl JwtSettings {
    /// Signing key bytes.
    ///
    /// Outside deployed environments a missing key is replaced by a random
    /// one, which invalidates issued tokens on restart.
    pub fn secret_key(&self, environment: Environment) -> Result<Zeroizing<Vec<u8>>, ConfigError> {
        match self.secret_key.as_deref().filter(|key| !key.is_empty()) {
            Some(key) => Ok(Zeroizing::new(key.as_bytes().to_vec())),
            None if environment.is_deployed() => Err(ConfigError::Missing {
                key: "JWT_SECRET_KEY",
                environment,
            }),
            None => {
                warn!(%environment, "JWT_SECRET_KEY not set; using an ephemeral key");
                let mut key = Zeroizing::new(vec![0_u8; 32]);
                rand::thread_rng().fill_bytes(&mut key);
                Ok(key)
            }
        }
    }

    pub fn access_token_ttl(&self) -> chrono::Duration {
        seconds(self.access_token_ttl_secs.unwrap_or(DEFAULT_ACCESS_TTL_SECS))
    }

    pub fn refresh_token_ttl(&self) -> chrono::Duration {
        seconds(self.refresh_token_ttl_secs.unwrap_or(DEFAULT_REFRESH_TTL_SECS))
    }
}

fn redacted(value: Option<&String>) -> Option<&'static str> {
    value.map(|_| REDACTED)
}

fn seconds(value: u64) -> chrono::Duration {
    let secs = i64::try_from(value).unwrap_or(i64::MAX).min(MAX_TTL_SECS);
    chrono::Duration::seconds(secs)
}

#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "REQUEST_INFO")]
pub struct RequestInfoConfig {
    /// Reverse proxies in front of the service.
    pub number_of_proxies: Option<usize>,
    pub ip_header: Option<String>,
    pub user_agent_header: Option<String>,
}

impl RequestInfoConfig {
    pub fn settings(&self) -> RequestInfoSettings {
        let defaults = RequestInfoSettings::default();
        RequestInfoSettings {
            number_of_proxies: self.number_of_proxies.unwrap_or(defaults.number_of_proxies),
            ip_header: self
                .ip_header
                .clone()
                .unwrap_or(defaults.ip_header)
                .to_ascii_lowercase(),
            user_agent_header: self
                .user_agent_header
                .clone()
                .unwrap_or(defaults.user_agent_header)
                .to_ascii_lowercase(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "PASSWORD")]
pub struct PasswordSettings {
    pub hash_iterations: Option<u32>,
}

impl PasswordSettings {
    pub fn hasher(&self) -> PasswordHasher {
        PasswordHasher::new(self.hash_iterations.unwrap_or(DEFAULT_HASH_ITERATIONS))
    }
}

#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "WORKER")]
pub struct WorkerSettings {
    /// Tasks processed at the same time.
    pub concurrency: Option<usize>,
    pub queue_capacity: Option<usize>,
}

impl WorkerSettings {
    pub fn concurrency(&self) -> usize {
        self.concurrency.unwrap_or(DEFAULT_WORKER_CONCURRENCY).max(1)
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY).max(1)
    }
}

#[derive(Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "REDIS")]
pub struct RedisSettings {
    /// Redis URL for shared throttle buckets; buckets stay per process
    /// when unset.
    pub url: Option<String>,
    pub pool_size: Option<u32>,
    pub timeout_secs: Option<u64>,
}

impl fmt::Debug for RedisSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisSettings")
            .field("url", &redacted(self.url.as_ref()))
            .field("pool_size", &self.pool_size)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl RedisSettings {
    /// Throttle store connection settings, or `None` when no Redis URL is
    /// configured.
    pub fn throttle_config(&self) -> Option<RedisThrottleConfig> {
        let url = self.url.as_deref().filter(|url| !url.trim().is_empty())?;
        Some(
            RedisThrottleConfig::new(url)
                .with_max_size(self.pool_size.unwrap_or(DEFAULT_REDIS_POOL_SIZE))
                .with_connection_timeout(Duration::from_secs(
                    self.timeout_secs.unwrap_or(DEFAULT_REDIS_TIMEOUT_SECS),
                )),
        )
    }
}

/// Every settings section, loaded together at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub app: ApplicationSettings,
    pub database: DatabaseSettings,
    pub http: HttpSettings,
    pub jwt: JwtSettings,
    pub request_info: RequestInfoConfig,
    pub password: PasswordSettings,
    pub worker: WorkerSettings,
    pub redis: RedisSettings,
}

impl Settings {
    /// Load every section from the environment and configuration files.
    ///
    /// Command-line arguments are not consulted; `program` only names the
    /// process for OrthoConfig.
    pub fn load(program: &str) -> Result<Self, ConfigError> {
        let args = || [OsString::from(program)];
        Ok(Self {
            app: ApplicationSettings::load_from_iter(args()).map_err(load_error("app"))?,
            database: DatabaseSettings::load_from_iter(args()).map_err(load_error("database"))?,
            http: HttpSettings::load_from_iter(args()).map_err(load_error("http"))?,
            jwt: JwtSettings::load_from_iter(args()).map_err(load_error("jwt"))?,
            request_info: RequestInfoConfig::load_from_iter(args())
                .map_err(load_error("request info"))?,
            password: PasswordSettings::load_from_iter(args()).map_err(load_error("password"))?,
            worker: WorkerSettings::load_from_iter(args()).map_err(load_error("worker"))?,
            redis: RedisSettings::load_from_iter(args()).map_err(load_error("redis"))?,
        })
    }
}

fn load_error<E: fmt::Display>(section: &'static str) -> impl FnOnce(E) -> ConfigError {
    move |err| ConfigError::Load {
        section,
        message: err.to_string(),
    }
}
