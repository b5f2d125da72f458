//! Composition root.
//!
//! [`Container`] is built once per process. It picks Diesel adapters when a
//! database URL is configured and the in-memory adapters otherwise, and
//! shares throttle buckets through Redis when a Redis URL is configured. It
//! then builds the domain services over those adapters and registers every
//! ready controller exactly once into the route table and the task registry.

use std::sync::Arc;

use mockable::{Clock, DefaultClock};
use tracing::info;

use crate::config::{ConfigError, Environment, Settings};
use crate::domain::ports::{
    AlwaysHealthy, HealthProbe, RefreshSessionRepository, ThrottleStore, ThrottleStoreError,
    TodoRepository, TransactionScope, UserRepository,
};
use crate::domain::{
    HealthService, JwtService, PasswordPolicy, RefreshSessionService, TodoService, UserService,
};
use crate::inbound::controller::{ReadyController, RegistrationError};
use crate::inbound::http::auth::JwtAuthFactory;
use crate::inbound::http::controllers::{
    HealthController, TodoController, UserController, UserTokenController,
};
use crate::inbound::http::request_info::RequestInfoService;
use crate::inbound::http::throttle::{IpThrottlerFactory, UserThrottlerFactory};
use crate::inbound::http::{ApiFactory, RouteTable};
use crate::inbound::tasks::{
    PingController, TaskError, TaskQueue, TaskReceiver, TaskRegistry, TasksClient, Worker,
    WorkerEvents,
};
use crate::outbound::memory::{
    MemoryRefreshSessionRepository, MemoryStore, MemoryTodoRepository, MemoryTransactionScope,
    MemoryUserRepository,
};
use crate::outbound::persistence::{
    DbPool, DieselHealthProbe, DieselRefreshSessionRepository, DieselTodoRepository,
    DieselTransactionScope, DieselUserRepository, MigrationError, PoolConfig, PoolError,
    run_migrations,
};
use crate::outbound::throttle::{InMemoryThrottleStore, RedisThrottleStore};
use crate::telemetry::TelemetryConfigurator;

#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database pool: {0}")]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error(transparent)]
    Throttle(#[from] ThrottleStoreError),
    #[error("controller registration: {0}")]
    Registration(#[from] RegistrationError),
}

/// Storage adapters behind the domain ports.
struct Adapters {
    users: Arc<dyn UserRepository>,
    refresh_sessions: Arc<dyn RefreshSessionRepository>,
    todos: Arc<dyn TodoRepository>,
    health: Arc<dyn HealthProbe>,
    scope: Arc<dyn TransactionScope>,
}

impl Adapters {
    async fn diesel(config: PoolConfig) -> Result<Self, ContainerError> {
        run_migrations(config.database_url()).await?;
        let pool = DbPool::new(config).await?;
        info!("using PostgreSQL adapters");
        Ok(Self {
            users: Arc::new(DieselUserRepository::new(pool.clone())),
            refresh_sessions: Arc::new(DieselRefreshSessionRepository::new(pool.clone())),
            todos: Arc::new(DieselTodoRepository::new(pool.clone())),
            health: Arc::new(DieselHealthProbe::new(pool.clone())),
            scope: Arc::new(DieselTransactionScope::new(pool)),
        })
    }

    fn memory() -> Self {
        let store = MemoryStore::new();
        info!("DATABASE_URL not set; using in-memory adapters");
        Self {
            users: Arc::new(MemoryUserRepository::new(Arc::clone(&store))),
            refresh_sessions: Arc::new(MemoryRefreshSessionRepository::new(Arc::clone(&store))),
            todos: Arc::new(MemoryTodoRepository::new(Arc::clone(&store))),
            health: Arc::new(AlwaysHealthy),
            scope: Arc::new(MemoryTransactionScope::new(store)),
        }
    }
}

/// A worker together with the queue end it drains.
pub struct WorkerRuntime {
    worker: Worker,
    receiver: TaskReceiver,
}

impl WorkerRuntime {
    /// Run until every queue handle is dropped or an init hook fails.
    pub async fn run(self) -> Result<(), TaskError> {
        self.worker.run(self.receiver).await
    }
}

/// Process-wide object graph.
pub struct Container {
    settings: Settings,
    environment: Environment,
    api: ApiFactory,
    tasks: TasksClient,
    worker: Option<WorkerRuntime>,
}

impl Container {
    /// Build adapters, services and controllers from `settings`.
    ///
    /// # Errors
    ///
    /// Fails on invalid settings, when the database cannot be reached or
    /// migrated, or when two controllers claim the same route or task.
    pub async fn build(settings: Settings) -> Result<Self, ContainerError> {
        let environment = settings.app.environment()?;
        let secret = settings.jwt.secret_key(environment)?;
        let adapters = match settings.database.pool_config() {
            Some(config) => Adapters::diesel(config).await?,
            None => Adapters::memory(),
        };

        let clock: Arc<dyn Clock + Send + Sync> = Arc::new(DefaultClock);
        let users = Arc::new(UserService::new(
            Arc::clone(&adapters.users),
            settings.password.hasher(),
            PasswordPolicy::default(),
            Arc::clone(&clock),
        ));
        let jwt = Arc::new(JwtService::new(
            secret,
            settings.jwt.access_token_ttl(),
            Arc::clone(&clock),
        ));
        let refresh_sessions = Arc::new(RefreshSessionService::new(
            Arc::clone(&adapters.refresh_sessions),
            Arc::clone(&adapters.users),
            settings.jwt.refresh_token_ttl(),
            Arc::clone(&clock),
        ));
        let todos = Arc::new(TodoService::new(
            Arc::clone(&adapters.todos),
            Arc::clone(&clock),
        ));
        let health = Arc::new(HealthService::new(Arc::clone(&adapters.health)));

        let request_info = RequestInfoService::new(settings.request_info.settings());
        let throttle_store: Arc<dyn ThrottleStore> = match settings.redis.throttle_config() {
            Some(config) => {
                let store = RedisThrottleStore::connect(config, Arc::clone(&clock)).await?;
                info!("using Redis throttle buckets");
                Arc::new(store)
            }
            None => Arc::new(InMemoryThrottleStore::new(Arc::clone(&clock))),
        };
        let auth = JwtAuthFactory::new(Arc::clone(&jwt), Arc::clone(&users));
        let ip_throttler = IpThrottlerFactory::new(Arc::clone(&throttle_store), request_info.clone());
        let user_throttler = UserThrottlerFactory::new(throttle_store);

        let mut routes = RouteTable::new();
        ReadyController::new(HealthController::new(health)).register(&mut routes)?;
        ReadyController::transactional(
            UserTokenController::new(
                Arc::clone(&jwt),
                Arc::clone(&users),
                refresh_sessions,
                &auth,
                &ip_throttler,
                &user_throttler,
            ),
            Arc::clone(&adapters.scope),
        )
        .register(&mut routes)?;
        ReadyController::transactional(
            UserController::new(Arc::clone(&users), &auth),
            Arc::clone(&adapters.scope),
        )
        .register(&mut routes)?;
        ReadyController::transactional(
            TodoController::new(todos, &auth),
            Arc::clone(&adapters.scope),
        )
        .register(&mut routes)?;
        let api = ApiFactory::new(routes, request_info)
            .with_allowed_hosts(settings.http.allowed_hosts());

        let mut registry = TaskRegistry::new();
        ReadyController::new(WorkerEvents::new(
            TelemetryConfigurator::new(),
            settings.app.version(),
            environment,
        ))
        .register(&mut registry)?;
        ReadyController::new(PingController).register(&mut registry)?;
        let (queue, receiver) = TaskQueue::bounded(settings.worker.queue_capacity());
        let worker = WorkerRuntime {
            worker: Worker::new(Arc::new(registry), settings.worker.concurrency()),
            receiver,
        };

        info!(%environment, "container built");
        Ok(Self {
            environment,
            api,
            tasks: TasksClient::new(queue),
            worker: Some(worker),
            settings,
        })
    }

    /// Settings the container was built from.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Deployment environment resolved from `APP_ENVIRONMENT`.
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Factory for per-worker actix apps; clone it into `HttpServer::new`.
    pub fn api_factory(&self) -> ApiFactory {
        self.api.clone()
    }

    /// Client for enqueueing work on the task worker.
    pub fn tasks(&self) -> TasksClient {
        self.tasks.clone()
    }

    /// The task worker; `None` once taken.
    pub fn take_worker(&mut self) -> Option<WorkerRuntime> {
        self.worker.take()
    }
}
