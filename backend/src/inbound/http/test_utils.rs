//! Test helpers for inbound HTTP components.
//!
//! [`Fixture`] wires the domain services over the in-memory adapters with a
//! controllable clock so controller and dependency tests can run end to end.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::Clock;
use zeroize::Zeroizing;

use crate::domain::ports::{ThrottleStore, TransactionScope, UserRepository};
use crate::domain::{
    EmailAddress, HealthService, JwtService, NewUser, PasswordHasher, PasswordPolicy,
    RefreshSessionService, TodoService, User, UserId, UserService, Username,
};
use crate::outbound::memory::{
    MemoryRefreshSessionRepository, MemoryStore, MemoryTodoRepository, MemoryTransactionScope,
    MemoryUserRepository,
};
use crate::outbound::throttle::InMemoryThrottleStore;
use crate::test_support::MutableClock;

use super::auth::JwtAuthFactory;
use super::request_info::RequestInfoService;
use super::throttle::{IpThrottlerFactory, UserThrottlerFactory};

/// Password accepted by the default policy.
pub const STRONG_PASSWORD: &str = "correct-horse-battery";

/// Cheap hashing keeps tests fast.
pub const TEST_HASHER: PasswordHasher = PasswordHasher::new(2);

/// A user that never touched a repository.
pub fn sample_user(id: i64, username: &str) -> User {
    User {
        id: UserId::new(id),
        username: Username::new(username).expect("valid username"),
        email: EmailAddress::new(format!("{username}@example.com")).expect("valid email"),
        first_name: String::new(),
        last_name: String::new(),
        password_hash: String::new(),
        is_staff: false,
        is_superuser: false,
        is_active: true,
        date_joined: DateTime::<Utc>::UNIX_EPOCH,
    }
}

pub struct Fixture {
    pub clock: Arc<MutableClock>,
    pub store: Arc<MemoryStore>,
    pub scope: Arc<dyn TransactionScope>,
    pub users: Arc<UserService>,
    pub jwt: Arc<JwtService>,
    pub refresh_sessions: Arc<RefreshSessionService>,
    pub todos: Arc<TodoService>,
    pub health: Arc<HealthService>,
    pub throttle_store: Arc<dyn ThrottleStore>,
    pub request_info: RequestInfoService,
    user_repository: Arc<dyn UserRepository>,
}

impl Fixture {
    pub fn new() -> Self {
        let clock = Arc::new(MutableClock::at(1_700_000_000));
        let dyn_clock: Arc<dyn Clock + Send + Sync> = clock.clone();
        let store = MemoryStore::new();
        let user_repository: Arc<dyn UserRepository> =
            Arc::new(MemoryUserRepository::new(Arc::clone(&store)));
        let users = Arc::new(UserService::new(
            Arc::clone(&user_repository),
            TEST_HASHER,
            PasswordPolicy::default(),
            Arc::clone(&dyn_clock),
        ));
        let jwt = Arc::new(JwtService::new(
            Zeroizing::new(b"test-secret".to_vec()),
            chrono::Duration::minutes(15),
            Arc::clone(&dyn_clock),
        ));
        let refresh_sessions = Arc::new(RefreshSessionService::new(
            Arc::new(MemoryRefreshSessionRepository::new(Arc::clone(&store))),
            Arc::clone(&user_repository),
            chrono::Duration::days(30),
            Arc::clone(&dyn_clock),
        ));
        let todos = Arc::new(TodoService::new(
            Arc::new(MemoryTodoRepository::new(Arc::clone(&store))),
            Arc::clone(&dyn_clock),
        ));
        let health = Arc::new(HealthService::new(Arc::new(
            crate::domain::ports::AlwaysHealthy,
        )));
        Self {
            throttle_store: Arc::new(InMemoryThrottleStore::new(Arc::clone(&dyn_clock))),
            scope: Arc::new(MemoryTransactionScope::new(Arc::clone(&store))),
            request_info: RequestInfoService::default(),
            clock,
            store,
            users,
            jwt,
            refresh_sessions,
            todos,
            health,
            user_repository,
        }
    }

    pub fn auth(&self) -> JwtAuthFactory {
        JwtAuthFactory::new(Arc::clone(&self.jwt), Arc::clone(&self.users))
    }

    pub fn ip_throttler(&self) -> IpThrottlerFactory {
        IpThrottlerFactory::new(Arc::clone(&self.throttle_store), self.request_info.clone())
    }

    pub fn user_throttler(&self) -> UserThrottlerFactory {
        UserThrottlerFactory::new(Arc::clone(&self.throttle_store))
    }

    async fn insert(&self, username: &str, is_staff: bool) -> User {
        self.user_repository
            .create(NewUser {
                username: Username::new(username).expect("valid username"),
                email: EmailAddress::new(format!("{username}@example.com"))
                    .expect("valid email"),
                first_name: String::new(),
                last_name: String::new(),
                password_hash: TEST_HASHER.hash(STRONG_PASSWORD),
                is_staff,
                is_superuser: false,
                date_joined: self.clock.utc(),
            })
            .await
            .expect("user inserted")
    }

    /// Active regular user whose password is [`STRONG_PASSWORD`].
    pub async fn user(&self, username: &str) -> User {
        self.insert(username, false).await
    }

    pub async fn staff(&self, username: &str) -> User {
        self.insert(username, true).await
    }

    pub async fn deactivate(&self, user: &User) {
        let id = user.id.get();
        self.store
            .write(|tables| {
                if let Some(stored) = tables.users.get_mut(&id) {
                    stored.is_active = false;
                }
            })
            .await;
    }

    pub fn access_token(&self, user: &User) -> String {
        self.jwt.issue_access_token(user.id).expect("token issued")
    }
}
