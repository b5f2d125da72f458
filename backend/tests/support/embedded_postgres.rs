//! Embedded PostgreSQL databases for the Diesel suites.
//!
//! Every test gets its own temporary database on the shared cluster, with
//! the crate's embedded migrations applied through the same entry point the
//! container uses at startup.

use chrono::{DateTime, Utc};
use pg_embedded_setup_unpriv::TemporaryDatabase;
use pg_embedded_setup_unpriv::test_support::shared_cluster_handle;
use postgres::{Client, NoTls};
use scaffold::domain::ports::UserRepository;
use scaffold::domain::{EmailAddress, NewUser, User, Username};
use scaffold::outbound::persistence::{DbPool, DieselUserRepository, PoolConfig, run_migrations};
use tokio::runtime::Runtime;

use super::format_postgres_error;

/// A migrated database with a pool and the runtime to drive it.
///
/// Fields drop in order: the pool closes its connections and the runtime
/// stops before the temporary database is dropped.
pub struct MigratedDatabase {
    pub pool: DbPool,
    pub url: String,
    /// Reused for every async call in a test; the suites stay synchronous
    /// so cluster bootstrap never runs inside a Tokio runtime.
    pub runtime: Runtime,
    _database: TemporaryDatabase,
}

impl MigratedDatabase {
    /// Create a temporary database, migrate it and open a small pool.
    pub fn provision() -> Result<Self, String> {
        let runtime = Runtime::new().map_err(|err| err.to_string())?;
        let cluster = shared_cluster_handle().map_err(|err| err.to_string())?;
        let database = cluster
            .create_temporary_database()
            .map_err(|err| format!("create database: {err:?}"))?;
        let url = database.url().to_string();

        runtime
            .block_on(run_migrations(&url))
            .map_err(|err| err.to_string())?;
        let config = PoolConfig::new(url.as_str())
            .with_max_size(4)
            .with_min_idle(Some(1));
        let pool = runtime
            .block_on(DbPool::new(config))
            .map_err(|err| err.to_string())?;

        Ok(Self {
            pool,
            url,
            runtime,
            _database: database,
        })
    }

    /// Insert a user the other tables can reference.
    pub fn seed_user(&self, username: &str) -> User {
        let users = DieselUserRepository::new(self.pool.clone());
        self.runtime
            .block_on(users.create(new_user(username)))
            .expect("seed user")
    }

    /// Count rows in `table` over a connection outside the pool.
    pub fn count_rows(&self, table: &str) -> i64 {
        let mut client = Client::connect(&self.url, NoTls)
            .unwrap_or_else(|err| panic!("connect: {}", format_postgres_error(&err)));
        let row = client
            .query_one(format!("SELECT count(*) FROM {table}").as_str(), &[])
            .unwrap_or_else(|err| panic!("count {table}: {}", format_postgres_error(&err)));
        row.get(0)
    }
}

/// Whole-second timestamp; PostgreSQL keeps microseconds only.
pub fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).expect("timestamp in range")
}

pub fn new_user(username: &str) -> NewUser {
    NewUser {
        username: Username::new(username).expect("valid username"),
        email: EmailAddress::new(format!("{username}@example.com")).expect("valid email"),
        first_name: String::new(),
        last_name: String::new(),
        password_hash: "pbkdf2_sha256$1$salt$digest".to_owned(),
        is_staff: false,
        is_superuser: false,
        date_joined: at(1_700_000_000),
    }
}
