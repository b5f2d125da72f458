//! User account operations: sign-up, lookup and credential checks.

use std::sync::Arc;

use mockable::Clock;
use tracing::debug;

use super::password::PasswordContext;
use super::ports::{UserPersistenceError, UserRepository};
use super::user::validate_name;
use super::{
    EmailAddress, NewUser, PasswordHasher, PasswordPolicy, User, UserId, UserValidationError,
    Username,
};

/// Raw sign-up input; validated by [`UserService::create_user`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    pub is_staff: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    #[error(transparent)]
    Validation(#[from] UserValidationError),
    #[error(transparent)]
    Persistence(#[from] UserPersistenceError),
    #[error("password hashing failed: {message}")]
    Hashing { message: String },
}

/// Business operations on user accounts.
#[derive(Clone)]
pub struct UserService {
    users: Arc<dyn UserRepository>,
    hasher: PasswordHasher,
    policy: PasswordPolicy,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl UserService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        hasher: PasswordHasher,
        policy: PasswordPolicy,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            users,
            hasher,
            policy,
            clock,
        }
    }

    /// Validate the input, hash the password and persist the account.
    pub async fn create_user(&self, input: CreateUser) -> Result<User, UserServiceError> {
        let username = Username::new(input.username)?;
        let email = EmailAddress::new(&input.email)?;
        validate_name("first_name", &input.first_name)?;
        validate_name("last_name", &input.last_name)?;

        let password_hash = self.hash_password(input.password).await?;
        let user = self
            .users
            .create(NewUser {
                username,
                email,
                first_name: input.first_name,
                last_name: input.last_name,
                password_hash,
                is_staff: input.is_staff,
                is_superuser: false,
                date_joined: self.clock.utc(),
            })
            .await?;
        debug!(user_id = %user.id, "user created");
        Ok(user)
    }

    pub async fn get_user_by_id(&self, id: UserId) -> Result<Option<User>, UserServiceError> {
        Ok(self.users.find_by_id(id).await?)
    }

    pub async fn get_user_by_username_or_email(
        &self,
        username: &str,
        email: &str,
    ) -> Result<Option<User>, UserServiceError> {
        Ok(self.users.find_by_username_or_email(username, email).await?)
    }

    /// Authenticate credentials. Unknown, inactive or mismatching accounts
    /// all yield `None`.
    pub async fn get_user_by_username_and_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, UserServiceError> {
        let Some(user) = self.users.find_by_username(username).await? else {
            // Spend the same hashing effort so response timing does not
            // reveal whether the username exists.
            self.hash_password(password.to_owned()).await?;
            return Ok(None);
        };

        let verified = self
            .verify_password(password.to_owned(), user.password_hash.clone())
            .await?;
        if !verified || !user.is_active {
            return Ok(None);
        }
        Ok(Some(user))
    }

    /// Apply the strength policy against the would-be account attributes.
    pub fn is_valid_password(
        &self,
        password: &str,
        username: &str,
        email: &str,
        first_name: &str,
        last_name: &str,
    ) -> bool {
        self.policy.is_valid(
            password,
            &PasswordContext {
                username,
                email,
                first_name,
                last_name,
            },
        )
    }

    async fn hash_password(&self, password: String) -> Result<String, UserServiceError> {
        let hasher = self.hasher;
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|err| UserServiceError::Hashing {
                message: err.to_string(),
            })
    }

    async fn verify_password(
        &self,
        password: String,
        encoded: String,
    ) -> Result<bool, UserServiceError> {
        let hasher = self.hasher;
        tokio::task::spawn_blocking(move || hasher.verify(&password, &encoded))
            .await
            .map_err(|err| UserServiceError::Hashing {
                message: err.to_string(),
            })
    }
}
