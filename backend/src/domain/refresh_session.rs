//! Opaque refresh tokens backed by stored sessions.
//!
//! The raw token is returned to the client exactly once; only its SHA-256
//! fingerprint is persisted. Rotation revokes the presented session and
//! issues a new one for the same user, so each token is single use.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use mockable::Clock;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use super::ports::{
    RefreshSessionPersistenceError, RefreshSessionRepository, UserPersistenceError,
    UserRepository,
};
use super::{User, UserId};

const TOKEN_BYTES: usize = 32;

/// Stored refresh session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSession {
    pub id: Uuid,
    pub user_id: UserId,
    pub token_hash: String,
    pub user_agent: String,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RefreshSession {
    /// Neither revoked nor past its expiry at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// A freshly created session together with the raw token handed to the
/// client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedRefreshSession {
    pub session: RefreshSession,
    pub refresh_token: String,
}

/// Token-level failures surfaced to clients.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshTokenError {
    #[error("refresh token is invalid")]
    Invalid,
    #[error("refresh token has expired or was revoked")]
    Expired,
    #[error("refresh token belongs to an inactive account")]
    InactiveUser,
}

#[derive(Debug, thiserror::Error)]
pub enum RefreshSessionError {
    #[error(transparent)]
    Token(#[from] RefreshTokenError),
    #[error(transparent)]
    Sessions(#[from] RefreshSessionPersistenceError),
    #[error(transparent)]
    Users(#[from] UserPersistenceError),
}

/// SHA-256 fingerprint of a raw token, hex encoded.
pub fn fingerprint(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn generate_token() -> String {
    let mut bytes = [0_u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Clone)]
pub struct RefreshSessionService {
    sessions: Arc<dyn RefreshSessionRepository>,
    users: Arc<dyn UserRepository>,
    ttl: Duration,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl RefreshSessionService {
    pub fn new(
        sessions: Arc<dyn RefreshSessionRepository>,
        users: Arc<dyn UserRepository>,
        ttl: Duration,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            sessions,
            users,
            ttl,
            clock,
        }
    }

    pub async fn create_refresh_session(
        &self,
        user: &User,
        user_agent: &str,
        ip_address: Option<&str>,
    ) -> Result<IssuedRefreshSession, RefreshSessionError> {
        self.issue(user.id, user_agent.to_owned(), ip_address.map(str::to_owned))
            .await
    }

    /// Exchange a live token for a new one, revoking the old session.
    pub async fn rotate_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<IssuedRefreshSession, RefreshSessionError> {
        let now = self.clock.utc();
        let session = self
            .sessions
            .find_by_token_hash(&fingerprint(refresh_token))
            .await?
            .ok_or(RefreshTokenError::Invalid)?;
        if !session.is_active(now) {
            debug!(session_id = %session.id, "refresh token rejected as expired or revoked");
            return Err(RefreshTokenError::Expired.into());
        }

        let user = self.users.find_by_id(session.user_id).await?;
        if !user.is_some_and(|user| user.is_active) {
            return Err(RefreshTokenError::InactiveUser.into());
        }

        self.sessions.revoke(session.id, now).await?;
        let issued = self
            .issue(session.user_id, session.user_agent, session.ip_address)
            .await?;
        info!(
            previous = %session.id,
            current = %issued.session.id,
            "refresh token rotated"
        );
        Ok(issued)
    }

    /// Revoke a token owned by `user`. Unknown tokens and tokens owned by
    /// someone else are reported as invalid; revoking twice is a no-op.
    pub async fn revoke_refresh_token(
        &self,
        refresh_token: &str,
        user: &User,
    ) -> Result<(), RefreshSessionError> {
        let session = self
            .sessions
            .find_by_token_hash(&fingerprint(refresh_token))
            .await?
            .filter(|session| session.user_id == user.id)
            .ok_or(RefreshTokenError::Invalid)?;
        if session.revoked_at.is_none() {
            self.sessions.revoke(session.id, self.clock.utc()).await?;
        }
        Ok(())
    }

    async fn issue(
        &self,
        user_id: UserId,
        user_agent: String,
        ip_address: Option<String>,
    ) -> Result<IssuedRefreshSession, RefreshSessionError> {
        let now = self.clock.utc();
        let refresh_token = generate_token();
        let session = RefreshSession {
            id: Uuid::new_v4(),
            user_id,
            token_hash: fingerprint(&refresh_token),
            user_agent,
            ip_address,
            created_at: now,
            expires_at: now + self.ttl,
            revoked_at: None,
        };
        self.sessions.insert(&session).await?;
        Ok(IssuedRefreshSession {
            session,
            refresh_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{MockRefreshSessionRepository, MockUserRepository};
    use crate::domain::{EmailAddress, Username};
    use crate::test_support::MutableClock;
    use rstest::{fixture, rstest};

    const NOW: i64 = 1_700_000_000;

    #[fixture]
    fn clock() -> Arc<MutableClock> {
        Arc::new(MutableClock::at(NOW))
    }

    fn user(id: i64, is_active: bool) -> User {
        User {
            id: UserId::new(id),
            username: Username::new(format!("user{id}")).expect("valid username"),
            email: EmailAddress::new(format!("user{id}@example.com")).expect("valid email"),
            first_name: String::new(),
            last_name: String::new(),
            password_hash: String::new(),
            is_staff: false,
            is_superuser: false,
            is_active,
            date_joined: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    fn stored(token: &str, owner: i64, clock: &MutableClock) -> RefreshSession {
        let now = clock.utc();
        RefreshSession {
            id: Uuid::new_v4(),
            user_id: UserId::new(owner),
            token_hash: fingerprint(token),
            user_agent: "curl/8".into(),
            ip_address: Some("10.0.0.1".into()),
            created_at: now,
            expires_at: now + Duration::days(1),
            revoked_at: None,
        }
    }

    fn service(
        sessions: MockRefreshSessionRepository,
        users: MockUserRepository,
        clock: Arc<MutableClock>,
    ) -> RefreshSessionService {
        RefreshSessionService::new(Arc::new(sessions), Arc::new(users), Duration::days(30), clock)
    }

    #[rstest]
    fn fingerprint_is_sha256_hex() {
        assert_eq!(
            fingerprint("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn create_stores_only_the_fingerprint(clock: Arc<MutableClock>) {
        let mut sessions = MockRefreshSessionRepository::new();
        sessions
            .expect_insert()
            .withf(|session| session.token_hash.len() == 64 && session.ip_address.is_none())
            .times(1)
            .returning(|_| Ok(()));

        let issued = service(sessions, MockUserRepository::new(), clock)
            .create_refresh_session(&user(1, true), "agent", None)
            .await
            .expect("session created");

        assert_eq!(issued.session.token_hash, fingerprint(&issued.refresh_token));
        assert_eq!(
            issued.session.expires_at - issued.session.created_at,
            Duration::days(30)
        );
    }

    #[rstest]
    #[tokio::test]
    async fn rotate_rejects_unknown_tokens(clock: Arc<MutableClock>) {
        let mut sessions = MockRefreshSessionRepository::new();
        sessions.expect_find_by_token_hash().returning(|_| Ok(None));

        let err = service(sessions, MockUserRepository::new(), clock)
            .rotate_refresh_token("nope")
            .await
            .expect_err("unknown token");
        assert!(matches!(
            err,
            RefreshSessionError::Token(RefreshTokenError::Invalid)
        ));
    }

    #[rstest]
    #[case::revoked(true, 0)]
    #[case::expired(false, 2)]
    #[tokio::test]
    async fn rotate_rejects_dead_sessions(
        clock: Arc<MutableClock>,
        #[case] revoked: bool,
        #[case] days_later: i64,
    ) {
        let mut session = stored("tok", 1, &clock);
        if revoked {
            session.revoked_at = Some(clock.utc());
        }
        clock.advance(Duration::days(days_later));

        let mut sessions = MockRefreshSessionRepository::new();
        sessions
            .expect_find_by_token_hash()
            .returning(move |_| Ok(Some(session.clone())));
        sessions.expect_revoke().never();

        let err = service(sessions, MockUserRepository::new(), clock)
            .rotate_refresh_token("tok")
            .await
            .expect_err("dead session");
        assert!(matches!(
            err,
            RefreshSessionError::Token(RefreshTokenError::Expired)
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn rotate_revokes_old_and_issues_new(clock: Arc<MutableClock>) {
        let session = stored("tok", 7, &clock);
        let old_id = session.id;

        let mut sessions = MockRefreshSessionRepository::new();
        sessions
            .expect_find_by_token_hash()
            .withf(|hash| hash == fingerprint("tok"))
            .returning(move |_| Ok(Some(session.clone())));
        sessions
            .expect_revoke()
            .withf(move |id, _| *id == old_id)
            .times(1)
            .returning(|_, _| Ok(()));
        sessions.expect_insert().times(1).returning(|_| Ok(()));

        let mut users = MockUserRepository::new();
        users
            .expect_find_by_id()
            .returning(|id| Ok(Some(user(id.get(), true))));

        let issued = service(sessions, users, clock)
            .rotate_refresh_token("tok")
            .await
            .expect("rotation succeeds");
        assert_eq!(issued.session.user_id, UserId::new(7));
        assert_ne!(issued.session.id, old_id);
        assert_eq!(issued.session.user_agent, "curl/8");
        assert_ne!(issued.refresh_token, "tok");
    }

    #[rstest]
    #[tokio::test]
    async fn rotate_refuses_inactive_accounts(clock: Arc<MutableClock>) {
        let session = stored("tok", 7, &clock);
        let mut sessions = MockRefreshSessionRepository::new();
        sessions
            .expect_find_by_token_hash()
            .returning(move |_| Ok(Some(session.clone())));
        let mut users = MockUserRepository::new();
        users
            .expect_find_by_id()
            .returning(|id| Ok(Some(user(id.get(), false))));

        let err = service(sessions, users, clock)
            .rotate_refresh_token("tok")
            .await
            .expect_err("inactive user");
        assert!(matches!(
            err,
            RefreshSessionError::Token(RefreshTokenError::InactiveUser)
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn revoke_rejects_foreign_tokens(clock: Arc<MutableClock>) {
        let session = stored("tok", 2, &clock);
        let mut sessions = MockRefreshSessionRepository::new();
        sessions
            .expect_find_by_token_hash()
            .returning(move |_| Ok(Some(session.clone())));
        sessions.expect_revoke().never();

        let err = service(sessions, MockUserRepository::new(), clock)
            .revoke_refresh_token("tok", &user(1, true))
            .await
            .expect_err("foreign token");
        assert!(matches!(
            err,
            RefreshSessionError::Token(RefreshTokenError::Invalid)
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn revoke_marks_owned_sessions(clock: Arc<MutableClock>) {
        let session = stored("tok", 1, &clock);
        let mut sessions = MockRefreshSessionRepository::new();
        sessions
            .expect_find_by_token_hash()
            .returning(move |_| Ok(Some(session.clone())));
        sessions.expect_revoke().times(1).returning(|_, _| Ok(()));

        service(sessions, MockUserRepository::new(), clock)
            .revoke_refresh_token("tok", &user(1, true))
            .await
            .expect("revocation succeeds");
    }
}
