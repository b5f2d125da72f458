//! HS256 access tokens.
//!
//! Tokens are compact JWS strings (`header.claims.signature`, each part
//! base64url without padding) signed with HMAC-SHA256. Only access tokens are
//! issued here; refresh tokens are opaque and handled by
//! [`RefreshSessionService`](super::RefreshSessionService).

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Duration;
use hmac::{Hmac, Mac};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::UserId;

const ACCESS_TYPE: &str = "access";
const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JwtError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
    #[error("token is not an access token")]
    WrongType,
    #[error("token subject is not a user id")]
    InvalidSubject,
    #[error("failed to encode token: {message}")]
    Encoding { message: String },
}

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    pub typ: String,
}

impl AccessClaims {
    pub fn user_id(&self) -> Result<UserId, JwtError> {
        self.sub
            .parse::<i64>()
            .map(UserId::new)
            .map_err(|_| JwtError::InvalidSubject)
    }
}

/// Issues and validates signed access tokens.
#[derive(Clone)]
pub struct JwtService {
    secret: Arc<Zeroizing<Vec<u8>>>,
    access_ttl: Duration,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl std::fmt::Debug for JwtService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtService")
            .field("access_ttl", &self.access_ttl)
            .finish_non_exhaustive()
    }
}

impl JwtService {
    pub fn new(
        secret: Zeroizing<Vec<u8>>,
        access_ttl: Duration,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            secret: Arc::new(secret),
            access_ttl,
            clock,
        }
    }

    /// Sign a fresh access token for `user_id`.
    pub fn issue_access_token(&self, user_id: UserId) -> Result<String, JwtError> {
        let now = self.clock.utc();
        let claims = AccessClaims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
            jti: Uuid::new_v4().simple().to_string(),
            typ: ACCESS_TYPE.to_owned(),
        };
        let payload = serde_json::to_vec(&claims).map_err(|err| JwtError::Encoding {
            message: err.to_string(),
        })?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(HEADER),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let signature = URL_SAFE_NO_PAD.encode(self.sign(signing_input.as_bytes())?);
        Ok(format!("{signing_input}.{signature}"))
    }

    /// Verify signature, expiry and token type, returning the claims.
    pub fn decode_access_token(&self, token: &str) -> Result<AccessClaims, JwtError> {
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(JwtError::Malformed);
        };

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| JwtError::Malformed)?;
        let signing_input = &token[..header.len() + 1 + payload.len()];
        self.verify(signing_input.as_bytes(), &signature)?;

        let header: serde_json::Value = decode_segment(header)?;
        if header.get("alg").and_then(serde_json::Value::as_str) != Some("HS256") {
            return Err(JwtError::Malformed);
        }
        let claims: AccessClaims = decode_segment(payload)?;
        if claims.typ != ACCESS_TYPE {
            return Err(JwtError::WrongType);
        }
        if claims.exp <= self.clock.utc().timestamp() {
            return Err(JwtError::Expired);
        }
        Ok(claims)
    }

    fn mac(&self) -> Result<Hmac<Sha256>, JwtError> {
        Hmac::<Sha256>::new_from_slice(self.secret.as_slice()).map_err(|err| JwtError::Encoding {
            message: err.to_string(),
        })
    }

    fn sign(&self, input: &[u8]) -> Result<Vec<u8>, JwtError> {
        let mut mac = self.mac()?;
        mac.update(input);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn verify(&self, input: &[u8], signature: &[u8]) -> Result<(), JwtError> {
        let mut mac = self.mac()?;
        mac.update(input);
        mac.verify_slice(signature)
            .map_err(|_| JwtError::InvalidSignature)
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, JwtError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| JwtError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| JwtError::Malformed)
}
