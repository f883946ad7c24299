use chrono::{DateTime, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Claims
///
/// Payload of every bearer token this service issues and accepts (HS256).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject (sub): the user's UUID.
    pub sub: Uuid,
    pub username: String,
    /// Issued At (iat), seconds since the epoch.
    pub iat: i64,
    /// Expiration Time (exp), seconds since the epoch. The token is dead once `now >= exp`.
    pub exp: i64,
}

/// Identity
///
/// The verified subject of a token. Attached to the call context once the gate admits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

/// VerificationError
///
/// Why a token was refused. The kinds stay distinct for diagnostics; callers only ever see
/// a generic "unauthenticated".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("token is malformed")]
    MalformedToken,
    #[error("token signature does not match")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
}

fn validation(check_signature: bool) -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    // Expiry is compared by hand against the caller's clock.
    validation.validate_exp = false;
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp", "sub"]);
    if !check_signature {
        validation.insecure_disable_signature_validation();
    }
    validation
}

/// TokenVerifier
///
/// Stateless check of `(token, secret, now)`. The secret is fixed at construction and the
/// verifier is shared read-only across requests.
pub struct TokenVerifier {
    key: DecodingKey,
    claims_only: Validation,
    full: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            claims_only: validation(false),
            full: validation(true),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Identity, VerificationError> {
        self.verify_at(token, Utc::now())
    }

    /// Decodes the claims first and rejects an expired token before looking at the
    /// signature, so expiry is reported the same way whatever the signature says.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Identity, VerificationError> {
        if token.is_empty() {
            return Err(VerificationError::MalformedToken);
        }

        let claims = decode::<Claims>(token, &self.key, &self.claims_only)
            .map_err(|_| VerificationError::MalformedToken)?
            .claims;

        if now.timestamp() >= claims.exp {
            return Err(VerificationError::Expired);
        }

        decode::<Claims>(token, &self.key, &self.full).map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => VerificationError::InvalidSignature,
            _ => VerificationError::MalformedToken,
        })?;

        let expires_at =
            DateTime::from_timestamp(claims.exp, 0).ok_or(VerificationError::MalformedToken)?;

        Ok(Identity {
            user_id: claims.sub,
            username: claims.username,
            expires_at,
        })
    }
}

/// Upper bound on a token lifetime. Longer configured lifetimes are clamped to it.
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// TokenIssuer
///
/// Signs tokens for login, registration and profile reads with the same process-wide secret
/// the verifier checks against.
pub struct TokenIssuer {
    key: EncodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            key: EncodingKey::from_secret(secret),
            ttl: ttl.min(MAX_TOKEN_TTL),
        }
    }

    pub fn issue(&self, user_id: Uuid, username: &str) -> Result<String, jsonwebtoken::errors::Error> {
        self.issue_at(user_id, username, Utc::now())
    }

    pub fn issue_at(
        &self,
        user_id: Uuid,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let iat = now.timestamp();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: user_id,
            username: username.to_string(),
            iat,
            exp: iat.saturating_add(ttl),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.key)
    }
}
