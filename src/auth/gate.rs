use super::classifier::OperationClassifier;
use super::token::{Identity, TokenVerifier, VerificationError};
use axum::http::{HeaderMap, header};
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// CallIdentity
///
/// What the gate attaches to an admitted call: exactly one of these per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallIdentity {
    /// The operation is exempt; no token was looked at.
    Anonymous,
    Authenticated(Identity),
}

impl CallIdentity {
    pub fn user_id(&self) -> Option<Uuid> {
        self.identity().map(|i| i.user_id)
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            CallIdentity::Anonymous => None,
            CallIdentity::Authenticated(identity) => Some(identity),
        }
    }
}

/// Internal reason behind a rejection. Logged, never returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("no bearer token supplied")]
    MissingToken,
    #[error(transparent)]
    Verification(#[from] VerificationError),
}

/// Rejection
///
/// The only way a protected call can fail at the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("unauthenticated")]
    Unauthenticated(RejectReason),
}

impl Rejection {
    pub fn reason(&self) -> RejectReason {
        match self {
            Rejection::Unauthenticated(reason) => *reason,
        }
    }
}

/// AuthGate
///
/// Composes the classifier and the verifier. Per call:
/// classify, then either skip (anonymous) or verify the bearer token, then admit or reject.
/// Holds no mutable state and performs no storage I/O.
pub struct AuthGate {
    classifier: OperationClassifier,
    verifier: TokenVerifier,
}

impl AuthGate {
    pub fn new(classifier: OperationClassifier, verifier: TokenVerifier) -> Self {
        Self {
            classifier,
            verifier,
        }
    }

    pub fn classifier(&self) -> &OperationClassifier {
        &self.classifier
    }

    pub fn admit(&self, operation: &str, bearer: Option<&str>) -> Result<CallIdentity, Rejection> {
        self.admit_at(operation, bearer, Utc::now())
    }

    pub fn admit_at(
        &self,
        operation: &str,
        bearer: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<CallIdentity, Rejection> {
        if !self.classifier.requires_auth(operation) {
            tracing::debug!(operation, "auth skipped for exempt operation");
            return Ok(CallIdentity::Anonymous);
        }

        let verified = match bearer {
            None => Err(RejectReason::MissingToken),
            Some(token) => self.verifier.verify_at(token, now).map_err(RejectReason::from),
        };

        match verified {
            Ok(identity) => {
                tracing::debug!(operation, user_id = %identity.user_id, "call admitted");
                Ok(CallIdentity::Authenticated(identity))
            }
            Err(reason) => {
                tracing::warn!(operation, %reason, "call rejected");
                Err(Rejection::Unauthenticated(reason))
            }
        }
    }
}

/// Pulls the token out of `Authorization: Bearer <token>` (or the Conduit-style
/// `Token <token>`). Any other shape counts as no token.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("Token "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
