//! Selective authentication.
//!
//! The request path is: resolve the operation id from the matched route, ask the
//! [`OperationClassifier`] whether it needs a token, verify the token with the
//! [`TokenVerifier`] when it does, then attach a [`CallIdentity`] or reject with 401.
//! [`AuthGate`] does the deciding; [`gate_middleware`] only adapts it to axum.

use axum::{
    extract::{FromRequestParts, MatchedPath, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::error::ApiError;

pub mod classifier;
pub mod gate;
pub mod operation;
pub mod password;
pub mod token;

pub use classifier::{DEFAULT_EXEMPTIONS, OperationClassifier};
pub use gate::{AuthGate, CallIdentity, RejectReason, Rejection, bearer_token};
pub use operation::{Operation, operation_id};
pub use token::{Claims, Identity, MAX_TOKEN_TTL, TokenIssuer, TokenVerifier, VerificationError};

/// GateState
///
/// The gate shared by every request. Built once at startup, never mutated.
pub type GateState = Arc<AuthGate>;

/// gate_middleware
///
/// Runs the gate for every API route. On rejection the request ends here with a generic
/// 401; on admission exactly one `CallIdentity` is placed in the request extensions.
pub async fn gate_middleware(
    State(gate): State<GateState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());
    let operation = operation_id(request.method(), &route);

    let identity = gate.admit(&operation, bearer_token(request.headers()))?;
    request.extensions_mut().insert(identity);

    Ok(next.run(request).await)
}

/// CallIdentity Extractor
///
/// Reads what the gate attached. A handler mounted outside the gate gets a 401 rather
/// than an invented identity.
impl<S> FromRequestParts<S> for CallIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallIdentity>()
            .cloned()
            .ok_or(ApiError::Unauthenticated)
    }
}

/// AuthUser
///
/// The verified identity of a protected call. Handlers that take `AuthUser` can only run
/// after the gate verified a token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Identity);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<CallIdentity>() {
            Some(CallIdentity::Authenticated(identity)) => Ok(AuthUser(identity.clone())),
            _ => Err(ApiError::Unauthenticated),
        }
    }
}
