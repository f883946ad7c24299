use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::auth::{Rejection, password::PasswordError};
use crate::repository::RepoError;
use crate::schema::Invariant;

/// ApiError
///
/// Every failure a handler or the gate can return. Rendered as
/// `{"errors":{"body":[message]}}` with the status chosen by [`ApiError::status`].
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("email or password is invalid")]
    InvalidCredentials,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Repo(RepoError::InvariantViolation(Invariant::SelfFollow)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Repo(RepoError::InvariantViolation(_)) => StatusCode::CONFLICT,
            ApiError::Repo(RepoError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Repo(RepoError::Forbidden(_)) => StatusCode::FORBIDDEN,
            ApiError::Repo(RepoError::SchemaMissing | RepoError::Database(_))
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Rejection> for ApiError {
    /// The rejection reason was already logged by the gate and is not echoed back.
    fn from(_: Rejection) -> Self {
        ApiError::Unauthenticated
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for ApiError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        ApiError::Internal(format!("token signing failed: {err}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "errors": { "body": [message] } }))).into_response()
    }
}
