use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::observability::metrics;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No `x-node-id` / `x-token` headers on the request
    #[error("Authentication credentials required")]
    MissingCredentials,

    /// Unknown node, bad signature, undecodable payload or role mismatch.
    /// Collapsed into one variant so callers cannot tell which check failed.
    #[error("Invalid authentication credentials")]
    InvalidCredentials,

    /// Token timestamp outside the accepted window
    #[error("Authentication token has expired")]
    ExpiredToken,

    /// Authenticated, but the role may not call this operation
    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::ExpiredToken => "expired_token",
            AuthError::Forbidden(_) => "forbidden",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let code = self.code();
        metrics::record_auth_failure(code);

        let body = json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}
