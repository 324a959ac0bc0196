//! RPC authentication middleware.
//!
//! Resolves the `x-node-id` / `x-token` header pair into a [`Principal`] and
//! stores it in request extensions. With `auth.enabled = false` every request
//! runs as an anonymous admin.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use http::HeaderMap;

use crate::{
    AppState,
    auth::{AuthError, Principal},
};

/// Header carrying the caller's node id.
pub const NODE_ID_HEADER: &str = "x-node-id";

/// Header carrying the signed token.
pub const TOKEN_HEADER: &str = "x-token";

pub async fn rpc_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let principal = if state.config.auth.enabled {
        authenticate(&state, req.headers())?
    } else {
        Principal::anonymous_admin()
    };

    tracing::debug!(
        role = %principal.role,
        node_id = principal.node_id.as_deref().unwrap_or("-"),
        "RPC caller authenticated"
    );
    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Principal, AuthError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let (Some(node_id), Some(token)) = (header(NODE_ID_HEADER), header(TOKEN_HEADER)) else {
        return Err(AuthError::MissingCredentials);
    };

    let now = chrono::Utc::now().timestamp();
    state.verifier.verify(node_id, token, now).inspect_err(|e| {
        tracing::warn!(node_id, error = %e, "RPC authentication failed");
    })
}
