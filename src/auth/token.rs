//! Time-boxed, HMAC-signed RPC tokens.
//!
//! A token is `base64url(payload) "." base64url(HMAC-SHA256(secret, base64url(payload)))`
//! where the payload is JSON `{"timestamp", "role", "tenant_id"}`. The caller
//! also sends its node id, which selects the shared secret and the role the
//! token must claim.

use std::collections::HashMap;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::{AuthError, Principal, Role};
use crate::config::AuthConfig;

type HmacSha256 = Hmac<Sha256>;

/// Signed token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issue time, unix seconds
    pub timestamp: i64,
    pub role: Role,
    #[serde(default)]
    pub tenant_id: i64,
}

fn signature(secret: &str, payload_b64: &str) -> Result<Vec<u8>, AuthError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidCredentials)?;
    mac.update(payload_b64.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Mint a token for `claims` signed with `secret`.
pub fn issue_token(secret: &str, claims: &TokenClaims) -> Result<String, AuthError> {
    let payload = serde_json::to_vec(claims).map_err(|_| AuthError::InvalidCredentials)?;
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
    let sig = signature(secret, &payload_b64)?;
    Ok(format!("{payload_b64}.{}", URL_SAFE_NO_PAD.encode(sig)))
}

struct NodeCredential {
    secret: String,
    role: Role,
}

/// Verifies tokens against the configured node credentials.
pub struct TokenVerifier {
    nodes: HashMap<String, NodeCredential>,
    max_age_secs: i64,
}

impl TokenVerifier {
    pub fn from_config(config: &AuthConfig) -> Self {
        let nodes = config
            .api_tokens
            .iter()
            .map(|t| {
                (
                    t.node_id.clone(),
                    NodeCredential {
                        secret: t.secret.clone(),
                        role: t.role,
                    },
                )
            })
            .collect();
        Self {
            nodes,
            max_age_secs: i64::try_from(config.max_token_age_secs).unwrap_or(i64::MAX),
        }
    }

    /// Resolve a presented token into a principal.
    ///
    /// `now` is unix seconds. Tokens whose timestamp differs from `now` by more
    /// than the configured maximum age, in either direction, are rejected.
    pub fn verify(&self, node_id: &str, token: &str, now: i64) -> Result<Principal, AuthError> {
        let Some(credential) = self.nodes.get(node_id) else {
            tracing::debug!(node_id, "Token presented for unknown node");
            return Err(AuthError::InvalidCredentials);
        };

        let (payload_b64, sig_b64) = token
            .split_once('.')
            .ok_or(AuthError::InvalidCredentials)?;
        let provided = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| AuthError::InvalidCredentials)?;
        let expected = signature(&credential.secret, payload_b64)?;
        if !bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
            tracing::debug!(node_id, "Token signature mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| AuthError::InvalidCredentials)?;
        let claims: TokenClaims =
            serde_json::from_slice(&payload).map_err(|_| AuthError::InvalidCredentials)?;

        if claims.role != credential.role {
            tracing::debug!(node_id, role = %claims.role, "Token role does not match node");
            return Err(AuthError::InvalidCredentials);
        }

        // Symmetric window: tokens stamped more than max_age in the future are
        // rejected as well as stale ones.
        let age = now.saturating_sub(claims.timestamp).saturating_abs();
        if age > self.max_age_secs {
            return Err(AuthError::ExpiredToken);
        }

        Ok(Principal {
            role: claims.role,
            identity: claims.tenant_id,
            node_id: Some(node_id.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiTokenConfig;

    const NOW: i64 = 1_700_000_000;

    fn verifier() -> TokenVerifier {
        TokenVerifier::from_config(&AuthConfig {
            enabled: true,
            max_token_age_secs: 600,
            api_tokens: vec![
                ApiTokenConfig {
                    node_id: "edge-1".into(),
                    secret: "edge-secret".into(),
                    role: Role::Node,
                },
                ApiTokenConfig {
                    node_id: "ops".into(),
                    secret: "ops-secret".into(),
                    role: Role::Admin,
                },
            ],
        })
    }

    fn node_token(timestamp: i64) -> String {
        issue_token(
            "edge-secret",
            &TokenClaims {
                timestamp,
                role: Role::Node,
                tenant_id: 0,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token_resolves_principal() {
        let token = issue_token(
            "ops-secret",
            &TokenClaims {
                timestamp: NOW,
                role: Role::Admin,
                tenant_id: 42,
            },
        )
        .unwrap();
        let principal = verifier().verify("ops", &token, NOW + 5).unwrap();
        assert_eq!(principal.role, Role::Admin);
        assert_eq!(principal.identity, 42);
        assert_eq!(principal.node_id.as_deref(), Some("ops"));
    }

    #[test]
    fn test_token_age_window() {
        let v = verifier();
        assert!(v.verify("edge-1", &node_token(NOW - 600), NOW).is_ok());
        assert!(matches!(
            v.verify("edge-1", &node_token(NOW - 601), NOW),
            Err(AuthError::ExpiredToken)
        ));
        assert!(matches!(
            v.verify("edge-1", &node_token(NOW + 601), NOW),
            Err(AuthError::ExpiredToken)
        ));
    }

    #[test]
    fn test_unknown_node_rejected() {
        assert!(matches!(
            verifier().verify("edge-9", &node_token(NOW), NOW),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = issue_token(
            "not-the-secret",
            &TokenClaims {
                timestamp: NOW,
                role: Role::Node,
                tenant_id: 0,
            },
        )
        .unwrap();
        assert!(matches!(
            verifier().verify("edge-1", &token, NOW),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let token = node_token(NOW);
        let (_, sig) = token.split_once('.').unwrap();
        let forged_payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&TokenClaims {
                timestamp: NOW,
                role: Role::Admin,
                tenant_id: 0,
            })
            .unwrap(),
        );
        let forged = format!("{forged_payload}.{sig}");
        assert!(matches!(
            verifier().verify("edge-1", &forged, NOW),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_role_must_match_node() {
        // Signed with the node's secret but claiming a different role
        let token = issue_token(
            "edge-secret",
            &TokenClaims {
                timestamp: NOW,
                role: Role::Admin,
                tenant_id: 0,
            },
        )
        .unwrap();
        assert!(matches!(
            verifier().verify("edge-1", &token, NOW),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_malformed_token_rejected() {
        let v = verifier();
        for token in ["", "no-dot", "!!!.???", "e30.e30"] {
            assert!(matches!(
                v.verify("edge-1", token, NOW),
                Err(AuthError::InvalidCredentials)
            ));
        }
    }
}
