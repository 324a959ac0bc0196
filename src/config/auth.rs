use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::auth::Role;

/// RPC authentication configuration.
///
/// ```toml
/// [auth]
/// enabled = true
/// max_token_age_secs = 600
///
/// [[auth.api_tokens]]
/// node_id = "edge-fra-01"
/// secret = "${EDGE_FRA_01_SECRET}"
/// role = "node"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Require a valid token on every RPC. When disabled, every caller is
    /// treated as an admin; only suitable for local development.
    #[serde(default)]
    pub enabled: bool,

    /// Maximum distance between a token's timestamp and the server clock.
    #[serde(default = "default_max_token_age_secs")]
    pub max_token_age_secs: u64,

    /// Node credentials: one shared secret and role per node id.
    #[serde(default)]
    pub api_tokens: Vec<ApiTokenConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_token_age_secs: default_max_token_age_secs(),
            api_tokens: Vec::new(),
        }
    }
}

fn default_max_token_age_secs() -> u64 {
    600
}

/// Credential for one calling node.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiTokenConfig {
    pub node_id: String,
    /// HMAC key shared with the node.
    pub secret: String,
    pub role: Role,
}

impl std::fmt::Debug for ApiTokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiTokenConfig")
            .field("node_id", &self.node_id)
            .field("secret", &"****")
            .field("role", &self.role)
            .finish()
    }
}

impl AuthConfig {
    pub fn find_token(&self, node_id: &str) -> Option<&ApiTokenConfig> {
        self.api_tokens.iter().find(|t| t.node_id == node_id)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.api_tokens.is_empty() {
            return Err(ConfigError::Validation(
                "auth is enabled but no auth.api_tokens are configured".into(),
            ));
        }
        if self.max_token_age_secs == 0 {
            return Err(ConfigError::Validation(
                "auth.max_token_age_secs must be positive".into(),
            ));
        }

        let mut seen = HashSet::new();
        for token in &self.api_tokens {
            if token.node_id.is_empty() {
                return Err(ConfigError::Validation(
                    "auth.api_tokens entries need a node_id".into(),
                ));
            }
            if token.secret.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "auth.api_tokens entry '{}' has an empty secret",
                    token.node_id
                )));
            }
            if !seen.insert(token.node_id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate auth.api_tokens node_id '{}'",
                    token.node_id
                )));
            }
        }
        Ok(())
    }
}
