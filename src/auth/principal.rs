//! The authenticated caller of an RPC.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::AuthError;

/// Caller role carried in a token and pinned per node in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Operators: every RPC, including retention and tenant enumeration.
    Admin,
    /// Tenant-facing consoles: read-only queries.
    User,
    /// Edge nodes reporting traffic: writes and reads.
    Node,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Node => "node",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity resolved from a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub role: Role,
    /// Tenant id from the token payload; `0` for fleet-level callers.
    pub identity: i64,
    /// Node id the token was presented under, if any.
    pub node_id: Option<String>,
}

impl Principal {
    /// Principal used for every request when authentication is disabled.
    pub fn anonymous_admin() -> Self {
        Self {
            role: Role::Admin,
            identity: 0,
            node_id: None,
        }
    }

    /// Reject the call unless the principal holds one of `allowed`.
    pub fn require_any(&self, allowed: &[Role]) -> Result<(), AuthError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(AuthError::Forbidden(format!(
                "role '{}' may not call this operation",
                self.role
            )))
        }
    }
}
