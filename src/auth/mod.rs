//! RPC authentication gate.
//!
//! Every metering call carries a node id and a signed, time-boxed token. The
//! gate resolves them into a [`Principal`] before a handler runs; handlers then
//! check the principal's [`Role`]. The metering engine itself trusts the tenant
//! and region ids it is given.

mod error;
mod principal;
mod token;

pub use error::AuthError;
pub use principal::{Principal, Role};
pub use token::{TokenClaims, TokenVerifier, issue_token};
