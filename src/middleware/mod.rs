mod auth;
mod request_id;

pub use auth::{NODE_ID_HEADER, TOKEN_HEADER, rpc_auth_middleware};
pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id_middleware};
