pub mod admin;
pub mod bandwidth;
mod error;
pub mod health;


use axum::{Router, routing::post};

pub use error::{ApiError, RpcJson};

use crate::{AppState, middleware::rpc_auth_middleware};

/// Metering and admin RPCs, all behind the RPC auth gate.
pub fn rpc_routes(state: AppState) -> Router<AppState> {
    let bandwidth_routes = Router::new()
        .route("/record", post(bandwidth::record))
        .route("/peak", post(bandwidth::peak))
        .route("/peak_month", post(bandwidth::peak_month))
        .route("/percentile", post(bandwidth::percentile))
        .route("/range", post(bandwidth::range));

    let admin_routes = Router::new()
        .route("/distinct_tenants", post(admin::distinct_tenants))
        .route("/sweep", post(admin::sweep));

    Router::new()
        .nest("/bandwidth", bandwidth_routes)
        .nest("/admin", admin_routes)
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            rpc_auth_middleware,
        ))
}
