//! Per-RPC correlation ids.
//!
//! Every request gets an id (taken from `X-Request-Id` or freshly minted),
//! runs inside a span carrying it, and records per-route HTTP metrics. Error
//! bodies echo the id as `error.request_id` so callers can quote it.

use std::time::Instant;

use axum::{
    body::{Body, to_bytes},
    extract::{MatchedPath, Request},
    http::{HeaderMap, header::CONTENT_TYPE},
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use crate::observability::metrics;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Correlation id stored in request extensions.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(|s| Self(s.to_string()))
            .unwrap_or_else(|| Self(Uuid::new_v4().to_string()))
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = RequestId::from_headers(req.headers());
    req.extensions_mut().insert(request_id.clone());

    // Route template, never the raw URI, so labels stay bounded
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    let started = Instant::now();
    let response = next.run(req).instrument(span).await;
    let status = response.status();
    metrics::record_http_request(
        &method,
        &path,
        status.as_u16(),
        started.elapsed().as_secs_f64(),
    );

    let mut response = if status.is_client_error() || status.is_server_error() {
        stamp_error_body(response, &request_id).await
    } else {
        response
    };
    if let Ok(value) = request_id.0.parse() {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Adds `request_id` to the `error` object of a JSON error body. Bodies that
/// are not JSON, or have no `error` object, pass through unchanged.
async fn stamp_error_body(response: Response, request_id: &RequestId) -> Response {
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    if !is_json {
        return response;
    }

    let (parts, body) = response.into_parts();
    let Ok(bytes) = to_bytes(body, usize::MAX).await else {
        return Response::from_parts(parts, Body::empty());
    };

    let stamped = serde_json::from_slice::<Value>(&bytes)
        .ok()
        .and_then(|mut json| {
            let error = json.get_mut("error")?.as_object_mut()?;
            error.insert("request_id".into(), Value::String(request_id.0.clone()));
            serde_json::to_vec(&json).ok()
        });

    Response::from_parts(parts, Body::from(stamped.unwrap_or_else(|| bytes.to_vec())))
}

#[cfg(test)]
mod tests {
    use axum::{
        Json, Router,
        http::StatusCode,
        response::IntoResponse,
        routing::{get, post},
    };
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::{models::ValidationError, routes::ApiError, services::ServiceError};

    fn app() -> Router {
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route(
                "/rpc/bandwidth/peak",
                post(|| async {
                    ApiError::from(ServiceError::from(ValidationError::Day("2024".into())))
                        .into_response()
                }),
            )
            .route(
                "/rpc/bandwidth/range",
                post(|| async {
                    (StatusCode::BAD_REQUEST, Json(json!({"status": "bad"}))).into_response()
                }),
            )
            .route(
                "/rpc/admin/sweep",
                post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "store down") }),
            )
            .layer(axum::middleware::from_fn(request_id_middleware))
    }

    fn rpc(uri: &str, request_id: Option<&str>) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder().method("POST").uri(uri);
        if let Some(id) = request_id {
            builder = builder.header(REQUEST_ID_HEADER, id);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_id_is_propagated_or_minted() {
        let response = app()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .header(REQUEST_ID_HEADER, "edge-req-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap(),
            "edge-req-1"
        );
        assert_eq!(body_bytes(response).await, b"ok");

        let response = app()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let minted = response.headers().get(REQUEST_ID_HEADER).unwrap();
        assert!(Uuid::parse_str(minted.to_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_validation_error_body_carries_request_id() {
        let response = app()
            .oneshot(rpc("/rpc/bandwidth/peak", Some("edge-req-2")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["error"]["code"], "validation_error");
        assert_eq!(json["error"]["request_id"], "edge-req-2");
    }

    #[tokio::test]
    async fn test_error_bodies_without_error_object_are_untouched() {
        let response = app()
            .oneshot(rpc("/rpc/bandwidth/range", Some("edge-req-3")))
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json, json!({"status": "bad"}));

        let response = app()
            .oneshot(rpc("/rpc/admin/sweep", Some("edge-req-4")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap(),
            "edge-req-4"
        );
        assert_eq!(body_bytes(response).await, b"store down");
    }
}
