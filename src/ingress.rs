//! Axum ingress adapter (C11): translates HTTP requests into
//! [`PipelineRequest`]s and pipeline responses back into HTTP, and exposes
//! the liveness probe.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{http::HeaderMap, Router};
use gateway_core::RequestId;
use gateway_pipeline::PipelineRequest;

use crate::error::ApiError;
use crate::state::GatewayState;

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/g/{route_name}/{*path}", any(proxy))
        .with_state(Arc::new(state))
}

async fn healthz(State(state): State<Arc<GatewayState>>) -> Response {
    match state.store.exists("healthz:probe").await {
        Ok(_) => (axum::http::StatusCode::OK, "ok").into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "healthz: coordination store unreachable");
            (axum::http::StatusCode::SERVICE_UNAVAILABLE, "coordination store unreachable").into_response()
        }
    }
}

async fn proxy(
    State(state): State<Arc<GatewayState>>,
    Path((route_name, path)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    method: axum::http::Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = RequestId::from_header_or_new(header_str(&headers, "x-request-id"));

    let api_key = header_str(&headers, "x-api-key").map(str::to_string);
    let client_ip = header_str(&headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());
    let user_agent = header_str(&headers, "user-agent").map(str::to_string);

    let incoming_headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let query_params = query.as_deref().map(parse_query).unwrap_or_default();

    let req = PipelineRequest {
        request_id,
        method,
        route_name,
        path: format!("/{path}"),
        query: query.clone(),
        query_params,
        headers: incoming_headers,
        api_key,
        client_ip,
        user_agent,
        body: if body.is_empty() { None } else { Some(body.to_vec()) },
    };

    let (result, _log) = state.pipeline.handle(req).await;
    match result {
        Ok(response) => pipeline_response_to_axum(response, request_id),
        Err(err) => ApiError::new(err, request_id).into_response(),
    }
}

fn pipeline_response_to_axum(response: gateway_pipeline::PipelineResponse, request_id: RequestId) -> Response {
    let mut builder = axum::http::Response::builder().status(response.status_code);
    for (name, value) in &response.headers {
        builder = builder.header(name, value);
    }
    builder = builder.header("x-request-id", request_id.to_string());
    builder
        .body(axum::body::Body::from(response.body))
        .unwrap_or_else(|_| {
            (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "malformed upstream response").into_response()
        })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_query(query: &str) -> BTreeMap<String, Vec<String>> {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or_default();
        let value = parts.next().unwrap_or_default();
        params.entry(key.to_string()).or_default().push(value.to_string());
    }
    params
}
