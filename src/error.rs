//! Converts a [`GatewayError`] into the JSON error envelope (§6). Lives in
//! the binary crate because neither `GatewayError` nor axum's
//! `IntoResponse` is local to any workspace crate.

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_core::{GatewayError, RequestId};
use serde_json::json;

pub struct ApiError {
    pub error: GatewayError,
    pub request_id: RequestId,
}

impl ApiError {
    pub fn new(error: GatewayError, request_id: RequestId) -> Self {
        Self { error, request_id }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut body = json!({
            "error": self.error.tag(),
            "message": self.error.to_string(),
            "request_id": self.request_id.to_string(),
        });
        if let Some(retry_after) = self.error.retry_after_secs() {
            body["retry_after"] = json!(retry_after);
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(retry_after) = self.error.retry_after_secs() {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static("retry-after"), value);
            }
        }
        response
    }
}
