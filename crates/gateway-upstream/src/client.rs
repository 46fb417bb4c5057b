//! Timed upstream HTTP client (§4.9). One pooled `reqwest::Client` is shared
//! across every request rather than built per call, matching the original
//! system's client-lifecycle discipline.

use gateway_config::models::Route;
use http::Method;
use std::time::{Duration, Instant};

use crate::error::UpstreamError;

const HOP_BY_HOP_REQUEST_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
];

const HOP_BY_HOP_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-encoding",
    "content-length",
];

pub struct UpstreamResponse {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub latency: Duration,
}

#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
}

impl UpstreamClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    pub async fn forward(
        &self,
        route: &Route,
        method: &Method,
        path: &str,
        query: Option<&str>,
        incoming_headers: &[(String, String)],
        body: Option<Vec<u8>>,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let mut url = route.upstream_url(path);
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }

        let headers = build_request_headers(route, incoming_headers);

        let mut request = self
            .http
            .request(method.clone(), &url)
            .timeout(Duration::from_millis(route.timeout_ms));
        for (name, value) in &headers {
            request = request.header(name, value);
        }
        if matches!(*method, Method::POST | Method::PUT | Method::PATCH) {
            if let Some(body) = body {
                request = request.body(body);
            }
        }

        let start = Instant::now();
        let response = request.send().await?;
        let latency = start.elapsed();

        let status_code = response.status().as_u16();
        let mut response_headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        strip_hop_by_hop(&mut response_headers, HOP_BY_HOP_RESPONSE_HEADERS);
        for (name, value) in &route.response_headers_add {
            response_headers.push((name.clone(), value.clone()));
        }

        let body = response.bytes().await?.to_vec();

        Ok(UpstreamResponse {
            status_code,
            headers: response_headers,
            body,
            latency,
        })
    }
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}

fn build_request_headers(route: &Route, incoming: &[(String, String)]) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = incoming.to_vec();
    strip_hop_by_hop(&mut headers, HOP_BY_HOP_REQUEST_HEADERS);

    for removed in &route.request_headers_remove {
        let removed = removed.to_lowercase();
        headers.retain(|(name, _)| name.to_lowercase() != removed);
    }

    for (name, value) in &route.request_headers_add {
        headers.retain(|(existing, _)| existing.to_lowercase() != name.to_lowercase());
        headers.push((name.clone(), value.clone()));
    }

    headers
}

fn strip_hop_by_hop(headers: &mut Vec<(String, String)>, names: &[&str]) {
    headers.retain(|(name, _)| !names.contains(&name.to_lowercase().as_str()));
}
