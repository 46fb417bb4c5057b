use gateway_core::RequestId;
use http::Method;
use std::collections::BTreeMap;

/// Everything the ingress adapter has already parsed out of the incoming
/// HTTP request before handing it to the pipeline. Header extraction
/// (`X-API-Key`, `X-Request-Id`, `X-Forwarded-For`) happens at the edge so
/// this crate stays free of any ingress-framework dependency.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub request_id: RequestId,
    pub method: Method,
    pub route_name: String,
    pub path: String,
    pub query: Option<String>,
    pub query_params: BTreeMap<String, Vec<String>>,
    pub headers: Vec<(String, String)>,
    pub api_key: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct PipelineResponse {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}
