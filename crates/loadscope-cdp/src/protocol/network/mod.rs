//! Network domain types.
//!
//! Event parameters are kept permissive: every field the browser may omit is
//! an `Option`, and unknown fields are ignored, because the request tracker
//! must survive any event mix the browser emits.

use serde::Deserialize;
use serde_json::Value;

/// Request data inside `Network.requestWillBeSent`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    /// Request URL.
    pub url: Option<String>,
    /// HTTP method.
    pub method: Option<String>,
    /// Request headers as sent.
    pub headers: Option<Value>,
}

/// Response data inside `Network.responseReceived`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    /// Response URL.
    pub url: Option<String>,
    /// HTTP status code.
    pub status: Option<i64>,
    /// Response headers.
    pub headers: Option<Value>,
    /// Request headers the browser actually sent, when reported here.
    pub request_headers: Option<Value>,
    /// Physical connection id.
    pub connection_id: Option<f64>,
    /// Whether the response was served from the disk cache.
    pub from_disk_cache: Option<bool>,
    /// Resource mime type.
    pub mime_type: Option<String>,
}

/// Event: Network.requestWillBeSent
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSentParams {
    /// Request identifier.
    pub request_id: String,
    /// Frame the request belongs to.
    pub frame_id: Option<String>,
    /// Monotonic browser timestamp, in seconds.
    pub timestamp: Option<f64>,
    /// The request itself.
    pub request: Option<RequestData>,
}

/// Event: Network.responseReceived
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceivedParams {
    /// Request identifier.
    pub request_id: String,
    /// Monotonic browser timestamp, in seconds.
    pub timestamp: Option<f64>,
    /// The response.
    pub response: Option<ResponseData>,
}

/// Event: Network.dataReceived
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataReceivedParams {
    /// Request identifier.
    pub request_id: String,
    /// Decoded body bytes in this chunk.
    pub data_length: Option<f64>,
    /// On-the-wire bytes in this chunk (may be absent or -1 when unknown).
    pub encoded_data_length: Option<f64>,
}

/// Event: Network.loadingFinished
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFinishedParams {
    /// Request identifier.
    pub request_id: String,
    /// Monotonic browser timestamp, in seconds.
    pub timestamp: Option<f64>,
    /// Authoritative total on-the-wire size for the request.
    pub encoded_data_length: Option<f64>,
}

/// Event: Network.loadingFailed
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailedParams {
    /// Request identifier.
    pub request_id: String,
    /// Network-stack error string (e.g. `net::ERR_NAME_NOT_RESOLVED`).
    pub error_text: Option<String>,
    /// True when the load was canceled rather than failed.
    pub canceled: Option<bool>,
}

/// Event: Network.requestServedFromCache
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestServedFromCacheParams {
    /// Request identifier.
    pub request_id: String,
}

/// Event: Network.resourceChangedPriority
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceChangedPriorityParams {
    /// Request identifier.
    pub request_id: String,
    /// New loading priority.
    pub new_priority: Option<String>,
    /// Monotonic browser timestamp, in seconds.
    pub timestamp: Option<f64>,
}

/// Result of Network.getResponseBody.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetResponseBodyResult {
    /// Response body, possibly base64-encoded.
    pub body: String,
    /// Whether `body` is base64-encoded.
    #[serde(default)]
    pub base64_encoded: bool,
}
