//! Per-request lifecycle reconstruction from `Network.*` events.
//!
//! The browser reports one request as a scatter of notifications:
//! `requestWillBeSent` (repeated across a redirect chain), zero or more
//! `responseReceived`/`dataReceived`, and a terminal `loadingFinished` or
//! `loadingFailed`. The tracker accumulates these per request id and computes
//! flat summaries once recording stops.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use loadscope_cdp::protocol::network::{
    DataReceivedParams, LoadingFailedParams, LoadingFinishedParams, RequestWillBeSentParams,
    ResourceChangedPriorityParams, ResponseReceivedParams,
};
use serde_json::Value;
use tracing::{debug, warn};

/// Accumulated notifications for one request id.
#[derive(Debug, Default)]
pub struct RequestRecord {
    /// `requestWillBeSent` chain (more than one entry means redirects).
    pub request: Vec<RequestWillBeSentParams>,
    /// `responseReceived` notifications.
    pub response: Vec<ResponseReceivedParams>,
    /// `dataReceived` notifications.
    pub data: Vec<DataReceivedParams>,
    /// `resourceChangedPriority` notifications.
    pub priority: Vec<ResourceChangedPriorityParams>,
    /// Terminal success notification.
    pub finished: Option<LoadingFinishedParams>,
    /// Terminal failure notification.
    pub failed: Option<LoadingFailedParams>,
    /// `Some(true)` once the request went to the network, `Some(false)` once
    /// any cache signal arrived. Latches at `false`.
    pub from_net: Option<bool>,
    /// Detected as video (`.mp4` URL or `video/*` mime).
    pub is_video: bool,
}

/// What a network event means for the rest of the session.
#[derive(Debug, Default)]
pub struct NetworkEventOutcome {
    /// The event counts as page activity.
    pub reset_activity: bool,
    /// The main request failed; latch this as the navigation error.
    pub nav_error: Option<String>,
}

/// Flat per-request summary used for body retrieval and result reporting.
#[derive(Debug, Clone)]
pub struct RequestSummary {
    /// Protocol request id.
    pub id: String,
    /// Final URL, from the last response (falling back to the last request).
    pub url: Option<String>,
    /// HTTP status of the last response.
    pub status: Option<i64>,
    /// Response headers of the last response.
    pub response_headers: Option<Value>,
    /// Request headers (response-reported, else as originally sent).
    pub request_headers: Option<Value>,
    /// Physical connection id.
    pub connection: Option<f64>,
    /// On-the-wire bytes; `loadingFinished` is authoritative when present.
    pub transfer_size: Option<u64>,
    /// Raw body file captured for this request, when one exists on disk.
    pub body_file: Option<PathBuf>,
}

/// Reconstructs request lifecycles and binds the main document request.
#[derive(Debug, Default)]
pub struct RequestTracker {
    records: HashMap<String, RequestRecord>,
    main_request: Option<String>,
    start_timestamp: Option<f64>,
}

impl RequestTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all accumulated state for a fresh run.
    pub fn reset(&mut self) {
        self.records.clear();
        self.main_request = None;
        self.start_timestamp = None;
    }

    /// Request id of the main document request, once bound.
    pub fn main_request(&self) -> Option<&str> {
        self.main_request.as_deref()
    }

    /// Browser-clock timestamp (seconds) of the main request's first
    /// `requestWillBeSent`.
    pub fn start_timestamp(&self) -> Option<f64> {
        self.start_timestamp
    }

    /// Accumulated record for a request id.
    pub fn record(&self, request_id: &str) -> Option<&RequestRecord> {
        self.records.get(request_id)
    }

    /// Process one `Network.*` event. `event` is the method name without the
    /// domain prefix; `main_frame` is the latched main frame id, used to bind
    /// the main request.
    pub fn process_event(
        &mut self,
        event: &str,
        params: &Value,
        main_frame: Option<&str>,
    ) -> NetworkEventOutcome {
        let mut outcome = NetworkEventOutcome::default();
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            return outcome;
        };
        let request_id = request_id.to_string();
        let record = self.records.entry(request_id.clone()).or_default();

        // Video requests stop counting as activity only from the event after
        // the one that marked them.
        let mut ignore_activity = record.is_video;

        match event {
            "requestWillBeSent" => {
                let Ok(params) = serde_json::from_value::<RequestWillBeSentParams>(params.clone())
                else {
                    warn!(%request_id, "Malformed requestWillBeSent, dropping");
                    return outcome;
                };
                if params
                    .request
                    .as_ref()
                    .and_then(|r| r.url.as_deref())
                    .is_some_and(|url| url.ends_with(".mp4"))
                {
                    record.is_video = true;
                }
                if record.from_net != Some(false) {
                    record.from_net = Some(true);
                }
                if self.main_request.is_none()
                    && main_frame.is_some()
                    && params.frame_id.as_deref() == main_frame
                {
                    debug!(%request_id, "Main request detected");
                    self.main_request = Some(request_id.clone());
                    self.start_timestamp = params.timestamp;
                }
                record.request.push(params);
            }
            "resourceChangedPriority" => {
                if let Ok(params) =
                    serde_json::from_value::<ResourceChangedPriorityParams>(params.clone())
                {
                    record.priority.push(params);
                }
            }
            "requestServedFromCache" => {
                record.from_net = Some(false);
            }
            "responseReceived" => {
                let Ok(params) = serde_json::from_value::<ResponseReceivedParams>(params.clone())
                else {
                    warn!(%request_id, "Malformed responseReceived, dropping");
                    return outcome;
                };
                if let Some(response) = params.response.as_ref() {
                    if response.from_disk_cache == Some(true) {
                        record.from_net = Some(false);
                    }
                    if response
                        .mime_type
                        .as_deref()
                        .is_some_and(|mime| mime.starts_with("video/"))
                    {
                        record.is_video = true;
                    }
                }
                record.response.push(params);
            }
            "dataReceived" => {
                if let Ok(params) = serde_json::from_value::<DataReceivedParams>(params.clone()) {
                    record.data.push(params);
                }
            }
            "loadingFinished" => {
                if let Ok(params) = serde_json::from_value::<LoadingFinishedParams>(params.clone())
                {
                    record.finished = Some(params);
                }
            }
            "loadingFailed" => {
                let Ok(params) = serde_json::from_value::<LoadingFailedParams>(params.clone())
                else {
                    warn!(%request_id, "Malformed loadingFailed, dropping");
                    return outcome;
                };
                if self.main_request.as_deref() == Some(request_id.as_str())
                    && params.canceled == Some(false)
                {
                    if let Some(error_text) = params.error_text.clone() {
                        debug!(%request_id, error = %error_text, "Navigation error");
                        outcome.nav_error = Some(error_text);
                    }
                }
                record.failed = Some(params);
            }
            _ => {
                // Kinds we do not track never count as activity.
                ignore_activity = true;
            }
        }

        outcome.reset_activity = !ignore_activity;
        outcome
    }

    /// Build summaries for every request that actually hit the network.
    ///
    /// `bodies_dir` is probed for previously captured raw bodies.
    pub fn get_requests(&self, bodies_dir: &Path) -> HashMap<String, RequestSummary> {
        let mut summaries = HashMap::new();
        for (request_id, record) in &self.records {
            if record.from_net != Some(true) {
                continue;
            }
            let mut summary = RequestSummary {
                id: request_id.clone(),
                url: None,
                status: None,
                response_headers: None,
                request_headers: None,
                connection: None,
                transfer_size: None,
                body_file: None,
            };

            let body_file = bodies_dir.join(request_id);
            if body_file.is_file() {
                summary.body_file = Some(body_file);
            }

            // Headers come from the last responseReceived.
            if let Some(response) = record.response.last().and_then(|r| r.response.as_ref()) {
                summary.url = response.url.clone();
                summary.status = response.status;
                summary.response_headers = response.headers.clone();
                summary.request_headers = response.request_headers.clone();
                summary.connection = response.connection_id;
            }

            // Fill any missing details from the requestWillBeSent chain.
            if let Some(request) = record.request.last().and_then(|r| r.request.as_ref()) {
                if summary.url.is_none() {
                    summary.url = request.url.clone();
                }
                if summary.request_headers.is_none() {
                    summary.request_headers = request.headers.clone();
                }
            }

            summary.transfer_size = transfer_size(record);
            summaries.insert(request_id.clone(), summary);
        }
        summaries
    }
}

/// On-the-wire size: `loadingFinished.encodedDataLength` when reported,
/// else the sum of the per-chunk sizes.
fn transfer_size(record: &RequestRecord) -> Option<u64> {
    if let Some(size) = record.finished.as_ref().and_then(|f| f.encoded_data_length) {
        return Some(size.max(0.0) as u64);
    }
    if record.data.is_empty() {
        return None;
    }
    let total: f64 = record
        .data
        .iter()
        .map(|d| d.encoded_data_length.or(d.data_length).unwrap_or(0.0))
        .sum();
    Some(total.max(0.0) as u64)
}

/// Look up a header value, tolerating case differences and HTTP/2
/// pseudo-header names (`:status` for `status`).
pub fn header_value(headers: &Value, name: &str) -> Option<String> {
    let map = headers.as_object()?;
    if let Some(value) = map.get(name) {
        return Some(stringify(value));
    }
    let find = name.to_lowercase();
    for (header_name, value) in map {
        let check = header_name.to_lowercase();
        if check == find || (check.strip_prefix(':') == Some(find.as_str())) {
            return Some(stringify(value));
        }
    }
    None
}

fn stringify(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

/// Pull the leading integer out of a header value like `"1234"` or
/// `"1234, 1234"`.
pub(crate) fn parse_content_length(value: &str) -> Option<u64> {
    let digits: String = value
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests;
