use super::*;
use serde_json::json;

fn will_be_sent(request_id: &str, frame_id: &str, url: &str, timestamp: f64) -> Value {
    json!({
        "requestId": request_id,
        "frameId": frame_id,
        "timestamp": timestamp,
        "request": {"url": url, "method": "GET", "headers": {"Accept": "*/*"}}
    })
}

fn response_received(request_id: &str, status: i64, mime: &str) -> Value {
    json!({
        "requestId": request_id,
        "response": {
            "url": "https://example.com/",
            "status": status,
            "mimeType": mime,
            "headers": {"Content-Type": mime},
            "connectionId": 12
        }
    })
}

#[test]
fn test_clean_load_summary() {
    let mut tracker = RequestTracker::new();
    let main_frame = Some("F");
    tracker.process_event(
        "requestWillBeSent",
        &will_be_sent("R1", "F", "https://example.com/", 100.0),
        main_frame,
    );
    tracker.process_event(
        "responseReceived",
        &response_received("R1", 200, "text/html"),
        main_frame,
    );
    tracker.process_event(
        "dataReceived",
        &json!({"requestId": "R1", "dataLength": 5000, "encodedDataLength": 5000}),
        main_frame,
    );
    tracker.process_event(
        "loadingFinished",
        &json!({"requestId": "R1", "encodedDataLength": 5000}),
        main_frame,
    );

    let summaries = tracker.get_requests(Path::new("/nonexistent"));
    let summary = summaries.get("R1").expect("R1 summary");
    assert_eq!(summary.transfer_size, Some(5000));
    assert_eq!(summary.status, Some(200));
    assert_eq!(summary.url.as_deref(), Some("https://example.com/"));
    assert_eq!(summary.connection, Some(12.0));
    assert_eq!(tracker.main_request(), Some("R1"));
    assert_eq!(tracker.start_timestamp(), Some(100.0));
}

#[test]
fn test_finished_size_overrides_data_sum() {
    let mut tracker = RequestTracker::new();
    tracker.process_event(
        "requestWillBeSent",
        &will_be_sent("R1", "F", "https://example.com/a.js", 1.0),
        None,
    );
    tracker.process_event(
        "dataReceived",
        &json!({"requestId": "R1", "encodedDataLength": 100}),
        None,
    );
    tracker.process_event(
        "dataReceived",
        &json!({"requestId": "R1", "encodedDataLength": 200}),
        None,
    );
    tracker.process_event(
        "loadingFinished",
        &json!({"requestId": "R1", "encodedDataLength": 450}),
        None,
    );
    let summaries = tracker.get_requests(Path::new("/nonexistent"));
    assert_eq!(summaries["R1"].transfer_size, Some(450));
}

#[test]
fn test_data_sum_fallback_prefers_encoded_length() {
    let mut tracker = RequestTracker::new();
    tracker.process_event(
        "requestWillBeSent",
        &will_be_sent("R1", "F", "https://example.com/a.js", 1.0),
        None,
    );
    tracker.process_event(
        "dataReceived",
        &json!({"requestId": "R1", "dataLength": 4096, "encodedDataLength": 1000}),
        None,
    );
    tracker.process_event(
        "dataReceived",
        &json!({"requestId": "R1", "dataLength": 2048}),
        None,
    );
    let summaries = tracker.get_requests(Path::new("/nonexistent"));
    assert_eq!(summaries["R1"].transfer_size, Some(3048));
}

#[test]
fn test_from_net_latches_false() {
    let mut tracker = RequestTracker::new();
    tracker.process_event(
        "requestWillBeSent",
        &will_be_sent("R1", "F", "https://example.com/", 1.0),
        None,
    );
    tracker.process_event("requestServedFromCache", &json!({"requestId": "R1"}), None);
    // A later redirect hop must not resurrect the request.
    tracker.process_event(
        "requestWillBeSent",
        &will_be_sent("R1", "F", "https://example.com/other", 2.0),
        None,
    );
    assert_eq!(tracker.record("R1").unwrap().from_net, Some(false));
    assert!(tracker.get_requests(Path::new("/nonexistent")).is_empty());
}

#[test]
fn test_disk_cache_marks_not_from_net() {
    let mut tracker = RequestTracker::new();
    tracker.process_event(
        "requestWillBeSent",
        &will_be_sent("R1", "F", "https://example.com/", 1.0),
        None,
    );
    tracker.process_event(
        "responseReceived",
        &json!({
            "requestId": "R1",
            "response": {"url": "https://example.com/", "status": 200, "fromDiskCache": true}
        }),
        None,
    );
    assert_eq!(tracker.record("R1").unwrap().from_net, Some(false));
}

#[test]
fn test_response_only_request_is_excluded() {
    // Without a requestWillBeSent the request never counted as from-net.
    let mut tracker = RequestTracker::new();
    tracker.process_event(
        "responseReceived",
        &response_received("R9", 200, "text/html"),
        None,
    );
    assert!(tracker.get_requests(Path::new("/nonexistent")).is_empty());
}

#[test]
fn test_video_detection_by_url_and_mime() {
    let mut tracker = RequestTracker::new();
    tracker.process_event(
        "requestWillBeSent",
        &will_be_sent("R1", "F", "https://cdn.example.com/clip.mp4", 1.0),
        None,
    );
    assert!(tracker.record("R1").unwrap().is_video);

    tracker.process_event(
        "requestWillBeSent",
        &will_be_sent("R2", "F", "https://cdn.example.com/stream", 2.0),
        None,
    );
    tracker.process_event(
        "responseReceived",
        &response_received("R2", 200, "video/webm"),
        None,
    );
    assert!(tracker.record("R2").unwrap().is_video);
}

#[test]
fn test_video_request_stops_counting_as_activity() {
    let mut tracker = RequestTracker::new();
    // The marking event itself still counts as activity.
    let outcome = tracker.process_event(
        "requestWillBeSent",
        &will_be_sent("R1", "F", "https://cdn.example.com/clip.mp4", 1.0),
        None,
    );
    assert!(outcome.reset_activity);
    let outcome = tracker.process_event(
        "dataReceived",
        &json!({"requestId": "R1", "dataLength": 100}),
        None,
    );
    assert!(!outcome.reset_activity);
}

#[test]
fn test_untracked_event_kind_is_not_activity() {
    let mut tracker = RequestTracker::new();
    let outcome = tracker.process_event(
        "webSocketFrameReceived",
        &json!({"requestId": "R1"}),
        None,
    );
    assert!(!outcome.reset_activity);
}

#[test]
fn test_main_request_binding_is_sticky() {
    let mut tracker = RequestTracker::new();
    tracker.process_event(
        "requestWillBeSent",
        &will_be_sent("SUB", "F2", "https://example.com/iframe", 0.5),
        Some("F1"),
    );
    assert_eq!(tracker.main_request(), None);
    tracker.process_event(
        "requestWillBeSent",
        &will_be_sent("R1", "F1", "https://example.com/", 1.0),
        Some("F1"),
    );
    assert_eq!(tracker.main_request(), Some("R1"));
    // A later same-frame request must not steal the binding.
    tracker.process_event(
        "requestWillBeSent",
        &will_be_sent("R2", "F1", "https://example.com/next", 2.0),
        Some("F1"),
    );
    assert_eq!(tracker.main_request(), Some("R1"));
    assert_eq!(tracker.start_timestamp(), Some(1.0));
}

#[test]
fn test_main_request_failure_surfaces_nav_error() {
    let mut tracker = RequestTracker::new();
    tracker.process_event(
        "requestWillBeSent",
        &will_be_sent("R1", "F", "https://bogus.example/", 1.0),
        Some("F"),
    );
    let outcome = tracker.process_event(
        "loadingFailed",
        &json!({
            "requestId": "R1",
            "errorText": "net::ERR_NAME_NOT_RESOLVED",
            "canceled": false
        }),
        Some("F"),
    );
    assert_eq!(
        outcome.nav_error.as_deref(),
        Some("net::ERR_NAME_NOT_RESOLVED")
    );
}

#[test]
fn test_canceled_failure_is_not_nav_error() {
    let mut tracker = RequestTracker::new();
    tracker.process_event(
        "requestWillBeSent",
        &will_be_sent("R1", "F", "https://example.com/", 1.0),
        Some("F"),
    );
    let outcome = tracker.process_event(
        "loadingFailed",
        &json!({"requestId": "R1", "errorText": "net::ERR_ABORTED", "canceled": true}),
        Some("F"),
    );
    assert!(outcome.nav_error.is_none());
}

#[test]
fn test_subresource_failure_is_not_nav_error() {
    let mut tracker = RequestTracker::new();
    tracker.process_event(
        "requestWillBeSent",
        &will_be_sent("R1", "F", "https://example.com/", 1.0),
        Some("F"),
    );
    tracker.process_event(
        "requestWillBeSent",
        &will_be_sent("R2", "F", "https://example.com/a.css", 1.1),
        Some("F"),
    );
    let outcome = tracker.process_event(
        "loadingFailed",
        &json!({"requestId": "R2", "errorText": "net::ERR_FAILED", "canceled": false}),
        Some("F"),
    );
    assert!(outcome.nav_error.is_none());
}

#[test]
fn test_redirect_chain_keeps_all_hops() {
    let mut tracker = RequestTracker::new();
    tracker.process_event(
        "requestWillBeSent",
        &will_be_sent("R1", "F", "http://example.com/", 1.0),
        None,
    );
    tracker.process_event(
        "requestWillBeSent",
        &will_be_sent("R1", "F", "https://example.com/", 1.2),
        None,
    );
    assert_eq!(tracker.record("R1").unwrap().request.len(), 2);
}

#[test]
fn test_summary_falls_back_to_request_fields() {
    let mut tracker = RequestTracker::new();
    tracker.process_event(
        "requestWillBeSent",
        &will_be_sent("R1", "F", "https://example.com/no-response", 1.0),
        None,
    );
    let summaries = tracker.get_requests(Path::new("/nonexistent"));
    let summary = &summaries["R1"];
    assert_eq!(summary.url.as_deref(), Some("https://example.com/no-response"));
    assert!(summary.request_headers.is_some());
    assert!(summary.status.is_none());
}

#[test]
fn test_header_value_lookup() {
    let headers = json!({"Content-Type": "text/html", "content-length": "1234"});
    assert_eq!(
        header_value(&headers, "Content-Type").as_deref(),
        Some("text/html")
    );
    assert_eq!(
        header_value(&headers, "Content-Length").as_deref(),
        Some("1234")
    );
    assert_eq!(header_value(&headers, "ETag"), None);
}

#[test]
fn test_header_value_pseudo_header() {
    let headers = json!({":status": "200"});
    assert_eq!(header_value(&headers, "status").as_deref(), Some("200"));
}

#[test]
fn test_parse_content_length() {
    assert_eq!(parse_content_length("1234"), Some(1234));
    assert_eq!(parse_content_length("bytes 1234"), Some(1234));
    assert_eq!(parse_content_length("none"), None);
}
