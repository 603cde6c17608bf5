use super::*;

// CdpRequest tests
#[test]
fn test_request_serialization_minimal() {
    let req = CdpRequest {
        id: 1,
        method: "Page.enable".to_string(),
        params: serde_json::json!({}),
    };
    let json = serde_json::to_string(&req).unwrap();
    assert_eq!(json, r#"{"id":1,"method":"Page.enable","params":{}}"#);
}

#[test]
fn test_request_serialization_with_params() {
    let req = CdpRequest {
        id: 42,
        method: "Network.getResponseBody".to_string(),
        params: serde_json::json!({"requestId": "1000.1"}),
    };
    let json = serde_json::to_string(&req).unwrap();
    assert!(json.contains(r#""id":42"#));
    assert!(json.contains(r#""method":"Network.getResponseBody""#));
    assert!(json.contains(r#""requestId":"1000.1""#));
}

// CdpResponse tests
#[test]
fn test_response_deserialization_success() {
    let json = r#"{"id":1,"result":{"data":"iVBOR"}}"#;
    let resp: CdpResponse = serde_json::from_str(json).unwrap();
    assert_eq!(resp.id, 1);
    assert!(resp.result.is_some());
    assert!(resp.error.is_none());
}

#[test]
fn test_response_deserialization_error() {
    let json = r#"{"id":2,"error":{"code":-32601,"message":"Method not found"}}"#;
    let resp: CdpResponse = serde_json::from_str(json).unwrap();
    assert_eq!(resp.id, 2);
    assert!(resp.result.is_none());
    let err = resp.error.unwrap();
    assert_eq!(err.code, -32601);
    assert_eq!(err.message, "Method not found");
}

#[test]
fn test_response_error_with_data() {
    let json = r#"{"id":4,"error":{"code":-32000,"message":"Error","data":"additional info"}}"#;
    let resp: CdpResponse = serde_json::from_str(json).unwrap();
    let err = resp.error.unwrap();
    assert_eq!(err.data.as_deref(), Some("additional info"));
}

// CdpEvent tests
#[test]
fn test_event_deserialization_simple() {
    let json = r#"{"method":"Page.loadEventFired","params":{"timestamp":12345.6}}"#;
    let evt: CdpEvent = serde_json::from_str(json).unwrap();
    assert_eq!(evt.method, "Page.loadEventFired");
    assert!(evt.params.is_some());
}

#[test]
fn test_event_deserialization_no_params() {
    let json = r#"{"method":"Inspector.detached"}"#;
    let evt: CdpEvent = serde_json::from_str(json).unwrap();
    assert!(evt.params.is_none());
}

#[test]
fn test_wake_sentinel_parses_as_event() {
    let evt: CdpEvent = serde_json::from_str(crate::WAKE_SENTINEL).unwrap();
    assert_eq!(evt.method, "got_message");
}

// CdpMessage tests
#[test]
fn test_message_parses_as_response() {
    let json = r#"{"id":1,"result":{"success":true}}"#;
    let msg: CdpMessage = serde_json::from_str(json).unwrap();
    assert!(matches!(msg, CdpMessage::Response(_)));
    assert!(msg.is_response_for(1));
    assert!(!msg.is_response_for(2));
}

#[test]
fn test_message_parses_as_event() {
    let json = r#"{"method":"Page.frameStartedLoading","params":{"frameId":"F1"}}"#;
    let msg: CdpMessage = serde_json::from_str(json).unwrap();
    assert!(matches!(msg, CdpMessage::Event(_)));
    assert!(!msg.is_response_for(1));
}

#[test]
fn test_message_into_response() {
    let json = r#"{"id":10,"result":null}"#;
    let msg: CdpMessage = serde_json::from_str(json).unwrap();
    let resp = msg.into_response();
    assert!(resp.is_some());
    assert_eq!(resp.unwrap().id, 10);
}

#[test]
fn test_message_into_response_from_event() {
    let json = r#"{"method":"Test.event"}"#;
    let msg: CdpMessage = serde_json::from_str(json).unwrap();
    assert!(msg.into_response().is_none());
}

#[test]
fn test_message_into_event() {
    let json = r#"{"method":"Console.messageAdded","params":{}}"#;
    let msg: CdpMessage = serde_json::from_str(json).unwrap();
    let evt = msg.into_event();
    assert!(evt.is_some());
    assert_eq!(evt.unwrap().method, "Console.messageAdded");
}

#[test]
fn test_malformed_json_missing_id() {
    let json = r#"{"result":{}}"#;
    let result: Result<CdpResponse, _> = serde_json::from_str(json);
    assert!(result.is_err());
}

#[test]
fn test_event_with_complex_params() {
    let json = r#"{
        "method": "Network.responseReceived",
        "params": {
            "requestId": "123",
            "response": {
                "url": "https://example.com",
                "status": 200,
                "headers": {"content-type": "text/html"}
            }
        }
    }"#;
    let evt: CdpEvent = serde_json::from_str(json).unwrap();
    let params = evt.params.unwrap();
    assert_eq!(params["requestId"], "123");
    assert_eq!(params["response"]["status"], 200);
}
