use super::*;
use flate2::read::GzDecoder;
use serde_json::json;
use std::io::Read;

fn test_session(dir: &Path) -> DevToolsSession {
    let task = Task::new(dir, "run1", 9222);
    DevToolsSession::new(Options::default(), Job::default(), task, false).unwrap()
}

// Scenario: two consecutive fetches with no reply abort the pass; any reply
// at all resets the counter.
#[test]
fn test_body_fetch_policy_gives_up_after_two_no_replies() {
    let mut policy = BodyFetchPolicy::default();
    assert!(!policy.give_up());
    policy.record_no_reply();
    assert!(!policy.give_up());
    policy.record_no_reply();
    assert!(policy.give_up());
}

#[test]
fn test_body_fetch_policy_resets_on_missing_body() {
    let mut policy = BodyFetchPolicy::default();
    policy.record_no_reply();
    policy.record_missing_body();
    policy.record_no_reply();
    assert!(!policy.give_up());
}

#[test]
fn test_body_fetch_policy_resets_on_success() {
    let mut policy = BodyFetchPolicy::default();
    policy.record_no_reply();
    policy.record_success();
    policy.record_no_reply();
    assert!(!policy.give_up());
}

#[test]
fn test_plan_body_fetch_text_types() {
    for content_type in ["text/html", "application/javascript", "application/json"] {
        assert_eq!(
            plan_body_fetch(Some(content_type), 1000, true, false),
            BodyPlan::Fetch { is_text: true }
        );
    }
    assert_eq!(
        plan_body_fetch(Some("image/png"), 1000, true, false),
        BodyPlan::Fetch { is_text: false }
    );
}

#[test]
fn test_plan_body_fetch_content_type_case_insensitive() {
    assert_eq!(
        plan_body_fetch(Some("Text/HTML; charset=utf-8"), 1000, true, false),
        BodyPlan::Fetch { is_text: true }
    );
}

#[test]
fn test_plan_body_fetch_skips_large_video() {
    assert_eq!(
        plan_body_fetch(Some("video/mp4"), 20_000_000, true, false),
        BodyPlan::Skip
    );
    // Small videos are still fetched.
    assert_eq!(
        plan_body_fetch(Some("video/mp4"), 1_000_000, true, false),
        BodyPlan::Fetch { is_text: false }
    );
}

#[test]
fn test_plan_body_fetch_noopt_without_zip_skips() {
    assert_eq!(plan_body_fetch(Some("text/html"), 1000, false, true), BodyPlan::Skip);
    // The zip still wants text bodies even with optimization checks off.
    assert_eq!(
        plan_body_fetch(Some("text/html"), 1000, true, true),
        BodyPlan::Fetch { is_text: true }
    );
}

#[test]
fn test_requires_renderer_commands() {
    assert!(requires_renderer("Page.captureScreenshot"));
    assert!(requires_renderer("Runtime.evaluate"));
    assert!(!requires_renderer("Network.getResponseBody"));
    assert!(!requires_renderer("Page.navigate"));
}

#[test]
fn test_log_head_respects_char_boundaries() {
    let mut text = String::new();
    while text.len() < 202 {
        text.push('\u{00e9}');
    }
    assert!(log_head(&text).len() <= 200);
}

#[tokio::test]
async fn test_events_ignored_when_not_recording() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = test_session(dir.path());
    session.start_navigating();
    session
        .process_message(&json!({
            "method": "Page.frameStartedLoading",
            "params": {"frameId": "F1"}
        }))
        .await;
    assert!(session.monitor().main_frame().is_none());
}

#[tokio::test]
async fn test_event_dispatch_and_devtools_log() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = test_session(dir.path());
    session.start_recording().await;
    session.start_navigating();

    session
        .process_message(&json!({
            "method": "Page.frameStartedLoading",
            "params": {"frameId": "F1"}
        }))
        .await;
    session
        .process_message(&json!({
            "method": "Network.requestWillBeSent",
            "params": {
                "requestId": "R1",
                "frameId": "F1",
                "timestamp": 100.0,
                "request": {"url": "https://example.com/", "headers": {}}
            }
        }))
        .await;
    session
        .process_message(&json!({"method": "Page.loadEventFired", "params": {"timestamp": 1.0}}))
        .await;
    session
        .process_message(&json!({
            "method": "Console.messageAdded",
            "params": {"message": {"text": "hello"}}
        }))
        .await;
    // Inspector events are handled but never logged.
    session
        .process_message(&json!({"method": "Inspector.targetCrashed"}))
        .await;

    assert_eq!(session.monitor().main_frame(), Some("F1"));
    assert!(session.monitor().page_loaded().is_some());
    assert_eq!(session.task.error.as_deref(), Some("Browser crashed."));

    session.stop_recording().await;

    let mut text = String::new();
    GzDecoder::new(
        std::fs::File::open(dir.path().join("run1_devtools.json.gz")).unwrap(),
    )
    .read_to_string(&mut text)
    .unwrap();
    let events: Vec<Value> = serde_json::from_str(&text).unwrap();
    // Preamble + page frame + network + load + console.
    assert_eq!(events.len(), 5);
    assert_eq!(events[1]["method"], "Page.frameStartedLoading");
    assert_eq!(events[4]["method"], "Console.messageAdded");
}

#[tokio::test]
async fn test_interstitial_blocks_renderer_commands() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = test_session(dir.path());
    session.start_recording().await;
    session
        .process_message(&json!({"method": "Page.interstitialShown", "params": {}}))
        .await;
    assert!(session.main_thread_blocked());
    assert_eq!(
        session.monitor().nav_error(),
        Some("Page opened a modal interstitial")
    );
    // Gated commands return nothing instead of hanging.
    assert!(session.execute_js("1 + 1").await.is_none());
}

#[tokio::test]
async fn test_main_request_failure_latches_nav_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = test_session(dir.path());
    session.start_recording().await;
    session.start_navigating();
    session
        .process_message(&json!({
            "method": "Page.frameStartedLoading",
            "params": {"frameId": "F1"}
        }))
        .await;
    session
        .process_message(&json!({
            "method": "Network.requestWillBeSent",
            "params": {
                "requestId": "R1",
                "frameId": "F1",
                "timestamp": 100.0,
                "request": {"url": "https://bogus.example/"}
            }
        }))
        .await;
    session
        .process_message(&json!({
            "method": "Network.loadingFailed",
            "params": {
                "requestId": "R1",
                "errorText": "net::ERR_NAME_NOT_RESOLVED",
                "canceled": false
            }
        }))
        .await;
    assert_eq!(
        session.monitor().nav_error(),
        Some("net::ERR_NAME_NOT_RESOLVED")
    );
    // The error is promoted when the main frame stops without a load event.
    session
        .process_message(&json!({
            "method": "Page.frameStoppedLoading",
            "params": {"frameId": "F1"}
        }))
        .await;
    assert_eq!(
        session.task.error.as_deref(),
        Some("net::ERR_NAME_NOT_RESOLVED")
    );
}

#[tokio::test]
async fn test_stop_recording_without_connection_finishes_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = test_session(dir.path());
    session.start_recording().await;
    assert!(session.is_recording());
    session.stop_recording().await;
    assert!(!session.is_recording());
    // No events were logged, so no devtools file was created.
    assert!(!dir.path().join("run1_devtools.json.gz").exists());
}

#[tokio::test]
async fn test_prepare_creates_video_directory() {
    let dir = tempfile::tempdir().unwrap();
    let session = test_session(dir.path());
    assert!(session.task.video_dir().is_dir());
}
