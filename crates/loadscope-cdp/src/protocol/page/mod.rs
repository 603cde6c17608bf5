//! Page domain types.

use serde::Deserialize;

/// Parameters shared by the frame lifecycle events
/// (`Page.frameStartedLoading`, `Page.frameStoppedLoading`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameEventParams {
    /// Identifier of the frame the event is about.
    pub frame_id: String,
}

/// Result of Page.captureScreenshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureScreenshotResult {
    /// Base64-encoded image data.
    pub data: String,
}
