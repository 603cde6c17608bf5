//! CDP error types.

use thiserror::Error;

/// Errors that can occur during CDP communication.
#[derive(Error, Debug)]
pub enum CdpError {
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket connection was lost during operation.
    #[error("WebSocket connection lost")]
    ConnectionLost,

    /// Failed to send a CDP message.
    #[error("failed to send CDP message: {0}")]
    SendFailed(String),

    /// CDP protocol error returned by the browser.
    #[error("CDP protocol error {code}: {message}")]
    Protocol { code: i64, message: String },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Response timeout.
    #[error("response timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Failed to parse the discovery or WebSocket URL.
    #[error("invalid devtools URL: {0}")]
    InvalidUrl(String),

    /// HTTP request to the discovery endpoint failed.
    #[error("devtools HTTP request failed: {0}")]
    HttpRequestFailed(String),

    /// The discovery endpoint answered but tab selection failed.
    #[error("tab discovery failed for {url}: {reason}")]
    DiscoveryFailed { url: String, reason: String },

    /// No page-type tab with a debugger socket was found.
    #[error("no debuggable page tab available")]
    NoDebuggableTab,
}

impl From<tokio_tungstenite::tungstenite::Error> for CdpError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        match err {
            tokio_tungstenite::tungstenite::Error::ConnectionClosed
            | tokio_tungstenite::tungstenite::Error::AlreadyClosed => Self::ConnectionLost,
            other => Self::ConnectionFailed(other.to_string()),
        }
    }
}
