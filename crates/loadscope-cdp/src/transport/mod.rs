//! CDP message transport types.
//!
//! One debugging socket serves exactly one tab, so messages carry no session
//! routing: a frame is either a command, a reply correlated by `id`, or a
//! pushed domain event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A CDP command message.
#[derive(Debug, Clone, Serialize)]
pub struct CdpRequest {
    /// Monotonically increasing message ID for matching replies.
    pub id: u64,
    /// CDP method name (e.g., "Network.enable").
    pub method: String,
    /// Method parameters.
    pub params: Value,
}

/// A CDP response message.
#[derive(Debug, Clone, Deserialize)]
pub struct CdpResponse {
    /// Message ID matching the request.
    pub id: u64,
    /// Result on success.
    pub result: Option<Value>,
    /// Error on failure.
    pub error: Option<CdpResponseError>,
}

/// Error details in a CDP response.
#[derive(Debug, Clone, Deserialize)]
pub struct CdpResponseError {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub message: String,
    /// Additional error data.
    pub data: Option<String>,
}

/// A CDP event message.
#[derive(Debug, Clone, Deserialize)]
pub struct CdpEvent {
    /// Event method name (e.g., "Page.loadEventFired").
    pub method: String,
    /// Event parameters.
    pub params: Option<Value>,
}

/// An incoming CDP message (either response or event).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CdpMessage {
    /// A response to a previous request.
    Response(CdpResponse),
    /// An event pushed by the browser.
    Event(CdpEvent),
}

impl CdpMessage {
    /// Check if this message is a response with the given ID.
    pub fn is_response_for(&self, id: u64) -> bool {
        matches!(self, Self::Response(resp) if resp.id == id)
    }

    /// Try to extract this as a response.
    pub fn into_response(self) -> Option<CdpResponse> {
        match self {
            Self::Response(resp) => Some(resp),
            Self::Event(_) => None,
        }
    }

    /// Try to extract this as an event.
    pub fn into_event(self) -> Option<CdpEvent> {
        match self {
            Self::Event(evt) => Some(evt),
            Self::Response(_) => None,
        }
    }
}

#[cfg(test)]
mod tests;
