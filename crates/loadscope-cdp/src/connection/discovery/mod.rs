//! Tab discovery via the browser's remote debugging HTTP endpoint.
//!
//! A Chromium-family browser started with `--remote-debugging-port` serves a
//! tab list at `/json`; each descriptor carries the WebSocket URL for that
//! tab's debugger. This module fetches and filters that list and can close
//! surplus tabs through `/json/close/{id}`.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::CdpError;

/// Delay between discovery attempts while the browser is still coming up.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// A tab descriptor from the `/json` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TabInfo {
    /// Tab identifier, used with the `/close` endpoint.
    pub id: Option<String>,
    /// Descriptor type; only `"page"` tabs are debuggable targets here.
    #[serde(rename = "type")]
    pub tab_type: Option<String>,
    /// Tab title.
    pub title: Option<String>,
    /// Current URL.
    pub url: Option<String>,
    /// The WebSocket URL for this tab's debugger.
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: Option<String>,
}

impl TabInfo {
    /// Whether this descriptor is a connectable page tab.
    pub fn is_debuggable_page(&self) -> bool {
        self.tab_type.as_deref() == Some("page")
            && self.web_socket_debugger_url.is_some()
            && self.id.is_some()
    }
}

/// Pick the tab to instrument.
///
/// The first debuggable page tab is kept; every later debuggable page tab is
/// returned separately so the caller can close it before attaching (stray
/// tabs steal focus and skew timings).
pub fn select_page_tab(tabs: Vec<TabInfo>) -> (Option<TabInfo>, Vec<TabInfo>) {
    let mut selected = None;
    let mut extras = Vec::new();
    for tab in tabs {
        if !tab.is_debuggable_page() {
            continue;
        }
        if selected.is_none() {
            selected = Some(tab);
        } else {
            extras.push(tab);
        }
    }
    (selected, extras)
}

/// Client for a browser's `/json` discovery endpoint.
#[derive(Debug, Clone)]
pub struct DevToolsEndpoint {
    json_url: Url,
    client: reqwest::Client,
}

impl DevToolsEndpoint {
    /// Create an endpoint client for a `/json` list URL
    /// (e.g. `http://localhost:9222/json`).
    ///
    /// # Errors
    ///
    /// Returns an error if the URL does not parse or is not HTTP.
    pub fn new(json_url: &str) -> Result<Self, CdpError> {
        let parsed =
            Url::parse(json_url).map_err(|e| CdpError::InvalidUrl(format!("{json_url}: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(CdpError::InvalidUrl(format!(
                "expected http or https scheme, got: {}",
                parsed.scheme()
            )));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| CdpError::HttpRequestFailed(e.to_string()))?;
        Ok(Self {
            json_url: parsed,
            client,
        })
    }

    /// The discovery URL this endpoint talks to.
    pub fn url(&self) -> &str {
        self.json_url.as_str()
    }

    /// Fetch the current tab list.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, times out, or the response is
    /// not a tab-descriptor list.
    #[instrument(level = "debug", skip(self), fields(url = %self.json_url))]
    pub async fn list_tabs(&self, timeout: Duration) -> Result<Vec<TabInfo>, CdpError> {
        let response = self
            .client
            .get(self.json_url.as_str())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CdpError::Timeout(timeout)
                } else {
                    CdpError::HttpRequestFailed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(CdpError::DiscoveryFailed {
                url: self.json_url.to_string(),
                reason: format!("HTTP status {}", response.status()),
            });
        }

        let tabs: Vec<TabInfo> =
            response
                .json()
                .await
                .map_err(|e| CdpError::DiscoveryFailed {
                    url: self.json_url.to_string(),
                    reason: format!("failed to parse tab list: {e}"),
                })?;
        debug!(tab_count = tabs.len(), "Fetched devtools tab list");
        Ok(tabs)
    }

    /// Ask the browser to close a tab.
    ///
    /// # Errors
    ///
    /// Returns an error if the close request cannot be delivered.
    #[instrument(level = "debug", skip(self))]
    pub async fn close_tab(&self, tab_id: &str) -> Result<(), CdpError> {
        let close_url = format!("{}/close/{tab_id}", self.json_url.as_str());
        info!(url = %close_url, "Closing extra tab");
        self.client
            .get(&close_url)
            .send()
            .await
            .map_err(|e| CdpError::HttpRequestFailed(e.to_string()))?;
        Ok(())
    }

    /// Wait until the debugging interface reports a debuggable page tab,
    /// without connecting to it. Returns `false` if the deadline passes
    /// first.
    #[instrument(level = "info", skip(self), fields(url = %self.json_url))]
    pub async fn wait_for_available(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            match self.list_tabs(timeout).await {
                Ok(tabs) => {
                    if tabs.iter().any(TabInfo::is_debuggable_page) {
                        debug!("Devtools interface is available");
                        return true;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Devtools interface not available yet");
                }
            }
            tokio::time::sleep(RETRY_DELAY).await;
        }
        false
    }
}
