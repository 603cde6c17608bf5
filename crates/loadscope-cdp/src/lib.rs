//! # Loadscope CDP - Chrome DevTools Protocol plumbing
//!
//! Low-level Chrome DevTools Protocol (CDP) transport for the loadscope
//! page-measurement core. This crate owns everything below the measurement
//! semantics:
//!
//! - WebSocket connection management with a background-delivered inbound
//!   message queue drained from the foreground via [`DevToolsConnection::poll`]
//! - Tab discovery over the browser's `/json` HTTP endpoint
//! - CDP message serialization and classification
//! - The trace-batch fast path: `Tracing.dataCollected` payloads are routed
//!   to an installed [`TraceHandler`] on the background task, with a cheap
//!   wake sentinel enqueued so the foreground pump makes progress
//!
//! ## Quick Start
//!
//! ```no_run
//! use loadscope_cdp::{DevToolsConnection, DevToolsEndpoint};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), loadscope_cdp::CdpError> {
//! // Discover a debuggable page tab and connect to it
//! let endpoint = DevToolsEndpoint::new("http://localhost:9222/json")?;
//! let tabs = endpoint.list_tabs(Duration::from_secs(10)).await?;
//! let (tab, _extras) = loadscope_cdp::select_page_tab(tabs);
//! let tab = tab.ok_or(loadscope_cdp::CdpError::NoDebuggableTab)?;
//!
//! let ws_url = tab.web_socket_debugger_url.ok_or(loadscope_cdp::CdpError::NoDebuggableTab)?;
//! let mut conn = DevToolsConnection::connect(&ws_url).await?;
//! conn.send(r#"{"id":1,"method":"Page.enable","params":{}}"#.to_string()).await?;
//! while let Some(raw) = conn.poll(Duration::from_secs(1)).await {
//!     println!("inbound: {raw}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`connection`] - WebSocket connection, inbound FIFO, tab discovery
//! - [`transport`] - Message types and serialization
//! - [`protocol`] - Typed CDP domain payloads used by the measurement core
//! - [`error`] - Error types

pub mod connection;
pub mod error;
pub mod protocol;
pub mod transport;

pub use connection::discovery::{DevToolsEndpoint, TabInfo, select_page_tab};
pub use connection::{DevToolsConnection, TraceHandler, WAKE_SENTINEL};
pub use error::CdpError;
pub use transport::{CdpEvent, CdpMessage, CdpRequest, CdpResponse};
