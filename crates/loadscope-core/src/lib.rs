//! # Loadscope Core - Browser instrumentation for page-load measurement
//!
//! Drives a Chromium-family browser through its remote debugging protocol to
//! capture a reproducible record of a page load: a compressed devtools event
//! log, a compressed tracing log with derived analyses, response bodies, and
//! a filmstrip of screenshots.
//!
//! The center of the crate is [`DevToolsSession`], a single foreground owner
//! of the debugging connection. It issues commands, pumps the inbound message
//! queue, and feeds three state machines:
//!
//! - [`RequestTracker`] reconstructs per-request lifecycles from scattered
//!   `Network.*` notifications
//! - [`PageLoadMonitor`] tracks navigation state and decides when the load
//!   is complete (explicit events, network quiescence, or a hard timeout)
//! - [`TraceSink`] demultiplexes trace-event batches, samples screenshot
//!   frames into the filmstrip, and forwards everything else to a
//!   [`TraceAnalyzer`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use loadscope_core::{DevToolsSession, Job, Options, Task};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), loadscope_core::CoreError> {
//! let job = Job { video: true, trace: true, ..Job::default() };
//! let task = Task::new("/tmp/run1", "page_1", 9222);
//!
//! let mut session = DevToolsSession::new(Options::default(), job, task, true)?;
//! session.connect(Duration::from_secs(30)).await?;
//! session.start_recording().await;
//! session.start_navigating();
//! session.send_command("Page.navigate", serde_json::json!({"url": "https://example.com"})).await;
//! session.wait_for_page_load().await;
//! session.stop_recording().await;
//! session.close(true).await;
//! # Ok(())
//! # }
//! ```

pub mod artifacts;
pub mod config;
pub mod error;
pub mod navigation;
pub mod requests;
pub mod screenshot;
pub mod session;
pub mod trace;

pub use config::{Job, Options, Task};
pub use error::CoreError;
pub use navigation::{PageLoadMonitor, WaitOutcome};
pub use requests::{RequestSummary, RequestTracker};
pub use session::DevToolsSession;
pub use trace::analyzer::{TimelineAnalyzer, TraceAnalyzer};
pub use trace::{SharedTraceSink, TraceSink};
