//! The session controller: single foreground owner of the devtools
//! connection.
//!
//! One `DevToolsSession` drives one measurement: connect → start recording →
//! wait for the page load → stop recording → collect artifacts. All session
//! state and every file handle live on this foreground path; the transport's
//! background task only feeds the inbound FIFO and the trace sink's fast
//! path.
//!
//! Failures during a run never propagate as `Err`: they are recorded on
//! [`Task::error`] and the stop path still runs, so partial artifacts are
//! flushed and file footers are written.
//!
//! [`Task::error`]: crate::config::Task

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use loadscope_cdp::connection::discovery::{DevToolsEndpoint, select_page_tab};
use loadscope_cdp::protocol::network::GetResponseBodyResult;
use loadscope_cdp::protocol::page::{CaptureScreenshotResult, FrameEventParams};
use loadscope_cdp::protocol::runtime::EvaluateResult;
use loadscope_cdp::{CdpRequest, CdpResponse, DevToolsConnection};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::artifacts::{BodyArchive, EventLog, filmstrip_path};
use crate::config::{Job, Options, Task};
use crate::error::CoreError;
use crate::navigation::{PageLoadMonitor, WaitOutcome};
use crate::requests::{RequestSummary, RequestTracker, header_value, parse_content_length};
use crate::screenshot;
use crate::trace::SharedTraceSink;

/// Default wait for a synchronous command reply.
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Foreground pump granularity.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Empty polls tolerated while collecting the trace (~30s quiescence gap).
const TRACE_QUIESCENCE_POLLS: u32 = 30;

/// Delay between connect attempts.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Video bodies above this size are never fetched.
const MAX_VIDEO_BODY_BYTES: u64 = 10_000_000;

/// Consecutive no-reply body fetches before the pass gives up.
const BODY_FAIL_LIMIT: u32 = 2;

/// Trace categories recorded when the job asks for a full trace without
/// naming its own set.
const DEFAULT_TRACE_CATEGORIES: &str =
    "-*,toplevel,blink,v8,cc,gpu,blink.net,disabled-by-default-v8.runtime_stats";

/// Commands that need the renderer main thread and would hang behind a
/// modal interstitial.
fn requires_renderer(method: &str) -> bool {
    method == "Page.captureScreenshot" || method == "Runtime.evaluate"
}

/// Leading bytes of a frame for debug logging, backed off to a char
/// boundary.
fn log_head(text: &str) -> &str {
    let mut end = text.len().min(200);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Consecutive-failure counter for the response-body pass.
///
/// Only a fetch with no reply at all counts as a failure; a reply without a
/// body (the browser no longer has it) proves the command channel works and
/// resets the counter.
#[derive(Debug, Default)]
pub(crate) struct BodyFetchPolicy {
    fail_count: u32,
}

impl BodyFetchPolicy {
    pub(crate) fn give_up(&self) -> bool {
        self.fail_count >= BODY_FAIL_LIMIT
    }

    pub(crate) fn record_no_reply(&mut self) {
        self.fail_count += 1;
    }

    pub(crate) fn record_missing_body(&mut self) {
        self.fail_count = 0;
    }

    pub(crate) fn record_success(&mut self) {
        self.fail_count = 0;
    }
}

/// Whether a body should be fetched and how it will be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyPlan {
    /// Fetch; `is_text` adds it to the zip alongside the raw file.
    Fetch { is_text: bool },
    /// Not worth fetching for this run.
    Skip,
}

/// Decide whether a 200-response body is wanted.
pub(crate) fn plan_body_fetch(
    content_type: Option<&str>,
    content_length: u64,
    zip_enabled: bool,
    optimization_checks_disabled: bool,
) -> BodyPlan {
    let content_type = content_type.map(str::to_lowercase);
    let is_text = content_type.as_deref().is_some_and(|ct| {
        ct.starts_with("text/") || ct.contains("javascript") || ct.contains("json")
    });
    if content_type
        .as_deref()
        .is_some_and(|ct| ct.starts_with("video/"))
        && content_length > MAX_VIDEO_BODY_BYTES
    {
        return BodyPlan::Skip;
    }
    if optimization_checks_disabled && !zip_enabled {
        return BodyPlan::Skip;
    }
    BodyPlan::Fetch { is_text }
}

/// Interface into a Chromium-family browser's remote debugging protocol for
/// one measurement.
pub struct DevToolsSession {
    options: Options,
    job: Job,
    /// The run descriptor; `task.error` carries the outcome.
    pub task: Task,
    endpoint: DevToolsEndpoint,
    connection: Option<DevToolsConnection>,
    tab_id: Option<String>,
    use_devtools_video: bool,
    command_id: u64,
    recording: bool,
    recording_video: bool,
    trace_enabled: bool,
    main_thread_blocked: bool,
    monitor: PageLoadMonitor,
    tracker: RequestTracker,
    trace_sink: SharedTraceSink,
    event_log: EventLog,
    response_bodies: HashMap<String, Vec<u8>>,
    mobile_viewport: Option<String>,
    path_base: String,
    video_prefix: String,
}

impl DevToolsSession {
    /// Create a session for one measurement task.
    ///
    /// # Errors
    ///
    /// Returns an error if the discovery URL is invalid or the video
    /// directory cannot be created.
    pub fn new(
        options: Options,
        job: Job,
        task: Task,
        use_devtools_video: bool,
    ) -> Result<Self, CoreError> {
        let endpoint = DevToolsEndpoint::new(&task.discovery_url())?;
        let path_base = task.path_base();
        let video_prefix = task.video_prefix();
        let mut session = Self {
            options,
            job,
            task,
            endpoint,
            connection: None,
            tab_id: None,
            use_devtools_video,
            command_id: 0,
            recording: false,
            recording_video: false,
            trace_enabled: false,
            main_thread_blocked: false,
            monitor: PageLoadMonitor::new(),
            tracker: RequestTracker::new(),
            trace_sink: SharedTraceSink::default(),
            event_log: EventLog::new(&path_base),
            response_bodies: HashMap::new(),
            mobile_viewport: None,
            path_base,
            video_prefix,
        };
        session.prepare()?;
        Ok(session)
    }

    /// Reset per-run state and make sure the artifact directories exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the video directory cannot be created.
    pub fn prepare(&mut self) -> Result<(), CoreError> {
        self.tracker.reset();
        self.response_bodies.clear();
        self.monitor.clear_error();
        self.path_base = self.task.path_base();
        self.video_prefix = self.task.video_prefix();
        self.event_log = EventLog::new(&self.path_base);
        std::fs::create_dir_all(self.task.video_dir())?;
        Ok(())
    }

    /// The job this session records under.
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Navigation state, for callers that inspect progress.
    pub fn monitor(&self) -> &PageLoadMonitor {
        &self.monitor
    }

    /// Whether events are currently being recorded.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// The detected mobile viewport geometry, once known.
    pub fn mobile_viewport(&self) -> Option<&str> {
        self.mobile_viewport.as_deref()
    }

    /// Whether an interstitial has blocked the renderer main thread,
    /// gating screenshot and script-evaluation commands.
    pub fn main_thread_blocked(&self) -> bool {
        self.main_thread_blocked
    }

    /// Bodies fetched by the last collection pass, keyed by request id.
    pub fn response_bodies(&self) -> &HashMap<String, Vec<u8>> {
        &self.response_bodies
    }

    /// Wait for the debugging interface to come up without connecting.
    pub async fn wait_for_available(&self, timeout: Duration) -> bool {
        self.endpoint.wait_for_available(timeout).await
    }

    /// Connect to the browser: discover the page tab, close any extras, and
    /// open the debugger socket, retrying until `timeout`.
    ///
    /// Both the discovered host and a `localhost` → `127.0.0.1` rewrite are
    /// attempted per target; dual-stack resolution sometimes breaks the
    /// former.
    ///
    /// # Errors
    ///
    /// Returns a timeout error when no tab could be connected before the
    /// deadline.
    #[instrument(level = "info", skip(self))]
    pub async fn connect(&mut self, timeout: Duration) -> Result<(), CoreError> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let tabs = match self.endpoint.list_tabs(timeout).await {
                Ok(tabs) => tabs,
                Err(e) => {
                    warn!(error = %e, "Connect to devtools error");
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                    continue;
                }
            };
            let (selected, extras) = select_page_tab(tabs);
            let Some(tab) = selected else {
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                continue;
            };
            for extra in extras {
                if let Some(id) = extra.id.as_deref() {
                    let _ = self.endpoint.close_tab(id).await;
                }
            }
            let Some(ws_url) = tab.web_socket_debugger_url.clone() else {
                continue;
            };
            match DevToolsConnection::connect(&ws_url).await {
                Ok(connection) => {
                    self.connection = Some(connection);
                    self.tab_id = tab.id.clone();
                    info!(tab_id = ?self.tab_id, "Connected to devtools");
                    return Ok(());
                }
                Err(e) => warn!(error = %e, "Connect to devtools websocket error"),
            }
            // Dual-stack workaround: retry the same tab over IPv4 loopback.
            let fallback = ws_url.replace("localhost", "127.0.0.1");
            if fallback != ws_url {
                match DevToolsConnection::connect(&fallback).await {
                    Ok(connection) => {
                        self.connection = Some(connection);
                        self.tab_id = tab.id.clone();
                        info!(tab_id = ?self.tab_id, "Connected to devtools via 127.0.0.1");
                        return Ok(());
                    }
                    Err(e) => warn!(error = %e, "Connect to devtools websocket error"),
                }
            }
            tokio::time::sleep(CONNECT_RETRY_DELAY).await;
        }
        Err(CoreError::Cdp(loadscope_cdp::CdpError::Timeout(timeout)))
    }

    /// Close the connection and, when `close_tab` is set, the debugged tab.
    pub async fn close(&mut self, close_tab: bool) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
        if close_tab {
            if let Some(tab_id) = self.tab_id.as_deref() {
                let _ = self.endpoint.close_tab(tab_id).await;
            }
        }
        self.tab_id = None;
    }

    /// Declare that a known navigation is about to start.
    pub fn start_navigating(&mut self) {
        self.monitor.start_navigating();
    }

    /// Start capturing devtools, timeline, and trace data.
    pub async fn start_recording(&mut self) {
        if let Err(e) = self.prepare() {
            warn!(error = %e, "Failed to prepare recording state");
        }
        self.recording = true;
        if self.use_devtools_video && self.job.video && self.task.log_data {
            let first_frame = PathBuf::from(filmstrip_path(&self.video_prefix, 0));
            self.grab_screenshot(&first_frame, false, None).await;
        } else if self.mobile_viewport.is_none() && !self.options.android && self.job.mobile {
            // Throwaway capture to derive the crop rectangle.
            let tmp_file = self.task.dir.join("tmp.png");
            self.grab_screenshot(&tmp_file, true, None).await;
            let _ = std::fs::remove_file(&tmp_file);
        }
        self.flush_pending_messages().await;
        self.send_command("Page.enable", json!({})).await;
        self.send_command("Inspector.enable", json!({})).await;
        self.send_command("Network.enable", json!({})).await;
        if let Some(user_agent) = self.job.user_agent.clone() {
            let _ = self.send_command_wait(
                "Network.setUserAgentOverride",
                json!({"userAgent": user_agent}),
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await;
        }
        if let Some(headers) = self.job.headers.clone() {
            let _ = self.send_command_wait(
                "Network.setExtraHTTPHeaders",
                json!({"headers": headers}),
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await;
        }
        if !self.task.block.is_empty() {
            for block in self.task.block.clone() {
                self.send_command("Network.addBlockedURL", json!({"url": block}))
                    .await;
            }
            let urls = self.task.block.clone();
            self.send_command("Network.setBlockedURLs", json!({"urls": urls}))
                .await;
        }
        if self.task.log_data {
            self.send_command("Security.enable", json!({})).await;
            self.send_command("Console.enable", json!({})).await;
            let mut trace = if self.job.trace {
                self.job
                    .trace_categories
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TRACE_CATEGORIES.to_string())
            } else {
                "-*".to_string()
            };
            if self.job.timeline {
                trace += ",blink.console,devtools.timeline,disabled-by-default-blink.feature_usage";
            }
            if self.use_devtools_video && self.job.video {
                trace += ",disabled-by-default-devtools.screenshot";
                self.recording_video = true;
            }
            trace += ",rail,blink.user_timing,netlog";
            self.trace_enabled = true;
            let _ = self.send_command_wait(
                "Tracing.start",
                json!({"categories": trace, "options": "record-as-much-as-possible"}),
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await;
        }
        self.monitor
            .rebase(Instant::now(), self.task.stop_at_onload);
    }

    /// Stop capturing and collect every artifact. Always runs to the end so
    /// open files get their footers.
    pub async fn stop_recording(&mut self) {
        self.recording = false;
        self.send_command("Inspector.disable", json!({})).await;
        self.send_command("Page.disable", json!({})).await;
        self.collect_trace().await;
        self.flush_pending_messages().await;
        if self.task.log_data {
            self.send_command("Security.disable", json!({})).await;
            self.send_command("Console.disable", json!({})).await;
            self.get_response_bodies().await;
        }
        self.send_command("Network.disable", json!({})).await;
        if let Err(e) = self.event_log.close() {
            warn!(error = %e, "Failed to close devtools event log");
        }
    }

    /// End tracing and drain the trace event stream: pump until
    /// `Tracing.tracingComplete` or a ~30s gap with no messages at all.
    async fn collect_trace(&mut self) {
        if !self.trace_enabled {
            return;
        }
        self.trace_enabled = false;
        let video_prefix = self
            .recording_video
            .then(|| self.video_prefix.clone());
        self.trace_sink.lock().start_processing(
            self.path_base.clone(),
            video_prefix,
            self.tracker.start_timestamp(),
        );
        if let Some(connection) = self.connection.as_ref() {
            connection.set_trace_handler(Some(Arc::new(self.trace_sink.clone())));
        }
        self.send_command("Tracing.end", json!({})).await;
        let started = Instant::now();
        info!("Collecting trace events");
        let mut done = false;
        let mut no_message_count = 0;
        while !done && no_message_count < TRACE_QUIESCENCE_POLLS {
            let raw = match self.connection.as_mut() {
                Some(connection) => connection.poll(POLL_INTERVAL).await,
                None => break,
            };
            match raw {
                Some(raw) if !raw.is_empty() => {
                    no_message_count = 0;
                    if let Some(msg) = self.process_raw(&raw).await {
                        if msg.get("method").and_then(Value::as_str)
                            == Some("Tracing.tracingComplete")
                        {
                            done = true;
                        }
                    }
                }
                _ => no_message_count += 1,
            }
        }
        if let Some(connection) = self.connection.as_ref() {
            connection.set_trace_handler(None);
        }
        self.trace_sink.lock().stop_processing();
        debug!(elapsed = ?started.elapsed(), "Time to collect trace");
        self.recording_video = false;
    }

    /// Drain pending inbound messages, processing them while recording.
    pub async fn flush_pending_messages(&mut self) {
        loop {
            let raw = match self.connection.as_mut() {
                Some(connection) => connection.poll(Duration::ZERO).await,
                None => return,
            };
            match raw {
                Some(raw) if !raw.is_empty() => {
                    if self.recording {
                        debug!(head = %log_head(&raw), "Flushing message");
                        self.process_raw(&raw).await;
                    }
                }
                _ => return,
            }
        }
    }

    /// Send a command without waiting for its reply.
    pub async fn send_command(&mut self, method: &str, params: Value) {
        self.send_raw(method, params).await;
    }

    /// Send a command and pump inbound messages until its reply arrives or
    /// `timeout` passes. Events observed while waiting are processed, never
    /// discarded. A timeout yields `None`, not an error.
    pub async fn send_command_wait(
        &mut self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Option<CdpResponse> {
        let id = self.send_raw(method, params).await?;
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let raw = match self.connection.as_mut() {
                Some(connection) => connection.poll(POLL_INTERVAL).await,
                None => return None,
            };
            if let Some(raw) = raw {
                if let Some(msg) = self.process_raw(&raw).await {
                    if msg.get("id").and_then(Value::as_u64) == Some(id) {
                        return serde_json::from_value::<CdpResponse>(msg).ok();
                    }
                }
            }
        }
        warn!(method, "Command timed out");
        None
    }

    /// Serialize and queue one command, allocating its id. Renderer-thread
    /// commands are gated while an interstitial blocks the main thread.
    async fn send_raw(&mut self, method: &str, params: Value) -> Option<u64> {
        if self.main_thread_blocked && requires_renderer(method) {
            debug!(method, "Skipping renderer command, main thread blocked");
            return None;
        }
        let connection = self.connection.as_ref()?;
        self.command_id += 1;
        let id = self.command_id;
        let request = CdpRequest {
            id,
            method: method.to_string(),
            params,
        };
        let out = match serde_json::to_string(&request) {
            Ok(out) => out,
            Err(e) => {
                warn!(method, error = %e, "Failed to serialize command");
                return None;
            }
        };
        debug!(sending = %log_head(&out), "Sending command");
        match connection.send(out).await {
            Ok(()) => Some(id),
            Err(e) => {
                warn!(method, error = %e, "Websocket send error");
                None
            }
        }
    }

    /// Pump messages until the page load settles, errors, or times out.
    pub async fn wait_for_page_load(&mut self) {
        if self.connection.is_none() {
            return;
        }
        let started = Instant::now();
        loop {
            let raw = match self.connection.as_mut() {
                Some(connection) => connection.poll(POLL_INTERVAL).await,
                None => break,
            };
            if let Some(raw) = raw {
                debug!(head = %log_head(&raw), "Inbound message");
                self.process_raw(&raw).await;
            }
            let outcome = self.monitor.completion(
                Instant::now(),
                started,
                self.task.time_limit,
                self.job.min_test_time,
                self.task.activity_time,
                self.task.error.is_some(),
            );
            match outcome {
                Some(WaitOutcome::NavError) => {
                    if self.monitor.page_loaded().is_none() {
                        let error = self
                            .monitor
                            .nav_error()
                            .unwrap_or("Navigation error")
                            .to_string();
                        self.set_task_error(error);
                    }
                    break;
                }
                Some(WaitOutcome::Timeout) => {
                    if self.monitor.page_loaded().is_none() {
                        self.set_task_error("Page Load Timeout");
                    }
                    break;
                }
                Some(WaitOutcome::Settled | WaitOutcome::TaskError) => break,
                None => {}
            }
        }
    }

    /// Parse one raw inbound message, dispatch it, and hand back the parsed
    /// value. Parse failures are logged and dropped; they never abort the
    /// pump.
    async fn process_raw(&mut self, raw: &str) -> Option<Value> {
        match serde_json::from_str::<Value>(raw) {
            Ok(msg) => {
                self.process_message(&msg).await;
                Some(msg)
            }
            Err(e) => {
                warn!(error = %e, "Undecodable devtools message, dropping");
                None
            }
        }
    }

    /// Dispatch one inbound devtools message while recording.
    pub async fn process_message(&mut self, msg: &Value) {
        if !self.recording {
            return;
        }
        let Some(method) = msg.get("method").and_then(Value::as_str) else {
            return;
        };
        let Some((category, event)) = method.split_once('.') else {
            return;
        };
        let event = event.to_string();
        let params = msg.get("params").cloned().unwrap_or_else(|| json!({}));
        match category {
            "Page" => {
                self.process_page_event(&event, &params).await;
                self.log_event(msg);
            }
            "Network" => {
                self.process_network_event(&event, &params);
                self.log_event(msg);
            }
            "Inspector" => self.process_inspector_event(&event),
            _ => self.log_event(msg),
        }
    }

    /// `Page.*` events: navigation lifecycle, dialogs, interstitials.
    async fn process_page_event(&mut self, event: &str, params: &Value) {
        let now = Instant::now();
        match event {
            "loadEventFired" => self.monitor.load_event_fired(now),
            "frameStartedLoading" => {
                if let Ok(frame) = serde_json::from_value::<FrameEventParams>(params.clone()) {
                    self.monitor.frame_started_loading(&frame.frame_id, now);
                }
            }
            "frameStoppedLoading" => {
                if let Ok(frame) = serde_json::from_value::<FrameEventParams>(params.clone()) {
                    if let Some(error) = self.monitor.frame_stopped_loading(&frame.frame_id, now) {
                        self.set_task_error(error);
                    }
                }
            }
            "javascriptDialogOpening" => self.handle_dialog().await,
            "interstitialShown" => {
                self.main_thread_blocked = true;
                debug!("Page opened a modal interstitial");
                self.monitor.set_nav_error("Page opened a modal interstitial");
            }
            _ => {}
        }
    }

    /// Dismiss a modal dialog; if the browser refuses, try accepting it; if
    /// both fail the task is unrecoverable.
    async fn handle_dialog(&mut self) {
        // Boxed: replying to the dialog pumps messages, which may dispatch
        // right back into this handler.
        let dismiss = Box::pin(self.send_command_wait(
            "Page.handleJavaScriptDialog",
            json!({"accept": false}),
            DEFAULT_COMMAND_TIMEOUT,
        ))
        .await;
        if dismiss.is_some_and(|r| r.error.is_some()) {
            let accept = Box::pin(self.send_command_wait(
                "Page.handleJavaScriptDialog",
                json!({"accept": true}),
                DEFAULT_COMMAND_TIMEOUT,
            ))
            .await;
            if accept.is_some_and(|r| r.error.is_some()) {
                self.set_task_error("Page opened a modal dialog");
            }
        }
    }

    /// `Network.*` events feed the request tracker; activity and navigation
    /// errors flow into the monitor.
    fn process_network_event(&mut self, event: &str, params: &Value) {
        let main_frame = self.monitor.main_frame().map(ToString::to_string);
        let outcome = self
            .tracker
            .process_event(event, params, main_frame.as_deref());
        if let Some(error) = outcome.nav_error {
            self.monitor.set_nav_error(error);
        }
        if !self.task.stop_at_onload && outcome.reset_activity {
            self.monitor.touch_activity(Instant::now());
        }
    }

    /// `Inspector.*` events are fatal for the session.
    fn process_inspector_event(&mut self, event: &str) {
        match event {
            "detached" => self.set_task_error("Inspector detached, possibly crashed."),
            "targetCrashed" => self.set_task_error("Browser crashed."),
            _ => {}
        }
    }

    /// Append an event to the devtools log when this run persists data.
    fn log_event(&mut self, msg: &Value) {
        if self.task.log_data {
            if let Err(e) = self.event_log.append(msg) {
                warn!(error = %e, "Failed to log devtools event");
            }
        }
    }

    /// Record the first task-level error; later failures keep the original.
    fn set_task_error(&mut self, error: impl Into<String>) {
        if self.task.error.is_none() {
            let error = error.into();
            warn!(error = %error, "Task error");
            self.task.error = Some(error);
        }
    }

    /// Summaries for every request that hit the network.
    pub fn get_requests(&self) -> HashMap<String, RequestSummary> {
        self.tracker.get_requests(&self.task.bodies_dir())
    }

    /// Fetch response bodies for completed requests: raw bytes under
    /// `bodies/<request-id>`, text bodies additionally into the zip. Two
    /// consecutive fetches with no reply at all abort the pass.
    pub async fn get_response_bodies(&mut self) {
        if self.task.error.is_some() {
            return;
        }
        let requests = self.get_requests();
        if requests.is_empty() {
            return;
        }
        let bodies_dir = self.task.bodies_dir();
        if let Err(e) = std::fs::create_dir_all(&bodies_dir) {
            warn!(error = %e, "Failed to create bodies directory");
            return;
        }
        let mut archive = if self.job.bodies {
            match BodyArchive::create(&self.path_base) {
                Ok(archive) => Some(archive),
                Err(e) => {
                    warn!(error = %e, "Failed to create bodies archive");
                    None
                }
            }
        } else {
            None
        };

        let mut policy = BodyFetchPolicy::default();
        let mut ids: Vec<&String> = requests.keys().collect();
        ids.sort();
        for request_id in ids {
            if policy.give_up() {
                break;
            }
            let request = &requests[request_id];
            if request.status != Some(200) || self.response_bodies.contains_key(request_id) {
                continue;
            }
            let Some(response_headers) = request.response_headers.as_ref() else {
                continue;
            };
            let content_length = header_value(response_headers, "Content-Length")
                .and_then(|value| parse_content_length(&value))
                .or(request.transfer_size)
                .unwrap_or(0);
            debug!(request_id = %request_id, content_length, url = ?request.url, "Body fetch");
            let body_file_path = bodies_dir.join(request_id);
            if body_file_path.exists() {
                continue;
            }
            let content_type = header_value(response_headers, "Content-Type");
            let plan = plan_body_fetch(
                content_type.as_deref(),
                content_length,
                archive.is_some(),
                self.job.noopt,
            );
            let BodyPlan::Fetch { mut is_text } = plan else {
                continue;
            };

            let response = self
                .send_command_wait(
                    "Network.getResponseBody",
                    json!({"requestId": request_id}),
                    DEFAULT_COMMAND_TIMEOUT,
                )
                .await;
            let Some(response) = response else {
                policy.record_no_reply();
                warn!(request_id = %request_id, "No response to body request");
                continue;
            };
            let body = response
                .result
                .and_then(|r| serde_json::from_value::<GetResponseBodyResult>(r).ok());
            let Some(body) = body else {
                policy.record_missing_body();
                warn!(request_id = %request_id, "Missing response body");
                continue;
            };
            if body.body.is_empty() {
                continue;
            }
            policy.record_success();
            let bytes = if body.base64_encoded {
                match BASE64.decode(&body.body) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(request_id = %request_id, error = %e, "Undecodable body");
                        continue;
                    }
                }
            } else {
                is_text = true;
                body.body.into_bytes()
            };
            if is_text {
                if let Some(archive) = archive.as_mut() {
                    match archive.add_text_body(request_id, &bytes) {
                        Ok(name) => debug!(name = %name, "Stored body in zip"),
                        Err(e) => warn!(error = %e, "Failed to add body to zip"),
                    }
                }
            }
            debug!(len = bytes.len(), "Body length");
            if let Err(e) = std::fs::write(&body_file_path, &bytes) {
                warn!(request_id = %request_id, error = %e, "Failed to write body file");
            }
            self.response_bodies.insert(request_id.clone(), bytes);
        }
        if let Some(archive) = archive {
            if let Err(e) = archive.finish() {
                warn!(error = %e, "Failed to finish bodies archive");
            }
        }
    }

    /// Run a script in the page and return its value.
    pub async fn execute_js(&mut self, script: &str) -> Option<Value> {
        if self.task.error.is_some() || self.main_thread_blocked {
            return None;
        }
        let response = self
            .send_command_wait(
                "Runtime.evaluate",
                json!({"expression": script, "returnByValue": true}),
                Duration::from_secs(30),
            )
            .await?;
        let result = response.result?;
        serde_json::from_value::<EvaluateResult>(result)
            .ok()?
            .result?
            .value
    }

    /// Capture a screenshot to `path`: PNG (normalized in place) or JPEG at
    /// the job's quality. Mobile-emulation captures are cropped to the
    /// detected viewport.
    pub async fn grab_screenshot(&mut self, path: &Path, png: bool, resize: Option<u32>) {
        if self.main_thread_blocked {
            return;
        }
        let response = self
            .send_command_wait(
                "Page.captureScreenshot",
                json!({}),
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await;
        let Some(result) = response.and_then(|r| r.result) else {
            return;
        };
        let Ok(capture) = serde_json::from_value::<CaptureScreenshotResult>(result) else {
            return;
        };
        let bytes = match BASE64.decode(&capture.data) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Undecodable screenshot data");
                return;
            }
        };
        if png {
            if let Err(e) = std::fs::write(path, &bytes) {
                warn!(path = %path.display(), error = %e, "Failed to write screenshot");
                return;
            }
            screenshot::normalize_png(path, resize).await;
            self.crop_screenshot(path).await;
        } else {
            let tmp_file = PathBuf::from(format!("{}.png", path.display()));
            if let Err(e) = std::fs::write(&tmp_file, &bytes) {
                warn!(path = %tmp_file.display(), error = %e, "Failed to write screenshot");
                return;
            }
            self.crop_screenshot(&tmp_file).await;
            screenshot::convert_to_jpeg(&tmp_file, path, self.job.image_quality, resize).await;
            let _ = std::fs::remove_file(&tmp_file);
        }
    }

    /// Crop a capture to the emulated viewport, detecting it on first use.
    async fn crop_screenshot(&mut self, path: &Path) {
        if self.options.android || !self.job.mobile {
            return;
        }
        if self.mobile_viewport.is_none() {
            let raw = match image::open(path) {
                Ok(raw) => raw.to_rgb8(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to open capture");
                    return;
                }
            };
            let job_dims = match (self.job.width, self.job.height) {
                (Some(width), Some(height)) => Some((width, height)),
                _ => None,
            };
            let (width, height) = raw.dimensions();
            let viewport = screenshot::detect_viewport(&raw, job_dims);
            self.mobile_viewport = Some(screenshot::viewport_geometry(viewport.0, viewport.1));
            debug!(
                viewport = ?self.mobile_viewport,
                width, height, "Mobile viewport found"
            );
            if let Some(crop_pct) = screenshot::crop_percentages((width, height), viewport) {
                debug!(?crop_pct, "Crop percentages");
                self.task.crop_pct = Some(crop_pct);
            }
        }
        if let Some(geometry) = self.mobile_viewport.clone() {
            screenshot::crop_to_geometry(path, &geometry).await;
        }
    }
}

#[cfg(test)]
mod tests;
