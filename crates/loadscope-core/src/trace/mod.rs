//! Streaming trace sink and screenshot sampler.
//!
//! Trace batches arrive on the transport's background task after
//! `Tracing.end`. The sink appends every ordinary event to the compressed
//! trace stream and forwards it to the analyzer; devtools screenshot events
//! are diverted into the filmstrip sampler instead, which time-samples and
//! deduplicates frames before anything touches disk.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use loadscope_cdp::TraceHandler;
use loadscope_cdp::protocol::tracing::DataCollectedParams;
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use tracing::{debug, warn};

use crate::artifacts::{GzFile, filmstrip_path, finish_gz, gz_writer};

pub mod analyzer;

use analyzer::{TimelineAnalyzer, TraceAnalyzer};

/// Append one event to the trace stream as `,\n<json>`.
fn append_trace_event(file: &mut GzFile, event: &Value) -> std::io::Result<()> {
    file.write_all(b",\n")?;
    serde_json::to_writer(&mut *file, event)?;
    Ok(())
}

/// Sampling tiers: minimum spacing between kept frames by elapsed time.
fn min_interval_ms(ms_elapsed: i64) -> i64 {
    if ms_elapsed > 40_000 {
        2_000
    } else if ms_elapsed > 20_000 {
        500
    } else {
        100
    }
}

/// One captured filmstrip frame, held as the raw base64 payload so
/// duplicate detection is a straight string compare.
#[derive(Debug, Clone)]
struct Frame {
    image: String,
    time_ms: i64,
    path: String,
}

impl Frame {
    fn write(&self) {
        match BASE64.decode(&self.image) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&self.path, bytes) {
                    warn!(path = %self.path, error = %e, "Failed to write filmstrip frame");
                }
            }
            Err(e) => warn!(path = %self.path, error = %e, "Undecodable screenshot payload"),
        }
    }
}

type AnalyzerFactory = Box<dyn Fn() -> Box<dyn TraceAnalyzer> + Send>;

/// Demultiplexes trace batches into the trace stream, the filmstrip, and
/// the analyzer.
pub struct TraceSink {
    trace_file: Option<GzFile>,
    analyzer: Option<Box<dyn TraceAnalyzer>>,
    analyzer_factory: AnalyzerFactory,
    path_base: Option<String>,
    video_prefix: Option<String>,
    /// Trace-clock origin in microseconds.
    trace_ts_start: Option<i64>,
    last_image: Option<Frame>,
    pending_image: Option<Frame>,
    event_counts: HashMap<String, u64>,
}

impl std::fmt::Debug for TraceSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceSink")
            .field("active", &self.is_active())
            .field("trace_ts_start", &self.trace_ts_start)
            .finish_non_exhaustive()
    }
}

impl Default for TraceSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceSink {
    /// Sink with the built-in [`TimelineAnalyzer`].
    pub fn new() -> Self {
        Self::with_analyzer_factory(Box::new(|| Box::new(TimelineAnalyzer::new())))
    }

    /// Sink with a custom analyzer, created lazily on the first batch.
    pub fn with_analyzer_factory(analyzer_factory: AnalyzerFactory) -> Self {
        Self {
            trace_file: None,
            analyzer: None,
            analyzer_factory,
            path_base: None,
            video_prefix: None,
            trace_ts_start: None,
            last_image: None,
            pending_image: None,
            event_counts: HashMap::new(),
        }
    }

    /// Whether a processing window is open.
    pub fn is_active(&self) -> bool {
        self.path_base.is_some()
    }

    /// Per-category event counts seen so far.
    pub fn event_counts(&self) -> &HashMap<String, u64> {
        &self.event_counts
    }

    /// Open a processing window. `start_timestamp` is the browser-clock
    /// origin in seconds (from the main request), when known; otherwise the
    /// origin latches from the first navigation mark in the trace itself.
    /// `video_prefix` enables the filmstrip sampler.
    pub fn start_processing(
        &mut self,
        path_base: String,
        video_prefix: Option<String>,
        start_timestamp: Option<f64>,
    ) {
        self.last_image = None;
        self.trace_ts_start = start_timestamp.map(|seconds| (seconds * 1_000_000.0) as i64);
        self.path_base = Some(path_base);
        self.video_prefix = video_prefix;
    }

    /// Process one raw `Tracing.dataCollected` message.
    pub fn process_batch(&mut self, raw: &str) {
        if !self.is_active() {
            return;
        }
        let params = match serde_json::from_str::<Value>(raw) {
            Ok(msg) => msg.get("params").cloned().unwrap_or(Value::Null),
            Err(e) => {
                warn!(error = %e, "Undecodable trace batch, dropping");
                return;
            }
        };
        let batch = match serde_json::from_value::<DataCollectedParams>(params) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "Malformed trace batch, dropping");
                return;
            }
        };
        if batch.value.is_empty() {
            return;
        }
        if self.trace_file.is_none() && !self.open_trace_file() {
            return;
        }
        for event in &batch.value {
            self.process_trace_event(event);
        }
        debug!(count = batch.value.len(), "Processed trace events");
    }

    fn open_trace_file(&mut self) -> bool {
        let Some(path_base) = self.path_base.as_deref() else {
            return false;
        };
        let path = format!("{path_base}_trace.json.gz");
        match gz_writer(&path) {
            Ok(mut file) => {
                if let Err(e) = file.write_all(b"{\"traceEvents\":[{}") {
                    warn!(path = %path, error = %e, "Failed to start trace stream");
                    return false;
                }
                self.trace_file = Some(file);
                self.analyzer = Some((self.analyzer_factory)());
                true
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to open trace stream");
                false
            }
        }
    }

    fn process_trace_event(&mut self, event: &Value) {
        let mut is_screenshot = false;
        if let (Some(cat), Some(name), Some(ts)) = (
            event.get("cat").and_then(Value::as_str),
            event.get("name").and_then(Value::as_str),
            event.get("ts").and_then(Value::as_i64),
        ) {
            *self.event_counts.entry(cat.to_string()).or_insert(0) += 1;
            if self.trace_ts_start.is_none()
                && (name == "navigationStart" || name == "fetchStart")
                && (cat.contains("blink.user_timing") || cat.contains("rail"))
            {
                debug!(ts, "Trace start detected");
                self.trace_ts_start = Some(ts);
            }
            if self.video_prefix.is_some()
                && name == "Screenshot"
                && cat.contains("devtools.screenshot")
            {
                is_screenshot = true;
                self.process_screenshot(event);
            }
        }
        if !is_screenshot {
            if let Some(file) = self.trace_file.as_mut() {
                if let Err(e) = append_trace_event(file, event) {
                    warn!(error = %e, "Trace stream write failed");
                }
            }
            if let Some(analyzer) = self.analyzer.as_mut() {
                analyzer.process_event(event);
            }
        }
    }

    /// Time-sample one screenshot event into the filmstrip.
    fn process_screenshot(&mut self, event: &Value) {
        let Some(trace_ts_start) = self.trace_ts_start else {
            return;
        };
        let Some(prefix) = self.video_prefix.clone() else {
            return;
        };
        let Some(ts) = event.get("ts").and_then(Value::as_f64) else {
            return;
        };
        let Some(image) = event.pointer("/args/snapshot").and_then(Value::as_str) else {
            return;
        };
        let ms_elapsed = ((ts - trace_ts_start as f64) / 1000.0).round() as i64;
        if ms_elapsed < 0 {
            return;
        }
        let path = filmstrip_path(&prefix, ms_elapsed);
        debug!(ts, path = %path, "Video frame");
        let min_interval = min_interval_ms(ms_elapsed);

        // Inside the sampling interval: not kept (yet), but remembered as
        // the pending frame in case a gap needs bridging later.
        if let Some(last) = &self.last_image {
            if ms_elapsed - last.time_ms < min_interval {
                if let Some(pending) = &self.pending_image {
                    debug!(path = %pending.path, "Discarding pending frame");
                }
                self.pending_image = Some(Frame {
                    image: image.to_string(),
                    time_ms: ms_elapsed,
                    path,
                });
                return;
            }
        }

        let is_duplicate = match (&self.pending_image, &self.last_image) {
            (Some(pending), _) => pending.image == image,
            (None, Some(last)) => last.image == image,
            (None, None) => false,
        };
        if is_duplicate {
            debug!(path = %path, "Dropping duplicate frame");
            return;
        }

        // When the gap since the last kept frame is more than double the
        // sampling interval, the pending frame bridges it: flush both.
        if let (Some(last), Some(pending)) = (&self.last_image, &self.pending_image) {
            if pending.image != last.image && ms_elapsed - last.time_ms > 2 * min_interval {
                pending.write();
            }
        }
        self.pending_image = None;
        let frame = Frame {
            image: image.to_string(),
            time_ms: ms_elapsed,
            path,
        };
        frame.write();
        self.last_image = Some(frame);
    }

    /// Close the trace stream with its `\n]}` suffix. Called from the
    /// background task on `tracingComplete` and again defensively from
    /// [`stop_processing`].
    ///
    /// [`stop_processing`]: TraceSink::stop_processing
    pub fn close_trace_file(&mut self) {
        if let Some(mut file) = self.trace_file.take() {
            let mut result = file.write_all(b"\n]}");
            if result.is_ok() {
                result = finish_gz(file);
            }
            if let Err(e) = result {
                warn!(error = %e, "Failed to close trace stream");
            }
        }
    }

    /// Close the processing window: flush a still-pending frame, close the
    /// trace stream, and run the analyzer's finalize hooks in order.
    pub fn stop_processing(&mut self) {
        if let (Some(pending), Some(last)) = (&self.pending_image, &self.last_image) {
            if pending.image != last.image {
                pending.write();
            }
        }
        self.pending_image = None;
        self.trace_ts_start = None;
        self.close_trace_file();

        if let Some(mut analyzer) = self.analyzer.take() {
            if let Some(path_base) = self.path_base.clone() {
                debug!("Post-processing the trace netlog events");
                analyzer.post_process_netlog_events();
                debug!("Processing the trace timeline events");
                analyzer.process_timeline_events();
                let writers: [(&str, fn(&dyn TraceAnalyzer, &str) -> std::io::Result<()>); 7] = [
                    ("_user_timing.json.gz", |a, p| a.write_user_timing(p)),
                    ("_timeline_cpu.json.gz", |a, p| a.write_cpu_slices(p)),
                    ("_script_timing.json.gz", |a, p| a.write_script_timings(p)),
                    ("_feature_usage.json.gz", |a, p| a.write_feature_usage(p)),
                    ("_interactive.json.gz", |a, p| a.write_interactive(p)),
                    ("_netlog_requests.json.gz", |a, p| a.write_netlog_requests(p)),
                    ("_v8stats.json.gz", |a, p| a.write_v8_stats(p)),
                ];
                for (suffix, write) in writers {
                    let path = format!("{path_base}{suffix}");
                    if let Err(e) = write(analyzer.as_ref(), &path) {
                        warn!(path = %path, error = %e, "Analyzer artifact write failed");
                    }
                }
            }
        }
        self.video_prefix = None;
        self.last_image = None;
        self.path_base = None;
        debug!(counts = ?self.event_counts, "Trace event counts");
        self.event_counts.clear();
    }
}

/// Shared handle installed on the transport so batches are processed on the
/// background task while the foreground drives start/stop. The two sides are
/// serialized by the protocol; the mutex makes that explicit.
#[derive(Clone)]
pub struct SharedTraceSink(Arc<Mutex<TraceSink>>);

impl SharedTraceSink {
    /// Wrap a sink for sharing with the transport.
    pub fn new(sink: TraceSink) -> Self {
        Self(Arc::new(Mutex::new(sink)))
    }

    /// Lock the sink for foreground start/stop operations.
    pub fn lock(&self) -> MutexGuard<'_, TraceSink> {
        self.0.lock()
    }
}

impl Default for SharedTraceSink {
    fn default() -> Self {
        Self::new(TraceSink::new())
    }
}

impl TraceHandler for SharedTraceSink {
    fn data_collected(&self, raw: &str) {
        self.0.lock().process_batch(raw);
    }

    fn tracing_complete(&self) {
        self.0.lock().close_trace_file();
    }
}
