//! Downstream trace-analysis contract.
//!
//! The sink hands every non-screenshot trace event to an analyzer as it
//! streams in, then drives the finalize hooks in a fixed order once tracing
//! completes. Only this ingest/finalize contract matters to the sink; a
//! heavier parser can be swapped in without touching it.

use std::io;

use serde_json::{Value, json};

use crate::artifacts::write_json_gz;

/// Consumer of raw trace events with post-processing hooks.
///
/// The finalize sequence is: [`post_process_netlog_events`], then
/// [`process_timeline_events`], then the writers, each receiving the full
/// output path for its artifact.
///
/// [`post_process_netlog_events`]: TraceAnalyzer::post_process_netlog_events
/// [`process_timeline_events`]: TraceAnalyzer::process_timeline_events
pub trait TraceAnalyzer: Send {
    /// Ingest one raw trace event.
    fn process_event(&mut self, event: &Value);

    /// Reconcile netlog events before anything is written.
    fn post_process_netlog_events(&mut self);

    /// Derive timeline aggregates; prerequisite for the writers below.
    fn process_timeline_events(&mut self);

    /// Write user timing marks and measures.
    fn write_user_timing(&self, path: &str) -> io::Result<()>;

    /// Write main-thread CPU slices.
    fn write_cpu_slices(&self, path: &str) -> io::Result<()>;

    /// Write per-script execution timings.
    fn write_script_timings(&self, path: &str) -> io::Result<()>;

    /// Write blink feature-usage counts.
    fn write_feature_usage(&self, path: &str) -> io::Result<()>;

    /// Write main-thread interactive windows.
    fn write_interactive(&self, path: &str) -> io::Result<()>;

    /// Write the reconciled netlog request list.
    fn write_netlog_requests(&self, path: &str) -> io::Result<()>;

    /// Write v8 runtime statistics.
    fn write_v8_stats(&self, path: &str) -> io::Result<()>;
}

/// Main-thread busy spans longer than this bound interactive windows.
const LONG_TASK_US: i64 = 50_000;

/// Built-in analyzer: buckets events by category and derives the handful of
/// aggregates the artifact set needs. Deliberately shallow.
#[derive(Debug, Default)]
pub struct TimelineAnalyzer {
    user_timing: Vec<Value>,
    netlog: Vec<Value>,
    feature_usage: Vec<Value>,
    v8_stats: Vec<Value>,
    timeline: Vec<Value>,
    cpu_slices: Vec<Value>,
    script_timings: Vec<Value>,
    interactive: Vec<Value>,
}

impl TimelineAnalyzer {
    /// Create an empty analyzer.
    pub fn new() -> Self {
        Self::default()
    }

    fn event_fields(event: &Value) -> Option<(&str, &str, i64)> {
        let cat = event.get("cat")?.as_str()?;
        let name = event.get("name")?.as_str()?;
        let ts = event.get("ts")?.as_i64()?;
        Some((cat, name, ts))
    }
}

impl TraceAnalyzer for TimelineAnalyzer {
    fn process_event(&mut self, event: &Value) {
        let Some((cat, name, ts)) = Self::event_fields(event) else {
            return;
        };
        if cat.contains("blink.user_timing") {
            self.user_timing.push(json!({
                "name": name,
                "ts": ts,
                "args": event.get("args").cloned().unwrap_or(Value::Null),
            }));
        } else if cat.contains("netlog") {
            self.netlog.push(event.clone());
        } else if cat.contains("blink.feature_usage") {
            self.feature_usage.push(json!({
                "name": name,
                "ts": ts,
                "feature": event.pointer("/args/feature").cloned().unwrap_or(Value::Null),
            }));
        } else if cat.contains("v8") && name == "V8.RuntimeStats" {
            self.v8_stats.push(event.clone());
        } else if cat.contains("devtools.timeline") || cat.contains("toplevel") {
            self.timeline.push(event.clone());
        }
    }

    fn post_process_netlog_events(&mut self) {
        self.netlog
            .sort_by_key(|e| e.get("ts").and_then(Value::as_i64).unwrap_or(0));
    }

    fn process_timeline_events(&mut self) {
        for event in &self.timeline {
            let Some((_, name, ts)) = Self::event_fields(event) else {
                continue;
            };
            let Some(dur) = event.get("dur").and_then(Value::as_i64) else {
                continue;
            };
            self.cpu_slices.push(json!({"name": name, "ts": ts, "dur": dur}));
            if name == "EvaluateScript" || name == "FunctionCall" || name == "v8.compile" {
                self.script_timings.push(json!({
                    "name": name,
                    "ts": ts,
                    "dur": dur,
                    "url": event.pointer("/args/data/url").cloned().unwrap_or(Value::Null),
                }));
            }
            if dur >= LONG_TASK_US {
                self.interactive.push(json!([ts, ts + dur]));
            }
        }
    }

    fn write_user_timing(&self, path: &str) -> io::Result<()> {
        write_json_gz(path, &Value::Array(self.user_timing.clone()))
    }

    fn write_cpu_slices(&self, path: &str) -> io::Result<()> {
        write_json_gz(path, &Value::Array(self.cpu_slices.clone()))
    }

    fn write_script_timings(&self, path: &str) -> io::Result<()> {
        write_json_gz(path, &Value::Array(self.script_timings.clone()))
    }

    fn write_feature_usage(&self, path: &str) -> io::Result<()> {
        write_json_gz(path, &Value::Array(self.feature_usage.clone()))
    }

    fn write_interactive(&self, path: &str) -> io::Result<()> {
        write_json_gz(path, &Value::Array(self.interactive.clone()))
    }

    fn write_netlog_requests(&self, path: &str) -> io::Result<()> {
        write_json_gz(path, &Value::Array(self.netlog.clone()))
    }

    fn write_v8_stats(&self, path: &str) -> io::Result<()> {
        write_json_gz(path, &Value::Array(self.v8_stats.clone()))
    }
}
