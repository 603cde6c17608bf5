//! Measurement descriptors and artifact path derivation.
//!
//! A measurement is described by three records: [`Options`] (agent-wide
//! switches), [`Job`] (what to capture and under which emulation), and
//! [`Task`] (where one run's artifacts land and its timing bounds). All
//! three deserialize from JSON job descriptors; `Duration` fields use
//! serde's native `{secs, nanos}` form.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Agent-wide options.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Driving a physical Android device; disables mobile-emulation cropping.
    pub android: bool,
}

/// What a measurement job captures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Job {
    /// Capture a screenshot filmstrip.
    pub video: bool,
    /// Record a full trace (toplevel, blink, v8, ...).
    pub trace: bool,
    /// Override the trace category list entirely.
    pub trace_categories: Option<String>,
    /// Record timeline categories (devtools.timeline, feature usage).
    pub timeline: bool,
    /// Archive text response bodies into a zip.
    pub bodies: bool,
    /// Optimization checks are disabled; bodies are only fetched for the zip.
    pub noopt: bool,
    /// JPEG quality for captured frames.
    pub image_quality: u8,
    /// Mobile emulation is active.
    pub mobile: bool,
    /// Emulated viewport width.
    pub width: Option<u32>,
    /// Emulated viewport height.
    pub height: Option<u32>,
    /// User-agent override.
    pub user_agent: Option<String>,
    /// Extra HTTP headers applied to every request.
    pub headers: Option<HashMap<String, String>>,
    /// Minimum test duration before quiescence may end the run.
    pub min_test_time: Option<Duration>,
}

impl Default for Job {
    fn default() -> Self {
        Self {
            video: false,
            trace: false,
            trace_categories: None,
            timeline: false,
            bodies: false,
            noopt: false,
            image_quality: 75,
            mobile: false,
            width: None,
            height: None,
            user_agent: None,
            headers: None,
            min_test_time: None,
        }
    }
}

/// Crop percentages of the emulated viewport relative to the raw capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CropPercent {
    /// Viewport width as a percentage of the capture width.
    pub width: u32,
    /// Viewport height as a percentage of the capture height.
    pub height: u32,
}

/// One measurement run: artifact location, timing bounds, and the error slot
/// every component reports into.
#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    /// Directory all artifacts are written under.
    pub dir: PathBuf,
    /// Filename prefix for this run's artifacts.
    pub prefix: String,
    /// Subdirectory (under `dir`) for filmstrip frames.
    #[serde(default = "default_video_subdirectory")]
    pub video_subdirectory: String,
    /// Remote debugging port of the browser under test.
    pub port: u16,
    /// URL block patterns installed before navigation.
    #[serde(default)]
    pub block: Vec<String>,
    /// Whether this run persists captured data.
    #[serde(default = "default_true")]
    pub log_data: bool,
    /// Stop at the onload event instead of waiting for network quiescence.
    #[serde(default)]
    pub stop_at_onload: bool,
    /// Hard wall for the page-load wait.
    #[serde(default = "default_time_limit")]
    pub time_limit: Duration,
    /// Network-silence interval required to consider the load settled.
    #[serde(default = "default_activity_time")]
    pub activity_time: Duration,
    /// Task-level error, set at most once by whichever failure came first.
    #[serde(default)]
    pub error: Option<String>,
    /// Viewport crop percentages, computed on the first mobile screenshot.
    #[serde(default)]
    pub crop_pct: Option<CropPercent>,
}

fn default_video_subdirectory() -> String {
    "video".to_string()
}

fn default_true() -> bool {
    true
}

fn default_time_limit() -> Duration {
    Duration::from_secs(120)
}

fn default_activity_time() -> Duration {
    Duration::from_secs(2)
}

impl Task {
    /// Create a task with default timing bounds.
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, port: u16) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            video_subdirectory: default_video_subdirectory(),
            port,
            block: Vec::new(),
            log_data: true,
            stop_at_onload: false,
            time_limit: default_time_limit(),
            activity_time: default_activity_time(),
            error: None,
            crop_pct: None,
        }
    }

    /// The `/json` discovery URL for this task's browser.
    pub fn discovery_url(&self) -> String {
        format!("http://localhost:{}/json", self.port)
    }

    /// Base path every artifact name is derived from: `<dir>/<prefix>`.
    pub fn path_base(&self) -> String {
        join_display(&self.dir, &self.prefix)
    }

    /// Directory filmstrip frames are written into.
    pub fn video_dir(&self) -> PathBuf {
        self.dir.join(&self.video_subdirectory)
    }

    /// Filename prefix for filmstrip frames (`<video dir>/ms_`).
    pub fn video_prefix(&self) -> String {
        join_display(&self.video_dir(), "ms_")
    }

    /// Directory raw response bodies are written into.
    pub fn bodies_dir(&self) -> PathBuf {
        self.dir.join("bodies")
    }
}

/// Join a directory and a name fragment into a display string. Artifact
/// names are built by appending suffixes to these, so they stay strings
/// rather than `PathBuf`s.
fn join_display(dir: &Path, name: &str) -> String {
    dir.join(name).display().to_string()
}
