//! Navigation state tracking and the page-load completion predicate.
//!
//! The monitor owns the main-frame identity for a session: the caller
//! announces a navigation with [`PageLoadMonitor::start_navigating`], and the
//! first `Page.frameStartedLoading` after that latches the main frame id for
//! the rest of the session. Everything here runs on the monotonic clock;
//! wall-clock time never participates in a completion decision.

use std::time::{Duration, Instant};

use tracing::debug;

/// A load must have been observed this long before quiescence can end the
/// wait.
const SETTLE_AFTER_LOAD: Duration = Duration::from_secs(1);

/// Why `wait_for_page_load` stopped pumping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A navigation error was latched.
    NavError,
    /// The hard time limit passed.
    Timeout,
    /// Load fired and the network went quiet.
    Settled,
    /// Some other handler set the task error.
    TaskError,
}

/// Tracks navigation state and evaluates the completion predicate.
#[derive(Debug)]
pub struct PageLoadMonitor {
    main_frame: Option<String>,
    is_navigating: bool,
    page_loaded: Option<Instant>,
    nav_error: Option<String>,
    last_activity: Instant,
}

impl Default for PageLoadMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PageLoadMonitor {
    /// Create a monitor with activity based at "now".
    pub fn new() -> Self {
        Self {
            main_frame: None,
            is_navigating: false,
            page_loaded: None,
            nav_error: None,
            last_activity: Instant::now(),
        }
    }

    /// The latched main frame id, once known.
    pub fn main_frame(&self) -> Option<&str> {
        self.main_frame.as_deref()
    }

    /// When the load event (or main-frame stop) was observed.
    pub fn page_loaded(&self) -> Option<Instant> {
        self.page_loaded
    }

    /// The latched navigation error, if any.
    pub fn nav_error(&self) -> Option<&str> {
        self.nav_error.as_deref()
    }

    /// Latch a navigation error. First writer wins.
    pub fn set_nav_error(&mut self, error: impl Into<String>) {
        if self.nav_error.is_none() {
            self.nav_error = Some(error.into());
        }
    }

    /// Drop any latched error for a fresh run.
    pub fn clear_error(&mut self) {
        self.nav_error = None;
    }

    /// Announce that a known navigation is about to start: the next frame to
    /// start loading is the main frame.
    pub fn start_navigating(&mut self) {
        self.main_frame = None;
        self.is_navigating = true;
    }

    /// A network event (or other page activity) happened.
    pub fn touch_activity(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Re-base the timing state when recording (re)starts.
    pub fn rebase(&mut self, now: Instant, stop_at_onload: bool) {
        if !stop_at_onload {
            self.last_activity = now;
        }
        if self.page_loaded.is_some() {
            self.page_loaded = Some(now);
        }
    }

    /// `Page.loadEventFired`.
    pub fn load_event_fired(&mut self, now: Instant) {
        self.page_loaded = Some(now);
    }

    /// `Page.frameStartedLoading`. Latches the main frame after a declared
    /// navigation; a (re)start of the main frame clears the loaded state.
    pub fn frame_started_loading(&mut self, frame_id: &str, now: Instant) {
        if self.is_navigating && self.main_frame.is_none() {
            self.is_navigating = false;
            self.main_frame = Some(frame_id.to_string());
        }
        if self.main_frame.as_deref() == Some(frame_id) {
            debug!("Navigating main frame");
            self.last_activity = now;
            self.page_loaded = None;
        }
    }

    /// `Page.frameStoppedLoading`. A main-frame stop before the load event
    /// counts as loaded; returns a latched navigation error the caller must
    /// promote to the task error.
    pub fn frame_stopped_loading(&mut self, frame_id: &str, now: Instant) -> Option<String> {
        if self.main_frame.as_deref() == Some(frame_id) && self.page_loaded.is_none() {
            let promote = self.nav_error.clone();
            if let Some(error) = promote.as_deref() {
                debug!(error, "Page load failed");
            }
            self.page_loaded = Some(now);
            return promote;
        }
        None
    }

    /// Evaluate the completion predicate.
    ///
    /// `started` is when the wait began, `min_test_time` is the job's
    /// minimum duration, and `task_error` reports whether some other handler
    /// already failed the task. Returns `None` while the wait should keep
    /// pumping.
    pub fn completion(
        &self,
        now: Instant,
        started: Instant,
        time_limit: Duration,
        min_test_time: Option<Duration>,
        activity_time: Duration,
        task_error: bool,
    ) -> Option<WaitOutcome> {
        if self.nav_error.is_some() {
            return Some(WaitOutcome::NavError);
        }
        if now >= started + time_limit {
            return Some(WaitOutcome::Timeout);
        }
        let elapsed_test = now.saturating_duration_since(started);
        if min_test_time.is_none_or(|min| elapsed_test > min) {
            let elapsed_activity = now.saturating_duration_since(self.last_activity);
            let settled = self.page_loaded.is_some_and(|loaded| {
                now.saturating_duration_since(loaded) >= SETTLE_AFTER_LOAD
            }) && elapsed_activity >= activity_time;
            if settled {
                return Some(WaitOutcome::Settled);
            }
            if task_error {
                return Some(WaitOutcome::TaskError);
            }
        }
        None
    }
}
