//! Core error types.

use thiserror::Error;

/// Errors that can occur in the measurement core.
///
/// These cover setup and artifact plumbing only. Failures observed while a
/// measurement is running (navigation errors, timeouts, crashes) are recorded
/// on the task instead, so partial artifacts are always flushed.
#[derive(Error, Debug)]
pub enum CoreError {
    /// CDP communication error.
    #[error("CDP error: {0}")]
    Cdp(#[from] loadscope_cdp::CdpError),

    /// Filesystem error while writing artifacts.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bodies archive error.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Screenshot decode error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// An operation needed a live connection and there was none.
    #[error("not connected to a browser tab")]
    NotConnected,
}
