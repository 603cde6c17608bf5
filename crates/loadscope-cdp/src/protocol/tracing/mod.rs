//! Tracing domain types.

use serde::Deserialize;
use serde_json::Value;

/// Parameters of a `Tracing.dataCollected` event: a bucket of raw trace
/// events. Individual events stay untyped; the trace sink inspects `cat`,
/// `name`, `ts`, and `args` directly.
#[derive(Debug, Clone, Deserialize)]
pub struct DataCollectedParams {
    /// Collected trace events.
    pub value: Vec<Value>,
}
