//! Runtime domain types.

use serde::Deserialize;
use serde_json::Value;

/// A mirror object referencing the evaluation result.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    /// The value, present when evaluation asked for `returnByValue`.
    pub value: Option<Value>,
}

/// Result of Runtime.evaluate.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResult {
    /// Evaluation result.
    pub result: Option<RemoteObject>,
}
