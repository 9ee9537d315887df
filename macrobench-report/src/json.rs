//! JSON Output

use crate::report::RunResult;

/// Render results as a pretty-printed JSON array.
pub fn generate_json_report(results: &[RunResult]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(results)
}

/// Results as a JSON value tree.
pub fn to_json_value(results: &[RunResult]) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(results)
}
