#![warn(missing_docs)]
//! Macrobench Report - Result Records and Output
//!
//! [`RunResult`] is the record a benchmark run returns, one per measured mode.
//! It renders as JSON (the machine-readable shape, with the submitted benchmark
//! attached under `benchConfiguration`) or as a human-readable summary.

mod human;
mod json;
mod report;

pub use human::format_human_output;
pub use json::{generate_json_report, to_json_value};
pub use report::{BENCH_CONFIGURATION_KEY, Metric, RunResult, TimeUnit};

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON array of result records
    Json,
    /// Human-readable terminal output
    Human,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" | "text" => Ok(OutputFormat::Human),
            other => Err(format!("Unknown output format: {}", other)),
        }
    }
}
