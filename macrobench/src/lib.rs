#![warn(missing_docs)]
//! # Macrobench
//!
//! Micro-benchmark harness for stack-machine macros with fork isolation.
//!
//! A benchmark is a measured macro plus optional lifecycle hooks
//! (`pretrial`, `preiteration`, `preinvocation`, `postinvocation`,
//! `postiteration`, `posttrial`). Each measurement fork is a fresh worker
//! process that restores the benchmark from a snapshot file, runs the
//! lifecycle in every requested mode and streams iteration results back over
//! a pipe. The orchestrator aggregates them into one [`RunResult`] per mode:
//! - **Modes**: throughput, average time, sample time and single shot
//! - **Statistics**: bootstrap confidence intervals and score percentiles
//! - **Profilers**: allocations, stack depth and CPU time per iteration
//!
//! ## Quick Start
//!
//! ```ignore
//! use macrobench::{Harness, HostConfig, Orchestrator, Value, snapshot};
//!
//! let harness = Harness::new(Orchestrator::new(HostConfig::default())?);
//! let code = snapshot::decode_macro("<% 1 1 + %>", harness.orchestrator().registry())?;
//! let options = Value::Map(vec![
//!     (Value::from("forks"), Value::Long(1)),
//!     (Value::from("measurementTime"), Value::from("1s")),
//! ]);
//! for result in harness.run_macro(code, &options)? {
//!     println!("{} {}", result.primary_metric.score, result.primary_metric.score_unit);
//! }
//! ```
//!
//! The binary that runs the benchmark must also be able to act as the
//! worker; the `macrobench` binary does, and [`run`] gives any other binary
//! the same command line.

// Re-export the script model and worker runtime
pub use macrobench_core::{
    BenchConfigError, BenchConfiguration, Hook, HostConfig, Macro, MemoryStack, Registry,
    ScriptError, StackMachine, TrackingAllocator, TransportError, Value, snapshot,
};

// Re-export the run surface
pub use macrobench_cli::{
    BenchError, ExecutionError, Harness, Mode, Orchestrator, RunSpec, SerializationError,
    ValidationError,
};

// Re-export results
pub use macrobench_report::{Metric, RunResult, TimeUnit, format_human_output, generate_json_report};

// Re-export stats
pub use macrobench_stats::{BootstrapConfig, ScoreInterval, Summary, bootstrap_interval};

/// Run the Macrobench CLI.
///
/// Call this from a binary's `main()`; the same entry point serves the
/// hidden worker mode:
/// ```ignore
/// fn main() {
///     macrobench::run().unwrap();
/// }
/// ```
pub use macrobench_cli::run;
