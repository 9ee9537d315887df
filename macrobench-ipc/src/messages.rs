//! IPC Message Types
//!
//! Everything that crosses the supervisor/worker pipe. All types derive rkyv with
//! `check_bytes` so a worker payload is validated before it is trusted.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use std::fmt;

/// Concrete measurement mode executed by a worker.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Archive,
    RkyvSerialize,
    RkyvDeserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[archive(check_bytes)]
pub enum BenchMode {
    /// Operations per unit of time
    Throughput,
    /// Average time per operation
    AverageTime,
    /// Every batch is a sample, reported with percentiles
    SampleTime,
    /// One batch per iteration, no time budget
    SingleShotTime,
}

impl BenchMode {
    /// Every concrete mode, in reporting order.
    pub const ALL: [BenchMode; 4] = [
        BenchMode::Throughput,
        BenchMode::AverageTime,
        BenchMode::SampleTime,
        BenchMode::SingleShotTime,
    ];

    /// Full mode name, as accepted in options maps.
    pub fn name(self) -> &'static str {
        match self {
            BenchMode::Throughput => "Throughput",
            BenchMode::AverageTime => "AverageTime",
            BenchMode::SampleTime => "SampleTime",
            BenchMode::SingleShotTime => "SingleShotTime",
        }
    }

    /// Short label used in result records.
    pub fn label(self) -> &'static str {
        match self {
            BenchMode::Throughput => "thrpt",
            BenchMode::AverageTime => "avgt",
            BenchMode::SampleTime => "sample",
            BenchMode::SingleShotTime => "ss",
        }
    }
}

impl fmt::Display for BenchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where warmup iterations happen relative to the measured modes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Archive,
    RkyvSerialize,
    RkyvDeserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[archive(check_bytes)]
pub enum WarmupMode {
    /// Warm up each mode right before measuring it
    Individual,
    /// Warm up every mode first, then measure without further warmup
    Bulk,
    /// Bulk warmup followed by individual warmup
    BulkIndividual,
}

impl WarmupMode {
    /// Whether all modes are warmed up before the first measurement.
    pub fn is_bulk(self) -> bool {
        matches!(self, WarmupMode::Bulk | WarmupMode::BulkIndividual)
    }

    /// Whether each mode is warmed up right before its own measurement.
    pub fn is_individual(self) -> bool {
        matches!(self, WarmupMode::Individual | WarmupMode::BulkIndividual)
    }
}

/// Whether an iteration was warmup or measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum IterationPhase {
    /// Discarded by the supervisor
    Warmup,
    /// Contributes to the aggregated score
    Measurement,
}

/// Everything a worker needs to run one trial.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct TrialPlan {
    /// Concrete modes, run in order within the same trial
    pub modes: Vec<BenchMode>,
    /// Warmup placement
    pub warmup_mode: WarmupMode,
    /// Warmup iterations per mode
    pub warmup_iterations: u32,
    /// Warmup time budget per iteration in nanoseconds
    pub warmup_time_ns: u64,
    /// Invocations per warmup batch
    pub warmup_batch_size: u32,
    /// Measurement iterations per mode
    pub measurement_iterations: u32,
    /// Measurement time budget per iteration in nanoseconds
    pub measurement_time_ns: u64,
    /// Invocations per measurement batch
    pub measurement_batch_size: u32,
    /// Logical operations performed by one invocation
    pub operations_per_invocation: u32,
    /// Reclaim stack storage between iterations
    pub should_do_gc: bool,
    /// Profiler identifiers, already validated
    pub profilers: Vec<String>,
}

impl Default for TrialPlan {
    fn default() -> Self {
        Self {
            modes: vec![BenchMode::Throughput],
            warmup_mode: WarmupMode::Individual,
            warmup_iterations: 5,
            warmup_time_ns: 10_000_000_000,
            warmup_batch_size: 1,
            measurement_iterations: 5,
            measurement_time_ns: 10_000_000_000,
            measurement_batch_size: 1,
            operations_per_invocation: 1,
            should_do_gc: false,
            profilers: Vec::new(),
        }
    }
}

impl TrialPlan {
    /// Check the invariants a worker relies on.
    pub fn validate(&self) -> Result<(), String> {
        if self.modes.is_empty() {
            return Err("plan has no modes".to_string());
        }
        if self.measurement_iterations == 0 {
            return Err("measurement_iterations must be > 0".to_string());
        }
        if self.warmup_batch_size == 0 || self.measurement_batch_size == 0 {
            return Err("batch sizes must be > 0".to_string());
        }
        if self.operations_per_invocation == 0 {
            return Err("operations_per_invocation must be > 0".to_string());
        }
        Ok(())
    }
}

/// A named secondary measurement produced by a profiler.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct SecondaryValue {
    /// Metric name, e.g. `·gc.count`
    pub name: String,
    /// Value for one iteration
    pub value: f64,
    /// Unit label
    pub unit: String,
}

/// Raw outcome of one iteration of one mode.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct IterationResult {
    /// Mode this iteration belongs to
    pub mode: BenchMode,
    /// Warmup or measurement
    pub phase: IterationPhase,
    /// Zero-based iteration index within the phase
    pub index: u32,
    /// Measured macro executions
    pub invocations: u64,
    /// `invocations * operations_per_invocation`
    pub operations: u64,
    /// Sum of timed invocation intervals in nanoseconds
    pub timed_nanos: u64,
    /// Invocations per batch for this iteration
    pub batch_size: u32,
    /// Timed nanoseconds of each batch (SampleTime only)
    pub samples: Vec<u64>,
    /// Profiler output for this iteration
    pub secondary: Vec<SecondaryValue>,
}

/// Worker capabilities advertised during handshake
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct WorkerCapabilities {
    /// Protocol version for compatibility
    pub protocol_version: u32,
    /// Worker process id, for log correlation
    pub pid: u32,
    /// Whether the worker runs under the tracking allocator
    pub has_alloc_tracking: bool,
    /// Heap limit applied to the worker, in bytes
    pub heap_limit: Option<u64>,
}

impl WorkerCapabilities {
    /// Capabilities of the current process.
    pub fn current(has_alloc_tracking: bool, heap_limit: Option<u64>) -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION,
            pid: std::process::id(),
            has_alloc_tracking,
            heap_limit,
        }
    }
}

/// Messages sent from Worker to Supervisor
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum WorkerMessage {
    /// Initial handshake with worker capabilities
    Hello(WorkerCapabilities),

    /// One finished iteration, warmup or measurement
    Iteration(IterationResult),

    /// Trial finished, all iterations have been sent
    Complete {
        /// Number of iteration messages sent before this one
        iterations: u32,
        /// Wall clock time of the trial in nanoseconds
        total_duration_nanos: u64,
    },

    /// Trial failed; the tree mirrors the worker's error chain
    Failure(crate::FailureTree),
}

/// Commands sent from Supervisor to Worker
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum SupervisorCommand {
    /// Run one trial
    Run {
        /// What to run
        plan: TrialPlan,
    },

    /// Request graceful shutdown
    Shutdown,

    /// Ping for health check
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_plan_is_valid() {
        assert!(TrialPlan::default().validate().is_ok());
    }

    #[test]
    fn test_plan_without_modes_is_rejected() {
        let plan = TrialPlan {
            modes: Vec::new(),
            ..Default::default()
        };
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_plan_with_zero_batch_is_rejected() {
        let plan = TrialPlan {
            warmup_batch_size: 0,
            ..Default::default()
        };
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_warmup_mode_placement() {
        assert!(WarmupMode::Individual.is_individual());
        assert!(!WarmupMode::Individual.is_bulk());
        assert!(WarmupMode::Bulk.is_bulk());
        assert!(WarmupMode::BulkIndividual.is_bulk() && WarmupMode::BulkIndividual.is_individual());
    }

    #[test]
    fn test_mode_labels() {
        let labels: Vec<_> = BenchMode::ALL.iter().map(|m| m.label()).collect();
        assert_eq!(labels, ["thrpt", "avgt", "sample", "ss"]);
    }

    #[test]
    fn test_capabilities_carry_protocol_version() {
        let caps = WorkerCapabilities::current(true, None);
        assert_eq!(caps.protocol_version, crate::PROTOCOL_VERSION);
        assert_eq!(caps.pid, std::process::id());
    }
}
