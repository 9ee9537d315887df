#![warn(missing_docs)]
//! Macrobench Core - Worker Runtime
//!
//! Everything that runs inside a measurement process:
//! - the script value model and the `StackMachine` interface with its in-memory
//!   implementation
//! - the snapshot text format and the temporary-file transport that carries a
//!   benchmark and its host configuration to a worker
//! - the lifecycle runner that times invocations of a macro between its hooks
//! - the worker main loop speaking the IPC protocol

mod allocator;
mod bench;
mod exec;
mod heap;
mod host;
mod measure;
pub mod ops;
mod profiler;
mod registry;
mod runner;
pub mod snapshot;
mod stack;
mod transport;
mod value;
mod worker;

pub use allocator::{TrackingAllocator, current_allocation, is_tracking, reset_allocation_counter};
pub use bench::{BenchConfigError, BenchConfiguration, Hook, MACRO_KEY, ResolvedHooks, clear_stack};
pub use exec::fast_exec;
pub use heap::{HeapLimits, HeapSizeError, parse_heap_size};
pub use host::{EXTENSION_PREFIX, EXTENSIONS_KEY, HostConfig, HostConfigError};
pub use measure::{CpuTimes, Timer, pin_to_cpu};
pub use profiler::{ProfilerKind, ProfilerSet};
pub use registry::{EXTENSIONS, Registry, RegistryError};
pub use runner::{LifecycleRunner, MAX_SAMPLES_PER_ITERATION, Phase, PhaseError};
pub use snapshot::SnapshotError;
pub use stack::{Limits, MemoryStack, ScriptError, StackMachine};
pub use transport::{
    BENCH_CONFIG_MARKER, HOST_CONFIG_MARKER, TransportError, TransportFiles, TransportHandles,
};
pub use value::{Macro, OpFn, Operation, Step, Value};
pub use worker::{TOKEN_ATTRIBUTE, TRIAL_FAILURE, TrialHost, WorkerMain, execute_trial, shutdown_requested};
